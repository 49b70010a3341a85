use crate::tensor::RcTensor;

// Aliases kept for readability, they may grow into their own types later.
pub type TensorList<T> = Vec<RcTensor<T>>;

pub type Scalar<T> = RcTensor<T>;
