use crate::error::Result;
use crate::tensor::{Numeric, RcTensor, TensorList};

pub(crate) mod private {
    pub trait Private {}
}

/// A layer, or stack of layers, mapping a batch to a batch.
///
/// Parameters are leaves: optimizers build replacement tensors and hand them
/// back through `update_params`, in the same order `params` returned them.
pub trait Module<T: Numeric>: private::Private {
    fn forward(&self, inputs: RcTensor<T>) -> RcTensor<T>;

    fn params(&self) -> TensorList<T>;

    fn update_params(&mut self, new_params: TensorList<T>);

    /// One line for the model summary.
    fn describe(&self) -> String;

    /// Shape produced for an input of shape `input`, batch axis included.
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>>;

    fn param_count(&self) -> usize {
        self.params().iter().map(|p| p.count()).sum()
    }
}
