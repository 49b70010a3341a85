mod autograd;
pub mod functional;
mod numeric;
mod raw_tensor;
mod rc_tensor;
mod types;
mod utils;

pub use autograd::{is_grad_enabled, no_grad};
pub use numeric::*;
pub use raw_tensor::*;
pub use rc_tensor::*;
pub use types::*;
pub use utils::broadcast_shape;
