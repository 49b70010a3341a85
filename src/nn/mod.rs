mod activation;
mod flatten;
pub mod init;
mod linear;
mod loss;
pub(crate) mod module;
mod sequential;

pub use activation::Activation;
pub use flatten::Flatten;
pub use linear::Linear;
pub use loss::Loss;
pub use module::Module;
pub use sequential::Sequential;
