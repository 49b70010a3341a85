//! Train a multi-layer perceptron on MNIST.
//!
//! ```no_run
//! use mnist_light::config::TrainConfig;
//! use mnist_light::data;
//! use rand::SeedableRng;
//!
//! # fn main() -> mnist_light::Result<()> {
//! let (train, _test) = {
//!     let mnist = data::load_data("data/mnist")?;
//!     (mnist.train, mnist.test)
//! };
//! let config = TrainConfig::default();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
//! let mut model = config.build_model::<f32, _>(&mut rng)?;
//! let x = train.images_tensor(config.scale_pixels);
//! let y = train.labels_tensor(config.num_classes)?;
//! model.fit(&x, &y, &config.fit_options())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod nn;
pub mod optim;
pub mod tensor;

pub use error::{Error, Result};
