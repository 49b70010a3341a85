use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::mnist::{IMAGE_COLS, IMAGE_ROWS, NUM_CLASSES};
use crate::error::{Error, Result};
use crate::model::{FitOptions, Model};
use crate::nn::{Activation, Flatten, Linear, Loss, Sequential};
use crate::optim::{self, Adam, Optimizer, Sgd};
use crate::tensor::Numeric;

/// Everything a training run needs. The defaults build, compile and fit the
/// classic 784-512-256-128-64-10 MNIST perceptron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub input_shape: Vec<usize>,
    pub hidden_units: Vec<usize>,
    pub activation: Activation,
    pub num_classes: usize,
    pub output_activation: Activation,
    pub loss: Loss,
    pub optimizer: String,
    /// `None` keeps the optimizer's own default.
    pub learning_rate: Option<f64>,
    /// Only used by `sgd`.
    pub momentum: f64,
    /// Needs a positive `momentum`.
    pub nesterov: bool,
    /// Only used by `adam`.
    pub beta_1: f64,
    pub beta_2: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub shuffle: bool,
    pub seed: u64,
    /// Divide pixels by 255 before training.
    pub scale_pixels: bool,
    pub evaluate: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            input_shape: vec![IMAGE_ROWS, IMAGE_COLS],
            hidden_units: vec![512, 256, 128, 64],
            activation: Activation::Relu,
            num_classes: NUM_CLASSES,
            output_activation: Activation::Softmax,
            loss: Loss::CategoricalCrossentropy,
            optimizer: "sgd".to_string(),
            learning_rate: None,
            momentum: 0.0,
            nesterov: false,
            beta_1: 0.9,
            beta_2: 0.999,
            batch_size: 128,
            epochs: 10,
            shuffle: true,
            seed: 42,
            scale_pixels: true,
            evaluate: true,
        }
    }
}

impl TrainConfig {
    /// Reads a JSON file, fields missing from it keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrainConfig = serde_json::from_str(&text).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(Error::InvalidOption(message.to_string()));
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.epochs == 0 {
            return invalid("epochs must be positive");
        }
        if self.num_classes == 0 {
            return invalid("num_classes must be positive");
        }
        if self.input_shape.is_empty() || self.input_shape.contains(&0) {
            return invalid("input_shape must be non-empty with positive sizes");
        }
        if self.hidden_units.contains(&0) {
            return invalid("hidden layers need at least one unit");
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid("momentum must be in [0, 1)");
        }
        if self.nesterov && self.momentum == 0.0 {
            return invalid("nesterov needs a positive momentum");
        }
        let is_sgd = self.optimizer.eq_ignore_ascii_case("sgd");
        if !is_sgd && (self.momentum > 0.0 || self.nesterov) {
            return invalid("momentum and nesterov are only supported by sgd");
        }
        if !(0.0..1.0).contains(&self.beta_1) || !(0.0..1.0).contains(&self.beta_2) {
            return invalid("beta_1 and beta_2 must be in [0, 1)");
        }
        Ok(())
    }

    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            batch_size: self.batch_size,
            epochs: self.epochs,
            shuffle: self.shuffle,
            seed: Some(self.seed),
        }
    }

    pub fn build_optimizer<T: Numeric>(&self) -> Result<Box<dyn Optimizer<T>>> {
        self.validate()?;
        match self.optimizer.to_ascii_lowercase().as_str() {
            "sgd" => {
                let learning_rate = self.learning_rate.unwrap_or(optim::sgd::DEFAULT_LEARNING_RATE);
                let sgd = Sgd::<T>::new(learning_rate)?.with_momentum(self.momentum, self.nesterov);
                Ok(Box::new(sgd))
            }
            "adam" => {
                let learning_rate = self.learning_rate.unwrap_or(optim::adam::DEFAULT_LEARNING_RATE);
                let adam = Adam::<T>::new(learning_rate)?.with_betas(self.beta_1, self.beta_2);
                Ok(Box::new(adam))
            }
            other => optim::from_name(other, self.learning_rate),
        }
    }

    /// `Flatten`, one dense layer per entry of `hidden_units`, then the
    /// classifier layer.
    pub fn build_network<T: Numeric, R: Rng + ?Sized>(&self, rng: &mut R) -> Sequential<T> {
        let mut network = Sequential::new();
        network.add(Flatten::with_input_shape(self.input_shape.clone()));
        let mut width: usize = self.input_shape.iter().product();
        for &units in &self.hidden_units {
            network.add(Linear::dense(width, units, self.activation, rng));
            width = units;
        }
        network.add(Linear::dense(
            width,
            self.num_classes,
            self.output_activation,
            rng,
        ));
        network
    }

    /// A compiled model ready for `fit`.
    pub fn build_model<T: Numeric, R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Model<T>> {
        self.validate()?;
        let mut model = Model::new(self.build_network(rng));
        model.compile(self.loss, self.build_optimizer()?);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Module;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn test_default_network_matches_mnist_mlp() {
        let config = TrainConfig::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let network = config.build_network::<f32, _>(&mut rng);
        assert_eq!(network.len(), 6);
        assert_eq!(network.output_shape(&[128, 28, 28]).unwrap(), vec![128, 10]);
        let expected = (784 * 512 + 512) + (512 * 256 + 256) + (256 * 128 + 128)
            + (128 * 64 + 64)
            + (64 * 10 + 10);
        assert_eq!(network.param_count(), expected);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"epochs": 2, "optimizer": "adam", "hidden_units": [32]}}"#).unwrap();
        let config = TrainConfig::load(file.path()).unwrap();
        assert_eq!(config.epochs, 2);
        assert_eq!(config.hidden_units, vec![32]);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.loss, Loss::CategoricalCrossentropy);
        let optimizer = config.build_optimizer::<f32>().unwrap();
        assert_eq!(optimizer.name(), "adam");
        assert_eq!(optimizer.learning_rate(), 0.001);
    }

    #[test]
    fn test_bad_json_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"epochs": "many"}}"#).unwrap();
        assert!(matches!(
            TrainConfig::load(file.path()),
            Err(Error::Config { .. })
        ));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"activation": "swish"}}"#).unwrap();
        assert!(matches!(
            TrainConfig::load(file.path()),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            TrainConfig::load("/definitely/not/here.json"),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_validate() {
        let config = TrainConfig {
            batch_size: 0,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
        let config = TrainConfig {
            optimizer: "adam".to_string(),
            momentum: 0.9,
            ..TrainConfig::default()
        };
        assert!(config.build_optimizer::<f32>().is_err());
        let config = TrainConfig {
            nesterov: true,
            ..TrainConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidOption(_))));
        let config = TrainConfig {
            nesterov: true,
            momentum: 0.9,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_ok());
        let config = TrainConfig {
            optimizer: "adam".to_string(),
            beta_1: 1.0,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
        let config = TrainConfig {
            optimizer: "rmsprop".to_string(),
            ..TrainConfig::default()
        };
        assert!(matches!(
            config.build_optimizer::<f32>(),
            Err(Error::UnknownOptimizer(_))
        ));
    }

    #[test]
    fn test_adam_betas_reach_the_optimizer() {
        use crate::tensor::RcTensor;

        // bias correction keeps the first step at lr * sign(g) for any betas
        let config = TrainConfig {
            optimizer: "adam".to_string(),
            learning_rate: Some(0.1),
            beta_1: 0.0,
            beta_2: 0.5,
            ..TrainConfig::default()
        };
        let mut optimizer = config.build_optimizer::<f64>().unwrap();
        let p = RcTensor::parameter(vec![1.0], vec![1]);
        (&p * &RcTensor::scalar(2.0)).sum().backward().unwrap();
        let first = optimizer.step(vec![p]).unwrap();
        assert!((first[0].data()[0] - 0.9).abs() < 1e-6);

        // the second step differs from the default betas
        let second_step = |beta_1: f64, beta_2: f64| {
            let config = TrainConfig {
                beta_1,
                beta_2,
                ..config.clone()
            };
            let mut optimizer = config.build_optimizer::<f64>().unwrap();
            let mut params = vec![RcTensor::parameter(vec![1.0], vec![1])];
            for g in [2.0, -1.0] {
                (&params[0] * &RcTensor::scalar(g)).sum().backward().unwrap();
                params = optimizer.step(params).unwrap();
            }
            params[0].data()[0]
        };
        assert!((second_step(0.0, 0.5) - second_step(0.9, 0.999)).abs() > 1e-3);
    }
}
