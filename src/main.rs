use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;
use rand::SeedableRng;

use mnist_light::config::TrainConfig;
use mnist_light::data;

/// Train a dense network on MNIST and report test accuracy.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory with the four MNIST IDX files, plain or `.gz`.
    #[arg(long, default_value = "data/mnist")]
    data_dir: PathBuf,

    /// JSON training config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// `sgd` or `adam`.
    #[arg(long)]
    optimizer: Option<String>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Feed raw 0-255 pixel values instead of scaling them to [0, 1].
    #[arg(long)]
    raw_pixels: bool,

    /// Skip the test split evaluation after training.
    #[arg(long)]
    no_evaluate: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(PathBuf, TrainConfig)> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => TrainConfig::default(),
        };
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(optimizer) = self.optimizer {
            config.optimizer = optimizer;
        }
        if self.learning_rate.is_some() {
            config.learning_rate = self.learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.raw_pixels {
            config.scale_pixels = false;
        }
        if self.no_evaluate {
            config.evaluate = false;
        }
        config.validate()?;
        Ok((self.data_dir, config))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (data_dir, config) = Args::parse().into_config()?;
    let mnist = data::load_data(&data_dir)
        .with_context(|| format!("loading MNIST from {}", data_dir.display()))?;

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    let mut model = config.build_model::<f32, _>(&mut rng)?;
    let mut input_shape = vec![config.batch_size];
    input_shape.extend_from_slice(&config.input_shape);
    info!("model:\n{}", model.network().summary(&input_shape)?);

    let x_train = mnist.train.images_tensor(config.scale_pixels);
    let y_train = mnist
        .train
        .labels_tensor(config.num_classes)
        .context("encoding training labels")?;
    let history = model
        .fit(&x_train, &y_train, &config.fit_options())
        .context("training failed")?;
    if let Some(last) = history.last() {
        info!(
            "finished {} epochs, final loss {:.4}, accuracy {:.4}",
            history.epochs.len(),
            last.loss,
            last.accuracy
        );
    }

    if config.evaluate && !mnist.test.is_empty() {
        let x_test = mnist.test.images_tensor(config.scale_pixels);
        let y_test = mnist
            .test
            .labels_tensor(config.num_classes)
            .context("encoding test labels")?;
        let evaluation = model.evaluate(&x_test, &y_test, config.batch_size)?;
        info!(
            "test loss {:.4}, test accuracy {:.4} over {} images",
            evaluation.loss, evaluation.accuracy, evaluation.samples
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn config_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_flags() {
        let (data_dir, config) = Args::try_parse_from(["mnist_light"])
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(data_dir, PathBuf::from("data/mnist"));
        assert_eq!(config, TrainConfig::default());
    }

    #[test]
    fn test_flags_override_config_file() {
        let file = config_file(
            r#"{"epochs": 3, "optimizer": "sgd", "learning_rate": 0.2, "batch_size": 64}"#,
        );
        let args = Args::try_parse_from([
            "mnist_light",
            "--config",
            file.path().to_str().unwrap(),
            "--optimizer",
            "adam",
            "--learning-rate",
            "0.005",
            "--raw-pixels",
            "--no-evaluate",
            "--seed",
            "7",
        ])
        .unwrap();
        let (_, config) = args.into_config().unwrap();
        assert_eq!(config.optimizer, "adam");
        assert_eq!(config.learning_rate, Some(0.005));
        assert!(!config.scale_pixels);
        assert!(!config.evaluate);
        assert_eq!(config.seed, 7);
        // untouched file values survive
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn test_overrides_are_validated() {
        let args = Args::try_parse_from(["mnist_light", "--batch-size", "0"]).unwrap();
        assert!(args.into_config().is_err());

        let file = config_file(r#"{"momentum": 0.9}"#);
        let args = Args::try_parse_from([
            "mnist_light",
            "--config",
            file.path().to_str().unwrap(),
            "--optimizer",
            "adam",
        ])
        .unwrap();
        assert!(args.into_config().is_err());
    }
}
