use std::time::{Duration, Instant};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::data::{batch_order, Batch, Batcher};
use crate::error::{Error, Result};
use crate::nn::{Loss, Module, Sequential};
use crate::optim::Optimizer;
use crate::tensor::{no_grad, Numeric, RcTensor};

/// Batches between two debug log lines during `fit`.
const LOG_EVERY: usize = 100;

/// Options of [`Model::fit`], defaults follow Keras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitOptions {
    pub batch_size: usize,
    pub epochs: usize,
    pub shuffle: bool,
    /// Seeds the shuffling, `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            batch_size: 32,
            epochs: 1,
            shuffle: true,
            seed: None,
        }
    }
}

/// Sample weighted loss and accuracy over a pass through a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    /// Counted from one.
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub epochs: Vec<EpochStats>,
}

impl History {
    pub fn losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

#[derive(Default)]
struct Running {
    loss: f64,
    correct: usize,
    samples: usize,
}

impl Running {
    fn record<T: Numeric>(&mut self, loss: f64, predictions: &RcTensor<T>, targets: &RcTensor<T>) {
        let len = predictions.shape()[0];
        self.loss += loss * len as f64;
        self.samples += len;
        self.correct += predictions
            .argmax_rows()
            .iter()
            .zip(targets.argmax_rows())
            .filter(|(p, t)| **p == *t)
            .count();
    }

    fn loss(&self) -> f64 {
        self.loss / self.samples.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.samples.max(1) as f64
    }
}

struct Compiled<T: Numeric> {
    loss: Loss,
    optimizer: Box<dyn Optimizer<T>>,
}

/// A [`Sequential`] network plus what `compile` attaches to train it.
pub struct Model<T: Numeric> {
    network: Sequential<T>,
    compiled: Option<Compiled<T>>,
}

impl<T: Numeric> Model<T> {
    pub fn new(network: Sequential<T>) -> Self {
        Model {
            network,
            compiled: None,
        }
    }

    pub fn network(&self) -> &Sequential<T> {
        &self.network
    }

    pub fn compile(&mut self, loss: Loss, optimizer: Box<dyn Optimizer<T>>) {
        info!(
            "compiled with loss={loss}, optimizer={} (learning rate {})",
            optimizer.name(),
            optimizer.learning_rate()
        );
        self.compiled = Some(Compiled { loss, optimizer });
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Trains on `x` (`[n, ..]`) against `y` (`[n, classes]`) and returns the
    /// per epoch loss and accuracy.
    pub fn fit(
        &mut self,
        x: &RcTensor<T>,
        y: &RcTensor<T>,
        options: &FitOptions,
    ) -> Result<History> {
        let Model { network, compiled } = self;
        let compiled = compiled.as_mut().ok_or(Error::NotCompiled("fit"))?;
        if options.epochs == 0 {
            return Err(Error::InvalidOption("epochs must be positive".to_string()));
        }
        if options.batch_size == 0 {
            return Err(Error::InvalidOption("batch size must be positive".to_string()));
        }
        let (samples, _) = check_inputs(network, x, Some(y))?;
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let batcher = Batcher::new(x.data(), y.data(), samples)?;
        let batches = (samples + options.batch_size - 1) / options.batch_size;

        let mut history = History::default();
        for epoch in 1..=options.epochs {
            let started = Instant::now();
            let order = batch_order(samples, options.shuffle, &mut rng);
            let mut running = Running::default();
            batcher.run(&order, options.batch_size, |batch| {
                let index = batch.index;
                let (inputs, targets) = to_tensors(batch, x.shape(), batcher.target_width());
                let predictions = network.forward(inputs);
                let loss = compiled.loss.compute(&predictions, &targets)?;
                let value = loss.elem().as_f64();
                if !value.is_finite() {
                    return Err(Error::NonFiniteLoss {
                        epoch,
                        batch: index,
                        loss: value,
                    });
                }
                loss.backward()?;
                let updated = compiled.optimizer.step(network.params())?;
                network.update_params(updated);
                running.record(value, &predictions, &targets);
                if index % LOG_EVERY == 0 {
                    debug!(
                        "epoch {epoch} batch {}/{batches} - loss: {value:.4} - running accuracy: {:.4}",
                        index + 1,
                        running.accuracy()
                    );
                }
                Ok(())
            })?;
            let stats = EpochStats {
                epoch,
                loss: running.loss(),
                accuracy: running.accuracy(),
                duration: started.elapsed(),
            };
            info!(
                "epoch {epoch}/{} - {batches} batches - loss: {:.4} - accuracy: {:.4} - {:.1}s",
                options.epochs,
                stats.loss,
                stats.accuracy,
                stats.duration.as_secs_f64()
            );
            history.epochs.push(stats);
        }
        Ok(history)
    }

    /// Loss and accuracy on `x`/`y` without touching the parameters.
    pub fn evaluate(&self, x: &RcTensor<T>, y: &RcTensor<T>, batch_size: usize) -> Result<Evaluation> {
        let compiled = self.compiled.as_ref().ok_or(Error::NotCompiled("evaluate"))?;
        if batch_size == 0 {
            return Err(Error::InvalidOption("batch size must be positive".to_string()));
        }
        let (samples, _) = check_inputs(&self.network, x, Some(y))?;
        let batcher = Batcher::new(x.data(), y.data(), samples)?;
        let order: Vec<usize> = (0..samples).collect();
        let mut running = Running::default();
        no_grad(|| {
            batcher.run(&order, batch_size, |batch| {
                let (inputs, targets) = to_tensors(batch, x.shape(), batcher.target_width());
                let predictions = self.network.forward(inputs);
                let loss = compiled.loss.compute(&predictions, &targets)?;
                running.record(loss.elem().as_f64(), &predictions, &targets);
                Ok(())
            })
        })?;
        Ok(Evaluation {
            loss: running.loss(),
            accuracy: running.accuracy(),
            samples: running.samples,
        })
    }

    /// Network outputs for every row of `x`, stacked into one tensor.
    pub fn predict(&self, x: &RcTensor<T>, batch_size: usize) -> Result<RcTensor<T>> {
        if batch_size == 0 {
            return Err(Error::InvalidOption("batch size must be positive".to_string()));
        }
        let (samples, width) = check_inputs(&self.network, x, None)?;
        let batcher = Batcher::new(x.data(), &[], samples)?;
        let order: Vec<usize> = (0..samples).collect();
        let mut outputs = Vec::with_capacity(samples * width);
        no_grad(|| {
            batcher.run(&order, batch_size, |batch| {
                let (inputs, _) = to_tensors(batch, x.shape(), 0);
                let predictions = self.network.forward(inputs);
                outputs.extend_from_slice(predictions.data());
                Ok(())
            })
        })?;
        RcTensor::try_new(outputs, vec![samples, width])
    }
}

/// Checks `x` (and `y`) against each other and the network, returning the
/// number of samples and the width of the `[samples, width]` output.
fn check_inputs<T: Numeric>(
    network: &Sequential<T>,
    x: &RcTensor<T>,
    y: Option<&RcTensor<T>>,
) -> Result<(usize, usize)> {
    let samples = x.shape().first().copied().unwrap_or(0);
    if samples == 0 {
        return Err(Error::InvalidOption(format!(
            "inputs of shape {:?} hold no samples",
            x.shape()
        )));
    }
    let output = network.output_shape(x.shape())?;
    let width = match output.as_slice() {
        [_, width] => *width,
        _ => {
            return Err(Error::ShapeMismatch(format!(
                "network maps {:?} to {output:?}, expected [samples, width]",
                x.shape()
            )))
        }
    };
    if let Some(y) = y {
        if y.shape().first() != Some(&samples) {
            return Err(Error::ShapeMismatch(format!(
                "{samples} input samples but targets of shape {:?}",
                y.shape()
            )));
        }
        if y.shape() != &output {
            return Err(Error::ShapeMismatch(format!(
                "network produces {output:?} but targets are {:?}",
                y.shape()
            )));
        }
    }
    Ok((samples, width))
}

fn to_tensors<T: Numeric>(
    batch: Batch<T>,
    x_shape: &[usize],
    target_width: usize,
) -> (RcTensor<T>, RcTensor<T>) {
    let mut input_shape = x_shape.to_vec();
    input_shape[0] = batch.len;
    (
        RcTensor::new(batch.inputs, input_shape),
        RcTensor::new(batch.targets, vec![batch.len, target_width]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Linear};
    use crate::optim::Sgd;

    fn tiny_model() -> Model<f64> {
        let mut network = Sequential::new();
        network.add(Linear::new(
            RcTensor::parameter(vec![0.1, -0.1, 0.2, 0.3], vec![2, 2]),
            RcTensor::parameter(vec![0.0, 0.0], vec![1, 2]),
            Activation::Softmax,
        ));
        Model::new(network)
    }

    #[test]
    fn test_fit_requires_compile() {
        let mut model = tiny_model();
        let x = RcTensor::zeros(vec![4, 2]);
        let y = RcTensor::zeros(vec![4, 2]);
        assert!(matches!(
            model.fit(&x, &y, &FitOptions::default()),
            Err(Error::NotCompiled("fit"))
        ));
        assert!(matches!(
            model.evaluate(&x, &y, 2),
            Err(Error::NotCompiled("evaluate"))
        ));
    }

    #[test]
    fn test_fit_rejects_bad_inputs() {
        let mut model = tiny_model();
        model.compile(Loss::CategoricalCrossentropy, Box::new(Sgd::<f64>::new(0.1).unwrap()));
        let x = RcTensor::zeros(vec![4, 2]);
        let short_y = RcTensor::zeros(vec![3, 2]);
        let wide_y = RcTensor::zeros(vec![4, 3]);
        let options = FitOptions::default();
        assert!(matches!(
            model.fit(&x, &short_y, &options),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            model.fit(&x, &wide_y, &options),
            Err(Error::ShapeMismatch(_))
        ));
        let y = RcTensor::zeros(vec![4, 2]);
        let zero_batch = FitOptions {
            batch_size: 0,
            ..FitOptions::default()
        };
        assert!(matches!(
            model.fit(&x, &y, &zero_batch),
            Err(Error::InvalidOption(_))
        ));
        let zero_epochs = FitOptions {
            epochs: 0,
            ..FitOptions::default()
        };
        assert!(matches!(
            model.fit(&x, &y, &zero_epochs),
            Err(Error::InvalidOption(_))
        ));
    }

    #[test]
    fn test_fit_reports_non_finite_loss() {
        let mut model = tiny_model();
        model.compile(Loss::MeanSquaredError, Box::new(Sgd::<f64>::new(0.1).unwrap()));
        let x = RcTensor::new(vec![1.0, f64::NAN], vec![1, 2]);
        let y = RcTensor::new(vec![1.0, 0.0], vec![1, 2]);
        assert!(matches!(
            model.fit(&x, &y, &FitOptions::default()),
            Err(Error::NonFiniteLoss {
                epoch: 1,
                batch: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_nan_hidden_weight_stops_training() {
        use crate::nn::Flatten;

        let x = RcTensor::new(vec![1.0, 2.0, -1.0, 0.5], vec![2, 2]);
        let y = RcTensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
        // a NaN feeding relu, then a NaN behind an all-zero relu output
        let hidden_weights = [
            (vec![f64::NAN, 0.1, 0.2, 0.3], vec![0.1, 0.2, 0.3, 0.4]),
            (vec![-1.0, -1.0, -1.0, -1.0], vec![f64::NAN, 0.2, 0.3, 0.4]),
        ];
        for (first, second) in hidden_weights {
            let mut network = Sequential::new();
            network
                .add(Flatten::new())
                .add(Linear::new(
                    RcTensor::parameter(first, vec![2, 2]),
                    RcTensor::parameter(vec![-10.0, -10.0], vec![1, 2]),
                    Activation::Relu,
                ))
                .add(Linear::new(
                    RcTensor::parameter(second, vec![2, 2]),
                    RcTensor::parameter(vec![0.0, 0.0], vec![1, 2]),
                    Activation::Softmax,
                ));
            let mut model = Model::new(network);
            model.compile(
                Loss::CategoricalCrossentropy,
                Box::new(Sgd::<f64>::new(0.1).unwrap()),
            );
            assert!(matches!(
                model.fit(&x, &y, &FitOptions::default()),
                Err(Error::NonFiniteLoss { epoch: 1, .. })
            ));
        }
    }

    #[test]
    fn test_predict_rejects_non_matrix_output() {
        let mut model = Model::<f64>::new(Sequential::new());
        model.compile(
            Loss::MeanSquaredError,
            Box::new(Sgd::<f64>::new(0.1).unwrap()),
        );
        let x = RcTensor::new(vec![1.0, 2.0, 3.0], vec![3]);
        assert!(matches!(model.predict(&x, 2), Err(Error::ShapeMismatch(_))));
        let y = RcTensor::new(vec![1.0, 2.0, 3.0], vec![3]);
        assert!(matches!(
            model.evaluate(&x, &y, 2),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_predict_and_evaluate_leave_params_alone() {
        let mut model = tiny_model();
        model.compile(Loss::CategoricalCrossentropy, Box::new(Sgd::<f64>::new(0.1).unwrap()));
        let x = RcTensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
        let y = RcTensor::new(vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0], vec![3, 2]);
        let before = model.network().params();

        let predictions = model.predict(&x, 2).unwrap();
        assert_eq!(predictions.shape(), &vec![3, 2]);
        for row in predictions.data().chunks(2) {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-12);
        }
        assert!(!predictions.requires_grad());

        let evaluation = model.evaluate(&x, &y, 2).unwrap();
        assert_eq!(evaluation.samples, 3);
        assert!(evaluation.loss > 0.0);
        assert!(before
            .iter()
            .zip(model.network().params())
            .all(|(b, a)| b.data() == a.data() && a.grad().is_none()));
    }

    #[test]
    fn test_fit_lowers_loss() {
        let mut model = tiny_model();
        model.compile(Loss::CategoricalCrossentropy, Box::new(Sgd::<f64>::new(0.5).unwrap()));
        // class 0 when the first feature dominates
        let x = RcTensor::new(vec![2.0, 0.0, 0.0, 2.0, 1.5, 0.5, 0.5, 1.5], vec![4, 2]);
        let y = RcTensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0], vec![4, 2]);
        let options = FitOptions {
            batch_size: 2,
            epochs: 20,
            shuffle: true,
            seed: Some(3),
        };
        let history = model.fit(&x, &y, &options).unwrap();
        let losses = history.losses();
        assert_eq!(losses.len(), 20);
        assert!(losses[19] < losses[0]);
        assert_eq!(history.last().unwrap().accuracy, 1.0);
    }
}
