use crate::error::Result;
use crate::optim::{check_learning_rate, grad_of, Optimizer, SlotState};
use crate::tensor::{Numeric, RcTensor, TensorList};

pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// Stochastic gradient descent, optionally with (Nesterov) momentum:
///
/// ```text
/// velocity = momentum * velocity - lr * grad
/// w = w + velocity                              (plain)
/// w = w + momentum * velocity - lr * grad       (nesterov)
/// ```
#[derive(Debug)]
pub struct Sgd<T: Numeric> {
    learning_rate: f64,
    momentum: f64,
    nesterov: bool,
    velocity: SlotState<T>,
}

impl<T: Numeric> Sgd<T> {
    pub fn new(learning_rate: f64) -> Result<Self> {
        check_learning_rate(learning_rate)?;
        Ok(Sgd {
            learning_rate,
            momentum: 0.0,
            nesterov: false,
            velocity: SlotState { slots: vec![] },
        })
    }

    pub fn with_momentum(mut self, momentum: f64, nesterov: bool) -> Self {
        self.momentum = momentum;
        self.nesterov = nesterov;
        self
    }
}

impl<T: Numeric> Optimizer<T> for Sgd<T> {
    fn step(&mut self, params: TensorList<T>) -> Result<TensorList<T>> {
        let lr = T::from_f64_lossy(self.learning_rate);
        if self.momentum == 0.0 {
            return Ok(params
                .iter()
                .map(|p| {
                    let array = p
                        .data()
                        .iter()
                        .zip(grad_of(p))
                        .map(|(&w, g)| w - lr * g)
                        .collect();
                    RcTensor::parameter(array, p.shape().clone())
                })
                .collect());
        }

        let momentum = T::from_f64_lossy(self.momentum);
        self.velocity.prepare(&params)?;
        let mut updated = Vec::with_capacity(params.len());
        for (p, velocity) in params.iter().zip(self.velocity.slots.iter_mut()) {
            let grad = grad_of(p);
            let mut array = Vec::with_capacity(p.count());
            for ((&w, g), v) in p.data().iter().zip(grad).zip(velocity.iter_mut()) {
                *v = momentum * *v - lr * g;
                array.push(if self.nesterov {
                    w + momentum * *v - lr * g
                } else {
                    w + *v
                });
            }
            updated.push(RcTensor::parameter(array, p.shape().clone()));
        }
        Ok(updated)
    }

    fn name(&self) -> &'static str {
        "sgd"
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

#[cfg(test)]
fn param_with_grad(values: Vec<f64>, grad_scale: f64) -> RcTensor<f64> {
    // d sum(scale * p) / dp = scale
    let len = values.len();
    let p = RcTensor::parameter(values, vec![len]);
    (&p * &RcTensor::scalar(grad_scale)).sum().backward().unwrap();
    p
}

#[test]
fn test_plain_step() {
    let mut sgd = Sgd::new(0.1).unwrap();
    let p = param_with_grad(vec![1.0, -1.0], 2.0);
    let updated = sgd.step(vec![p]).unwrap();
    assert_eq!(updated[0], RcTensor::from([0.8, -1.2]));
    assert!(updated[0].requires_grad());
    assert!(updated[0].grad().is_none());
}

#[test]
fn test_momentum_accumulates() {
    let mut sgd = Sgd::new(0.1).unwrap().with_momentum(0.5, false);
    let first = sgd.step(vec![param_with_grad(vec![1.0], 1.0)]).unwrap();
    // v = -0.1, w = 0.9
    assert!((first[0].data()[0] - 0.9).abs() < 1e-12);
    let second = sgd
        .step(vec![param_with_grad(first[0].data().to_vec(), 1.0)])
        .unwrap();
    // v = 0.5 * -0.1 - 0.1 = -0.15, w = 0.75
    assert!((second[0].data()[0] - 0.75).abs() < 1e-12);
}

#[test]
fn test_nesterov() {
    let mut sgd = Sgd::new(0.1).unwrap().with_momentum(0.5, true);
    let first = sgd.step(vec![param_with_grad(vec![1.0], 1.0)]).unwrap();
    // v = -0.1, w = 1 + 0.5 * -0.1 - 0.1 = 0.85
    assert!((first[0].data()[0] - 0.85).abs() < 1e-12);
}

#[test]
fn test_layout_change_is_an_error() {
    let mut sgd = Sgd::new(0.1).unwrap().with_momentum(0.9, false);
    sgd.step(vec![param_with_grad(vec![1.0], 1.0)]).unwrap();
    assert!(sgd
        .step(vec![param_with_grad(vec![1.0, 2.0], 1.0)])
        .is_err());
}
