use crate::error::Result;
use crate::optim::{check_learning_rate, grad_of, Optimizer, SlotState};
use crate::tensor::{Numeric, RcTensor, TensorList};

pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Adam with Keras defaults and bias correction folded into the step size.
#[derive(Debug)]
pub struct Adam<T: Numeric> {
    learning_rate: f64,
    beta_1: f64,
    beta_2: f64,
    epsilon: f64,
    iterations: i32,
    first_moment: SlotState<T>,
    second_moment: SlotState<T>,
}

impl<T: Numeric> Adam<T> {
    pub fn new(learning_rate: f64) -> Result<Self> {
        check_learning_rate(learning_rate)?;
        Ok(Adam {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
            iterations: 0,
            first_moment: SlotState { slots: vec![] },
            second_moment: SlotState { slots: vec![] },
        })
    }

    pub fn with_betas(mut self, beta_1: f64, beta_2: f64) -> Self {
        self.beta_1 = beta_1;
        self.beta_2 = beta_2;
        self
    }
}

impl<T: Numeric> Optimizer<T> for Adam<T> {
    fn step(&mut self, params: TensorList<T>) -> Result<TensorList<T>> {
        self.first_moment.prepare(&params)?;
        self.second_moment.prepare(&params)?;
        self.iterations += 1;

        let step_size = self.learning_rate * (1.0 - self.beta_2.powi(self.iterations)).sqrt()
            / (1.0 - self.beta_1.powi(self.iterations));
        let step_size = T::from_f64_lossy(step_size);
        let (beta_1, beta_2) = (
            T::from_f64_lossy(self.beta_1),
            T::from_f64_lossy(self.beta_2),
        );
        let epsilon = T::from_f64_lossy(self.epsilon);

        let mut updated = Vec::with_capacity(params.len());
        for ((p, m), v) in params
            .iter()
            .zip(self.first_moment.slots.iter_mut())
            .zip(self.second_moment.slots.iter_mut())
        {
            let grad = grad_of(p);
            let array = p
                .data()
                .iter()
                .zip(grad)
                .zip(m.iter_mut().zip(v.iter_mut()))
                .map(|((&w, g), (m, v))| {
                    *m = beta_1 * *m + (T::one() - beta_1) * g;
                    *v = beta_2 * *v + (T::one() - beta_2) * g * g;
                    w - step_size * *m / (v.sqrt() + epsilon)
                })
                .collect();
            updated.push(RcTensor::parameter(array, p.shape().clone()));
        }
        Ok(updated)
    }

    fn name(&self) -> &'static str {
        "adam"
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

#[test]
fn test_first_step_moves_by_learning_rate() {
    // with bias correction the first step is lr * g / (|g| + eps)
    let p = RcTensor::<f64>::parameter(vec![1.0, 1.0], vec![2]);
    (&p * &RcTensor::from([3.0, -0.5])).sum().backward().unwrap();
    let mut adam = Adam::new(0.1).unwrap();
    let updated = adam.step(vec![p]).unwrap();
    assert!((updated[0].data()[0] - 0.9).abs() < 1e-6);
    assert!((updated[0].data()[1] - 1.1).abs() < 1e-6);
}

#[test]
fn test_minimises_quadratic() {
    let mut adam = Adam::new(0.1).unwrap();
    let mut params = vec![RcTensor::<f64>::parameter(vec![3.0, -2.0], vec![2])];
    for _ in 0..300 {
        let p = &params[0];
        (p * p).sum().backward().unwrap();
        params = adam.step(params).unwrap();
    }
    assert!(params[0].data().iter().all(|w| w.abs() < 0.05));
}
