pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

use crate::error::{Error, Result};
use crate::tensor::{Numeric, RcTensor, TensorList};

/// Turns parameters holding gradients into fresh leaves one step further
/// down the loss surface.
pub trait Optimizer<T: Numeric> {
    /// `params` must come in the same order on every call, optimizer state is
    /// kept per position.
    fn step(&mut self, params: TensorList<T>) -> Result<TensorList<T>>;

    fn name(&self) -> &'static str;

    fn learning_rate(&self) -> f64;
}

/// Builds an optimizer from its Keras name with default hyper-parameters,
/// `learning_rate` overriding the default when given.
pub fn from_name<T: Numeric>(
    name: &str,
    learning_rate: Option<f64>,
) -> Result<Box<dyn Optimizer<T>>> {
    let optimizer: Box<dyn Optimizer<T>> = match name.to_ascii_lowercase().as_str() {
        "sgd" => Box::new(Sgd::<T>::new(learning_rate.unwrap_or(sgd::DEFAULT_LEARNING_RATE))?),
        "adam" => Box::new(Adam::<T>::new(
            learning_rate.unwrap_or(adam::DEFAULT_LEARNING_RATE),
        )?),
        _ => return Err(Error::UnknownOptimizer(name.to_string())),
    };
    Ok(optimizer)
}

fn check_learning_rate(learning_rate: f64) -> Result<()> {
    if learning_rate.is_finite() && learning_rate > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!(
            "learning rate must be positive, got {learning_rate}"
        )))
    }
}

/// Lazily sized per-parameter buffers, e.g. momentum or moment estimates.
#[derive(Debug)]
struct SlotState<T> {
    slots: Vec<Vec<T>>,
}

impl<T: Numeric> SlotState<T> {
    fn prepare(&mut self, params: &TensorList<T>) -> Result<()> {
        if self.slots.is_empty() {
            self.slots = params.iter().map(|p| vec![T::zero(); p.count()]).collect();
            return Ok(());
        }
        let same_layout = self.slots.len() == params.len()
            && self
                .slots
                .iter()
                .zip(params.iter())
                .all(|(slot, p)| slot.len() == p.count());
        if same_layout {
            Ok(())
        } else {
            Err(Error::ShapeMismatch(
                "optimizer got a different parameter layout than on its first step".to_string(),
            ))
        }
    }
}

/// The gradient of `param`, or zeros when nothing flowed into it.
fn grad_of<T: Numeric>(param: &RcTensor<T>) -> Vec<T> {
    match param.grad() {
        Some(grad) => grad.data().to_vec(),
        None => vec![T::zero(); param.count()],
    }
}

#[test]
fn test_from_name() {
    let sgd = from_name::<f32>("sgd", None).unwrap();
    assert_eq!(sgd.name(), "sgd");
    assert_eq!(sgd.learning_rate(), 0.01);
    let adam = from_name::<f32>("Adam", Some(0.5)).unwrap();
    assert_eq!(adam.name(), "adam");
    assert_eq!(adam.learning_rate(), 0.5);
    assert!(matches!(
        from_name::<f32>("rmsprop", None),
        Err(Error::UnknownOptimizer(_))
    ));
    assert!(matches!(
        from_name::<f32>("sgd", Some(-1.0)),
        Err(Error::InvalidOption(_))
    ));
}
