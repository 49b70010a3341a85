use crate::error::{Error, Result};
use crate::nn::Module;
use crate::tensor::{Numeric, RcTensor, TensorList};

/// Collapses every axis after the batch axis: `[n, d1, d2, ..] -> [n, d1 * d2 * ..]`.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Flatten::default()
    }

    /// Pins the per-sample shape, so mismatched batches are reported by
    /// `output_shape`.
    pub fn with_input_shape(input_shape: Vec<usize>) -> Self {
        Flatten {
            input_shape: Some(input_shape),
        }
    }
}

impl crate::nn::module::private::Private for Flatten {}

impl<T: Numeric> Module<T> for Flatten {
    fn forward(&self, batch: RcTensor<T>) -> RcTensor<T> {
        let rows = batch.shape().first().copied().unwrap_or(1);
        let features = batch.count() / rows.max(1);
        if batch.shape() == &vec![rows, features] {
            return batch;
        }
        batch.reshape(vec![rows, features])
    }

    fn params(&self) -> TensorList<T> {
        vec![]
    }

    fn update_params(&mut self, new_params: TensorList<T>) {
        assert!(new_params.is_empty(), "flatten has no parameters");
    }

    fn describe(&self) -> String {
        match &self.input_shape {
            Some(shape) => format!("Flatten(input_shape={shape:?})"),
            None => "Flatten".to_string(),
        }
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (batch, sample) = input.split_first().ok_or_else(|| {
            Error::ShapeMismatch("flatten needs at least a batch axis".to_string())
        })?;
        if let Some(expected) = &self.input_shape {
            if expected.as_slice() != sample {
                return Err(Error::ShapeMismatch(format!(
                    "flatten expects samples of shape {expected:?}, got {sample:?}"
                )));
            }
        }
        Ok(vec![*batch, sample.iter().product()])
    }
}

#[test]
fn test_flatten_forward() {
    let images = RcTensor::<f64>::new((0..24).map(|x| x as f64).collect(), vec![2, 3, 4]);
    let flat = Module::forward(&Flatten::new(), images);
    assert_eq!(flat.shape(), &vec![2, 12]);
    assert_eq!(flat.data()[13], 13.0);
}

#[test]
fn test_flatten_shape_checks() {
    let flatten = Flatten::with_input_shape(vec![28, 28]);
    assert_eq!(
        Module::<f32>::output_shape(&flatten, &[5, 28, 28]).unwrap(),
        vec![5, 784]
    );
    assert!(Module::<f32>::output_shape(&flatten, &[5, 27, 28]).is_err());
}

#[test]
fn test_flatten_passes_grad_through() {
    let images = RcTensor::<f64>::parameter(vec![1.0; 8], vec![2, 2, 2]);
    Module::forward(&Flatten::new(), images.clone())
        .sum()
        .backward()
        .unwrap();
    assert_eq!(images.grad().unwrap().shape(), &vec![2, 2, 2]);
}
