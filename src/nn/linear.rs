use rand::Rng;

use crate::error::{Error, Result};
use crate::nn::{init, Activation, Module};
use crate::tensor::{Numeric, RcTensor, TensorList};

/// Fully connected layer: `activation(x · weights + bias)`.
#[derive(Debug)]
pub struct Linear<T>
where
    T: Numeric,
{
    pub weights: RcTensor<T>,
    pub bias: RcTensor<T>,
    activation: Activation,
}

impl<T> Linear<T>
where
    T: Numeric,
{
    /// `weights` is `[in, out]` and `bias` is `[1, out]`.
    pub fn new(weights: RcTensor<T>, bias: RcTensor<T>, activation: Activation) -> Self {
        assert_eq!(weights.shape().len(), 2, "weights must be [in, out]");
        assert_eq!(
            bias.shape(),
            &vec![1, weights.shape()[1]],
            "bias must be [1, out]"
        );
        Linear {
            weights,
            bias,
            activation,
        }
    }

    /// Keras style `Dense(units)`: Glorot uniform weights, zero bias.
    pub fn dense<R: Rng + ?Sized>(
        input_dim: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        Linear::new(
            init::glorot_uniform(input_dim, units, rng),
            init::zeros(vec![1, units]),
            activation,
        )
    }

    pub fn input_dim(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn units(&self) -> usize {
        self.weights.shape()[1]
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl<T: Numeric> crate::nn::module::private::Private for Linear<T> {}

impl<T: Numeric> Module<T> for Linear<T> {
    fn forward(&self, batch: RcTensor<T>) -> RcTensor<T> {
        let y = batch.matmul(&self.weights);
        self.activation.apply(&(&y + &self.bias))
    }

    fn params(&self) -> TensorList<T> {
        vec![self.weights.clone(), self.bias.clone()]
    }

    fn update_params(&mut self, mut new_params: TensorList<T>) {
        assert_eq!(new_params.len(), 2, "linear layer takes weights and bias");
        self.bias = new_params.remove(1);
        self.weights = new_params.remove(0);
    }

    fn describe(&self) -> String {
        format!(
            "Dense({} -> {}, activation={})",
            self.input_dim(),
            self.units(),
            self.activation
        )
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [batch, features] if *features == self.input_dim() => Ok(vec![*batch, self.units()]),
            _ => Err(Error::ShapeMismatch(format!(
                "dense layer expects [batch, {}], got {input:?}",
                self.input_dim()
            ))),
        }
    }
}

#[test]
fn test_layer_no_grad() {
    let layer = Linear::new(
        RcTensor::<f64>::new_with_filler(vec![2, 2], 1.0),
        RcTensor::new_with_filler(vec![1, 2], 1.0),
        Activation::Linear,
    );
    let input = RcTensor::new(vec![1.0, 2.0], vec![1, 2]);
    let res = layer.forward(input);
    let expected = RcTensor::new(vec![4.0, 4.0], vec![1, 2]);

    assert_eq!(res, expected);
}

#[test]
fn test_layer_grads() {
    let layer = Linear::new(
        RcTensor::<f64>::parameter(vec![1.0, -2.0, -1.1, 0.7], vec![2, 2]),
        RcTensor::parameter(vec![1.0, 1.0], vec![1, 2]),
        Activation::Linear,
    );
    let input = RcTensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    layer.forward(input.clone()).sum().backward().unwrap();
    // d sum(xW + b) / dW[i][j] = sum over rows of x[r][i]
    assert_eq!(
        layer.weights.grad().unwrap(),
        RcTensor::from([[4.0, 4.0], [6.0, 6.0]])
    );
    assert_eq!(layer.bias.grad().unwrap(), RcTensor::from([[2.0, 2.0]]));
    assert!(input.grad().is_none());
}

#[test]
fn test_dense_shapes() {
    use rand::SeedableRng;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let layer = Linear::<f32>::dense(784, 512, Activation::Relu, &mut rng);
    assert_eq!(layer.param_count(), 784 * 512 + 512);
    assert_eq!(layer.output_shape(&[128, 784]).unwrap(), vec![128, 512]);
    assert!(layer.output_shape(&[128, 28, 28]).is_err());
    assert!(layer.bias.data().iter().all(|&b| b == 0.0));
}
