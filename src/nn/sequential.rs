use std::fmt;

use crate::error::Result;
use crate::nn::Module;
use crate::tensor::{Numeric, RcTensor, TensorList};

/// Layers applied one after another, Keras `Sequential` style.
pub struct Sequential<T>
where
    T: Numeric,
{
    layers: Vec<Box<dyn Module<T>>>,
}

impl<T: Numeric> Default for Sequential<T> {
    fn default() -> Self {
        Sequential { layers: vec![] }
    }
}

impl<T: Numeric> Sequential<T> {
    pub fn new() -> Self {
        Sequential::default()
    }

    pub fn add<M>(&mut self, layer: M) -> &mut Self
    where
        M: Module<T> + 'static,
    {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Per layer description, output shape and parameter count for a batch of
    /// shape `input_shape`, followed by the total.
    pub fn summary(&self, input_shape: &[usize]) -> Result<String> {
        let mut lines = Vec::with_capacity(self.layers.len() + 1);
        let mut shape = input_shape.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            shape = layer.output_shape(&shape)?;
            lines.push(format!(
                "{i:>2}  {:<40} output={:<12} params={}",
                layer.describe(),
                format!("{shape:?}"),
                layer.param_count()
            ));
        }
        lines.push(format!("total params: {}", self.param_count()));
        Ok(lines.join("\n"))
    }
}

impl<T: Numeric> fmt::Debug for Sequential<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|layer| layer.describe()))
            .finish()
    }
}

impl<T: Numeric> crate::nn::module::private::Private for Sequential<T> {}

impl<T: Numeric> Module<T> for Sequential<T> {
    fn forward(&self, batch: RcTensor<T>) -> RcTensor<T> {
        self.layers
            .iter()
            .fold(batch, |prev, layer| layer.forward(prev))
    }

    fn params(&self) -> TensorList<T> {
        self.layers
            .iter()
            .flat_map(|layer| layer.params())
            .collect()
    }

    fn update_params(&mut self, mut new_params: TensorList<T>) {
        for layer in self.layers.iter_mut().rev() {
            let count = layer.params().len();
            assert!(count <= new_params.len(), "not enough parameters");
            let tail = new_params.split_off(new_params.len() - count);
            layer.update_params(tail);
        }
        assert!(new_params.is_empty(), "too many parameters");
    }

    fn describe(&self) -> String {
        format!("Sequential({} layers)", self.layers.len())
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        self.layers
            .iter()
            .try_fold(input.to_vec(), |shape, layer| layer.output_shape(&shape))
    }
}

#[cfg(test)]
fn two_layer_mlp() -> Sequential<f64> {
    use crate::nn::{Activation, Linear};

    let mut mlp = Sequential::new();
    mlp.add(Linear::new(
        RcTensor::parameter(vec![1.0, 1e-2, -1e-3, -2.0, -1.1, 0., 0., 0.7], vec![2, 4]),
        RcTensor::parameter(vec![1.0; 4], vec![1, 4]),
        Activation::Tanh,
    ))
    .add(Linear::new(
        RcTensor::parameter(vec![1.0, -2.0, -1.1, 0.7, 0.1, -0.2, 0.1, 0.0], vec![4, 2]),
        RcTensor::parameter(vec![1.0; 2], vec![1, 2]),
        Activation::Tanh,
    ));
    mlp
}

#[test]
fn test_mlp_creation() {
    let mlp = two_layer_mlp();
    assert_eq!(mlp.len(), 2);
    assert_eq!(mlp.params().len(), 4);
    assert_eq!(mlp.param_count(), 8 + 4 + 8 + 2);
    assert_eq!(mlp.output_shape(&[3, 2]).unwrap(), vec![3, 2]);
}

#[test]
fn test_mlp() {
    let mut mlp = two_layer_mlp();
    let input = RcTensor::new(vec![1.0, 2.0], vec![1, 2]);
    let expected = RcTensor::new(vec![-1.0, 1.0], vec![1, 2]);
    let step_size = RcTensor::scalar(5e-2);
    let squared_error = |mlp: &Sequential<f64>| {
        let diff = &mlp.forward(input.clone()) - &expected;
        (&diff * &diff).sum()
    };
    let initial = squared_error(&mlp).elem();

    for _ in 0..100 {
        squared_error(&mlp).backward().unwrap();
        let new_params = mlp
            .params()
            .iter()
            .map(|p| {
                let grad = p.grad().unwrap();
                let stepped = p - &(&step_size * &grad);
                RcTensor::parameter(stepped.data().to_vec(), p.shape().clone())
            })
            .collect();
        mlp.update_params(new_params);
    }
    let loss = squared_error(&mlp);
    assert!(loss.elem() < initial / 4.0, "initial={initial}, loss={loss}");
}

#[test]
fn test_update_params_keeps_order() {
    let mut mlp = two_layer_mlp();
    let replaced: TensorList<f64> = mlp
        .params()
        .iter()
        .map(|p| RcTensor::parameter(vec![0.5; p.count()], p.shape().clone()))
        .collect();
    mlp.update_params(replaced);
    for (p, shape) in mlp
        .params()
        .iter()
        .zip([vec![2, 4], vec![1, 4], vec![4, 2], vec![1, 2]])
    {
        assert_eq!(p.shape(), &shape);
        assert!(p.data().iter().all(|&v| v == 0.5));
    }
}

#[test]
fn test_summary() {
    let mlp = two_layer_mlp();
    let summary = mlp.summary(&[1, 2]).unwrap();
    assert!(summary.contains("Dense(2 -> 4, activation=tanh)"));
    assert!(summary.ends_with("total params: 22"));
    assert!(mlp.summary(&[1, 3]).is_err());
}
