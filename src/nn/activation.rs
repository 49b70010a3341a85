use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::tensor::{Numeric, RcTensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Softmax,
    Tanh,
    Sigmoid,
    #[default]
    Linear,
}

impl Activation {
    pub fn apply<T: Numeric>(&self, tensor: &RcTensor<T>) -> RcTensor<T> {
        match self {
            Activation::Relu => tensor.relu(),
            Activation::Softmax => tensor.softmax(),
            Activation::Tanh => tensor.tanh(),
            Activation::Sigmoid => tensor.sigmoid(),
            Activation::Linear => tensor.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Softmax => "softmax",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
            Activation::Linear => "linear",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "softmax" => Ok(Activation::Softmax),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "linear" | "none" => Ok(Activation::Linear),
            _ => Err(Error::UnknownActivation(name.to_string())),
        }
    }
}

#[test]
fn test_parse_activation() {
    assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
    assert_eq!("Softmax".parse::<Activation>().unwrap(), Activation::Softmax);
    assert!(matches!(
        "swish".parse::<Activation>(),
        Err(Error::UnknownActivation(name)) if name == "swish"
    ));
}

#[test]
fn test_linear_is_identity() {
    let x = RcTensor::<f64>::from([[-1.0, 2.0]]);
    assert_eq!(Activation::Linear.apply(&x), x);
    assert_eq!(Activation::Relu.apply(&x), RcTensor::from([[0.0, 2.0]]));
}
