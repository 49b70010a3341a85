use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tensor::functional;
use crate::tensor::{Numeric, RcTensor, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Expects one-hot targets and probability rows.
    #[default]
    CategoricalCrossentropy,
    MeanSquaredError,
}

impl Loss {
    /// Scalar loss averaged over the batch.
    pub fn compute<T: Numeric>(
        &self,
        predictions: &RcTensor<T>,
        targets: &RcTensor<T>,
    ) -> Result<Scalar<T>> {
        if predictions.shape() != targets.shape() {
            return Err(Error::ShapeMismatch(format!(
                "{self}: predictions {:?} vs targets {:?}",
                predictions.shape(),
                targets.shape()
            )));
        }
        Ok(match self {
            Loss::CategoricalCrossentropy => {
                functional::categorical_crossentropy(predictions, targets)
            }
            Loss::MeanSquaredError => {
                let diff = predictions - targets;
                (&diff * &diff).mean()
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Loss::CategoricalCrossentropy => "categorical_crossentropy",
            Loss::MeanSquaredError => "mean_squared_error",
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Loss {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "categorical_crossentropy" => Ok(Loss::CategoricalCrossentropy),
            "mean_squared_error" | "mse" => Ok(Loss::MeanSquaredError),
            _ => Err(Error::UnknownLoss(name.to_string())),
        }
    }
}

#[test]
fn test_parse_loss() {
    assert_eq!(
        "categorical_crossentropy".parse::<Loss>().unwrap(),
        Loss::CategoricalCrossentropy
    );
    assert_eq!("mse".parse::<Loss>().unwrap(), Loss::MeanSquaredError);
    assert!("hinge".parse::<Loss>().is_err());
}

#[test]
fn test_mse() {
    let predictions = RcTensor::<f64>::from([[1.0, 2.0], [3.0, 4.0]]);
    let targets = RcTensor::<f64>::from([[1.0, 0.0], [3.0, 2.0]]);
    let loss = Loss::MeanSquaredError.compute(&predictions, &targets).unwrap();
    assert_eq!(loss.elem(), 2.0);
}

#[test]
fn test_shape_mismatch() {
    let predictions = RcTensor::<f64>::zeros(vec![2, 10]);
    let targets = RcTensor::<f64>::zeros(vec![2, 9]);
    assert!(matches!(
        Loss::CategoricalCrossentropy.compute(&predictions, &targets),
        Err(Error::ShapeMismatch(_))
    ));
}
