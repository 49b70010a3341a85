pub mod batcher;
pub mod mnist;

pub use batcher::{batch_order, Batch, Batcher};
pub use mnist::{load_data, Mnist, MnistSplit};

use crate::error::{Error, Result};
use crate::tensor::{Numeric, RcTensor};

/// Keras style `to_categorical`: row `i` holds a single one at `labels[i]`.
pub fn to_categorical<T: Numeric>(labels: &[u8], num_classes: usize) -> Result<Vec<T>> {
    let mut encoded = vec![T::zero(); labels.len() * num_classes];
    for (position, &label) in labels.iter().enumerate() {
        let label = label as usize;
        if label >= num_classes {
            return Err(Error::LabelOutOfRange {
                label,
                position,
                num_classes,
            });
        }
        encoded[position * num_classes + label] = T::one();
    }
    Ok(encoded)
}

/// [`to_categorical`] as a `[labels.len(), num_classes]` tensor.
pub fn one_hot<T: Numeric>(labels: &[u8], num_classes: usize) -> Result<RcTensor<T>> {
    let encoded = to_categorical(labels, num_classes)?;
    RcTensor::try_new(encoded, vec![labels.len(), num_classes])
}

#[test]
fn test_to_categorical() {
    let encoded = to_categorical::<f32>(&[5, 0, 9], 10).unwrap();
    assert_eq!(encoded.len(), 30);
    assert_eq!(encoded[5], 1.0);
    assert_eq!(encoded[10], 1.0);
    assert_eq!(encoded[29], 1.0);
    assert_eq!(encoded.iter().sum::<f32>(), 3.0);
}

#[test]
fn test_to_categorical_rejects_large_label() {
    assert!(matches!(
        to_categorical::<f32>(&[1, 10], 10),
        Err(Error::LabelOutOfRange {
            label: 10,
            position: 1,
            num_classes: 10
        })
    ));
}

#[test]
fn test_one_hot_shape() {
    let targets = one_hot::<f64>(&[2, 1], 3).unwrap();
    assert_eq!(targets, RcTensor::from([[0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]));
    assert_eq!(targets.argmax_rows(), vec![2, 1]);
}
