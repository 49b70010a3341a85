use std::cell::RefCell;
use std::cmp::PartialEq;
use std::convert::From;
use std::fmt;
use std::ops::Index;

use super::autograd::Derivative;
use super::numeric::*;
use super::rc_tensor::*;
use super::utils::global_index;
use crate::error::{Error, Result};

/// The core `struct` in this library: a row-major buffer plus its shape.
#[derive(Clone)]
pub struct RawTensor<T>
where
    T: Numeric,
{
    pub(in crate::tensor) array: Vec<T>,
    pub(in crate::tensor) shape: Vec<usize>,
    pub(in crate::tensor) grad: RefCell<Option<RcTensor<T>>>,
    pub(in crate::tensor) grad_fn: Option<Derivative<T>>,
    pub(in crate::tensor) requires_grad: bool,
}

impl<T: Numeric> PartialEq for RawTensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.array == other.array
    }
}

impl<T: Numeric> fmt::Debug for RawTensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawTensor")
            .field("shape", &self.shape)
            .field("array", &self.array)
            .field("requires_grad", &self.requires_grad)
            .field("grad_fn", &self.grad_fn)
            .finish()
    }
}

impl<T> Default for RawTensor<T>
where
    T: Numeric,
{
    fn default() -> Self {
        RawTensor {
            array: vec![],
            shape: vec![],
            grad: RefCell::new(None),
            grad_fn: None,
            requires_grad: false,
        }
    }
}

impl<T, U> From<Vec<U>> for RawTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
{
    fn from(value: Vec<U>) -> RawTensor<T> {
        let tensors: Vec<_> = value.into_iter().map(RawTensor::from).collect();
        let (arrays, shapes): (Vec<_>, Vec<_>) =
            tensors.into_iter().map(|t| (t.array, t.shape)).unzip();
        assert!(
            shapes.iter().all(|shape| *shape == shapes[0]),
            "ragged nested input: {shapes:?}"
        );

        let array = arrays.into_iter().flatten().collect();
        let mut shape = vec![shapes.len()];
        if let Some(inner) = shapes.first() {
            shape.extend_from_slice(inner);
        }
        RawTensor {
            array,
            shape,
            ..Default::default()
        }
    }
}

impl<T, U, const N: usize> From<[U; N]> for RawTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
    U: Clone,
{
    fn from(value: [U; N]) -> RawTensor<T> {
        <RawTensor<T> as From<Vec<U>>>::from(value.to_vec())
    }
}

impl<T> From<T> for RawTensor<T>
where
    T: Numeric,
{
    fn from(value: T) -> Self {
        RawTensor::scalar(value)
    }
}

impl<T> RawTensor<T>
where
    T: Numeric,
{
    pub fn new(array: Vec<T>, shape: Vec<usize>) -> RawTensor<T> {
        assert_eq!(
            shape.iter().product::<usize>(),
            array.len(),
            "shape {shape:?} does not fit {} elements",
            array.len()
        );
        RawTensor {
            array,
            shape,
            ..Default::default()
        }
    }

    pub fn try_new(array: Vec<T>, shape: Vec<usize>) -> Result<RawTensor<T>> {
        let count = shape.iter().product::<usize>();
        if count != array.len() {
            return Err(Error::ShapeMismatch(format!(
                "shape {shape:?} holds {count} elements but {} were given",
                array.len()
            )));
        }
        Ok(RawTensor {
            array,
            shape,
            ..Default::default()
        })
    }

    /// Note! An empty shape builds a scalar.
    pub fn new_with_filler(shape: Vec<usize>, filler: T) -> RawTensor<T> {
        let total = shape.iter().product::<usize>();
        RawTensor {
            array: vec![filler; total],
            shape,
            ..Default::default()
        }
    }

    pub fn scalar(scalar: T) -> RawTensor<T> {
        RawTensor {
            array: vec![scalar],
            shape: vec![],
            ..Default::default()
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.array.len() == 1 && self.shape.is_empty()
    }

    pub fn shape(&self) -> &Vec<usize> {
        &self.shape
    }

    pub fn count(&self) -> usize {
        self.array.len()
    }

    pub fn data(&self) -> &[T] {
        &self.array
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// ```
    /// # use mnist_light::tensor::*;
    /// let matrix = RcTensor::new(vec![0.0, 1.0, 2.0, 3.0], vec![2, 2]);
    ///
    /// assert_eq!(matrix.get(&[0, 1]).unwrap(), &1.0);
    /// assert_eq!(matrix.get(&[0, 1]).unwrap(), matrix.get(&[4, 0, 1]).unwrap());
    /// assert!(matrix.get(&[2, 0]).is_err());
    /// ```
    pub fn get(&self, index: &[usize]) -> Result<&T> {
        global_index(index, &self.shape)
            .map(|global_idx| &self.array[global_idx])
            .ok_or_else(|| Error::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.shape.clone(),
            })
    }

    /// The single value of a one element tensor.
    pub fn elem(&self) -> T {
        assert_eq!(
            self.array.len(),
            1,
            "elem() on a tensor of shape {:?}",
            self.shape
        );
        self.array[0]
    }

    /// Index of the largest entry of every row of a `[rows, cols]` tensor.
    pub fn argmax_rows(&self) -> Vec<usize> {
        let cols = self.shape.last().copied().unwrap_or(1);
        if cols == 0 {
            return vec![];
        }
        self.array
            .chunks(cols)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, T::neg_infinity()), |best, (i, &v)| {
                        if v > best.1 {
                            (i, v)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }

    pub(in crate::tensor) fn update_grad(&self, grad: RcTensor<T>) {
        let mut slot = self.grad.borrow_mut();
        let accumulated = match slot.take() {
            Some(existing) => {
                let array = existing
                    .array
                    .iter()
                    .zip(grad.array.iter())
                    .map(|(&a, &b)| a + b)
                    .collect();
                RcTensor::new(array, existing.shape.clone())
            }
            None => grad,
        };
        *slot = Some(accumulated);
    }
}

impl<T> Index<&Vec<usize>> for RawTensor<T>
where
    T: Numeric,
{
    type Output = T;

    fn index(&self, index: &Vec<usize>) -> &Self::Output {
        match self.get(index) {
            Ok(v) => v,
            Err(e) => panic!("{}", e),
        }
    }
}

#[test]
fn test_from_nested_arrays() {
    let tensor = RawTensor::<f64>::from([[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]);
    assert_eq!(tensor.shape(), &vec![2, 3]);
    assert_eq!(tensor[&vec![1, 2]], 5.0);
}

#[test]
fn test_try_new_rejects_bad_shape() {
    assert!(RawTensor::try_new(vec![1.0f32; 5], vec![2, 3]).is_err());
    assert!(RawTensor::try_new(vec![1.0f32; 6], vec![2, 3]).is_ok());
}

#[test]
fn test_argmax_rows() {
    let tensor = RawTensor::<f64>::from([[0.1, 0.7, 0.2], [0.9, 0.05, 0.05]]);
    assert_eq!(tensor.argmax_rows(), vec![1, 0]);
}
