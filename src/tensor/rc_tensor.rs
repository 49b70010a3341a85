use std::cmp::PartialEq;
use std::convert::From;
use std::fmt;
use std::ops::{Add, Deref, Mul, Neg, Sub};
use std::rc::Rc;

use super::autograd;
use super::functional;
use super::numeric::*;
use super::raw_tensor::*;
use crate::error::Result;

/// Shared handle to a [`RawTensor`]. Cloning is cheap and keeps the autograd
/// graph reachable, so ops take and return `RcTensor`s.
#[derive(Debug, PartialEq, Clone)]
pub struct RcTensor<T: Numeric>(pub(in crate::tensor) Rc<RawTensor<T>>);

impl<T> Deref for RcTensor<T>
where
    T: Numeric,
{
    type Target = RawTensor<T>;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl<T: Numeric> RcTensor<T> {
    pub(in crate::tensor) fn from_raw(raw_tensor: RawTensor<T>) -> RcTensor<T> {
        RcTensor(Rc::new(raw_tensor))
    }

    pub fn new(array: Vec<T>, shape: Vec<usize>) -> RcTensor<T> {
        RcTensor::from_raw(RawTensor::new(array, shape))
    }

    pub fn try_new(array: Vec<T>, shape: Vec<usize>) -> Result<RcTensor<T>> {
        RawTensor::try_new(array, shape).map(RcTensor::from_raw)
    }

    pub fn new_with_filler(shape: Vec<usize>, filler: T) -> RcTensor<T> {
        RcTensor::from_raw(RawTensor::new_with_filler(shape, filler))
    }

    pub fn zeros(shape: Vec<usize>) -> RcTensor<T> {
        RcTensor::new_with_filler(shape, T::zero())
    }

    pub fn scalar(scalar: T) -> RcTensor<T> {
        RcTensor::from_raw(RawTensor::scalar(scalar))
    }

    /// A leaf that collects gradients during [`RcTensor::backward`].
    pub fn parameter(array: Vec<T>, shape: Vec<usize>) -> RcTensor<T> {
        let mut raw_tensor = RawTensor::new(array, shape);
        raw_tensor.requires_grad = true;
        RcTensor::from_raw(raw_tensor)
    }

    /// Same values, cut loose from the graph that produced them.
    pub fn detach(&self) -> RcTensor<T> {
        RcTensor::new(self.array.clone(), self.shape.clone())
    }

    /// Copy of the accumulated gradient, if any was computed.
    pub fn grad(&self) -> Option<RcTensor<T>> {
        self.0.grad.borrow().clone()
    }

    pub fn zero_grad(&self) {
        *self.0.grad.borrow_mut() = None;
    }

    pub fn backward(&self) -> Result<()> {
        autograd::backward(self)
    }

    pub fn matmul(&self, right: &RcTensor<T>) -> RcTensor<T> {
        functional::matmul(self, right)
    }

    pub fn sum(&self) -> RcTensor<T> {
        functional::sum(self)
    }

    pub fn mean(&self) -> RcTensor<T> {
        functional::mean(self)
    }

    pub fn reshape(&self, shape: Vec<usize>) -> RcTensor<T> {
        functional::reshape(self, shape)
    }

    pub fn relu(&self) -> RcTensor<T> {
        functional::relu(self)
    }

    pub fn tanh(&self) -> RcTensor<T> {
        functional::tanh(self)
    }

    pub fn sigmoid(&self) -> RcTensor<T> {
        functional::sigmoid(self)
    }

    pub fn softmax(&self) -> RcTensor<T> {
        functional::softmax(self)
    }

    pub fn abs(&self) -> RcTensor<T> {
        functional::abs(self)
    }
}

impl<T: Numeric> fmt::Display for RcTensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        write!(f, "tensor(shape={:?}, [", self.shape)?;
        for (i, v) in self.array.iter().take(PREVIEW).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:.4}")?;
        }
        if self.array.len() > PREVIEW {
            write!(f, ", ...")?;
        }
        write!(f, "])")
    }
}

impl<T> From<T> for RcTensor<T>
where
    T: Numeric,
{
    fn from(value: T) -> Self {
        RcTensor::from_raw(RawTensor::from(value))
    }
}

impl<T, U> From<Vec<U>> for RcTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
{
    fn from(value: Vec<U>) -> RcTensor<T> {
        RcTensor::from_raw(<RawTensor<T> as From<Vec<U>>>::from(value))
    }
}

impl<T, U, const N: usize> From<[U; N]> for RcTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
    U: Clone,
{
    fn from(value: [U; N]) -> RcTensor<T> {
        RcTensor::from_raw(<RawTensor<T> as From<Vec<U>>>::from(value.to_vec()))
    }
}

impl<T: Numeric> Add<&RcTensor<T>> for &RcTensor<T> {
    type Output = RcTensor<T>;

    fn add(self, right: &RcTensor<T>) -> RcTensor<T> {
        functional::add(self, right)
    }
}

impl<T: Numeric> Add<RcTensor<T>> for RcTensor<T> {
    type Output = RcTensor<T>;

    fn add(self, right: RcTensor<T>) -> RcTensor<T> {
        functional::add(&self, &right)
    }
}

impl<T: Numeric> Sub<&RcTensor<T>> for &RcTensor<T> {
    type Output = RcTensor<T>;

    fn sub(self, right: &RcTensor<T>) -> RcTensor<T> {
        functional::sub(self, right)
    }
}

impl<T: Numeric> Sub<RcTensor<T>> for RcTensor<T> {
    type Output = RcTensor<T>;

    fn sub(self, right: RcTensor<T>) -> RcTensor<T> {
        functional::sub(&self, &right)
    }
}

impl<T: Numeric> Mul<&RcTensor<T>> for &RcTensor<T> {
    type Output = RcTensor<T>;

    fn mul(self, right: &RcTensor<T>) -> RcTensor<T> {
        functional::mul(self, right)
    }
}

impl<T: Numeric> Mul<RcTensor<T>> for RcTensor<T> {
    type Output = RcTensor<T>;

    fn mul(self, right: RcTensor<T>) -> RcTensor<T> {
        functional::mul(&self, &right)
    }
}

impl<T: Numeric> Neg for &RcTensor<T> {
    type Output = RcTensor<T>;

    fn neg(self) -> RcTensor<T> {
        functional::mul(self, &RcTensor::scalar(-T::one()))
    }
}

#[test]
fn test_element_wise_multiplication() {
    let left = RcTensor::<f64>::from([1.0, 2.0, 3.0]);
    let right = RcTensor::<f64>::from([7.0, 2.0, 8.0]);
    assert_eq!(&left * &right, RcTensor::from([7.0, 4.0, 24.0]));
    assert_eq!(left * right, RcTensor::from([7.0, 4.0, 24.0]));
}

#[test]
fn test_scalar_multiplication() {
    let tensor = RcTensor::<f64>::new_with_filler(vec![4], 1.0);
    assert_eq!(
        &tensor * &RcTensor::scalar(42.0),
        RcTensor::new(vec![42.0; 4], vec![4])
    );
    assert_eq!(-&tensor, RcTensor::new(vec![-1.0; 4], vec![4]));
}

#[test]
fn test_detach_drops_graph() {
    let x = RcTensor::<f64>::parameter(vec![1.0, 2.0], vec![2]);
    let y = (&x * &x).detach();
    assert!(!y.requires_grad());
    assert_eq!(y.data(), &[1.0, 4.0]);
}

#[test]
fn test_zero_grad() {
    let x = RcTensor::<f64>::parameter(vec![1.0, 2.0], vec![2]);
    x.sum().backward().unwrap();
    assert!(x.grad().is_some());
    x.zero_grad();
    assert!(x.grad().is_none());
}

#[test]
fn test_display_is_truncated() {
    let tensor = RcTensor::<f32>::zeros(vec![3, 4]);
    let shown = format!("{tensor}");
    assert!(shown.starts_with("tensor(shape=[3, 4], [0.0000"));
    assert!(shown.ends_with(", ...])"));
}

#[test]
fn test_from_nested_arrays() {
    let tensor = RcTensor::<f64>::from([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    assert_eq!(tensor.shape(), &vec![3, 2]);
    assert_eq!(tensor, RcTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]));
    let scalars = RcTensor::<f32>::from([1.5, 2.5]);
    assert_eq!(scalars.shape(), &vec![2]);
}
