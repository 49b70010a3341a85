use rayon::prelude::*;

use super::PARALLEL_THRESHOLD;
use crate::tensor::autograd::Derivative;
use crate::tensor::numeric::*;
use crate::tensor::utils::{broadcast_offsets, broadcast_shape};
use crate::tensor::{RawTensor, RcTensor, TensorList};

fn broadcast_binary<T: Numeric>(
    left: &RawTensor<T>,
    right: &RawTensor<T>,
    op: fn(T, T) -> T,
    name: &str,
) -> RawTensor<T> {
    if left.shape == right.shape {
        let array = left
            .array
            .iter()
            .zip(right.array.iter())
            .map(|(&l, &r)| op(l, r))
            .collect();
        return RawTensor::new(array, left.shape.clone());
    }
    let out_shape = match broadcast_shape(&left.shape, &right.shape) {
        Some(shape) => shape,
        None => panic!(
            "{name}: cannot broadcast {:?} with {:?}",
            left.shape, right.shape
        ),
    };
    let left_offsets = broadcast_offsets(&left.shape, &out_shape);
    let right_offsets = broadcast_offsets(&right.shape, &out_shape);
    let array = left_offsets
        .iter()
        .zip(right_offsets.iter())
        .map(|(&i, &j)| op(left.array[i], right.array[j]))
        .collect();
    RawTensor::new(array, out_shape)
}

/// Sums a broadcast gradient back down to `shape`.
fn reduce_to_shape<T: Numeric>(grad: &[T], grad_shape: &[usize], shape: &[usize]) -> RcTensor<T> {
    if grad_shape == shape {
        return RcTensor::new(grad.to_vec(), shape.to_vec());
    }
    let mut array = vec![T::zero(); shape.iter().product()];
    for (&g, offset) in grad.iter().zip(broadcast_offsets(shape, grad_shape)) {
        array[offset] += g;
    }
    RcTensor::new(array, shape.to_vec())
}

/// `grad * other`, with `other` broadcast to the shape of `grad`.
fn broadcast_product<T: Numeric>(grad: &RawTensor<T>, other: &RawTensor<T>) -> Vec<T> {
    if grad.shape == other.shape {
        return grad
            .array
            .iter()
            .zip(other.array.iter())
            .map(|(&g, &o)| g * o)
            .collect();
    }
    grad.array
        .iter()
        .zip(broadcast_offsets(&other.shape, &grad.shape))
        .map(|(&g, offset)| g * other.array[offset])
        .collect()
}

pub fn add<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = broadcast_binary(left, right, |l, r| l + r, "add");
    Derivative::attach(
        raw_tensor,
        vec![left.clone(), right.clone()],
        add_vjp,
        concat!("add, file: ", file!(), ", line: ", line!()),
    )
}

fn add_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    inputs
        .iter()
        .map(|input| {
            input
                .requires_grad
                .then(|| reduce_to_shape(&grad.array, &grad.shape, &input.shape))
        })
        .collect()
}

pub fn sub<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = broadcast_binary(left, right, |l, r| l - r, "sub");
    Derivative::attach(
        raw_tensor,
        vec![left.clone(), right.clone()],
        sub_vjp,
        concat!("sub, file: ", file!(), ", line: ", line!()),
    )
}

fn sub_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    let (left, right) = (&inputs[0], &inputs[1]);
    let left_grad = left
        .requires_grad
        .then(|| reduce_to_shape(&grad.array, &grad.shape, &left.shape));
    let right_grad = right.requires_grad.then(|| {
        let negated: Vec<T> = grad.array.iter().map(|&g| -g).collect();
        reduce_to_shape(&negated, &grad.shape, &right.shape)
    });
    vec![left_grad, right_grad]
}

/// Element-wise product with broadcasting, a scalar on either side scales.
pub fn mul<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = broadcast_binary(left, right, |l, r| l * r, "mul");
    Derivative::attach(
        raw_tensor,
        vec![left.clone(), right.clone()],
        mul_vjp,
        concat!("mul, file: ", file!(), ", line: ", line!()),
    )
}

fn mul_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    let (left, right) = (&inputs[0], &inputs[1]);
    let left_grad = left.requires_grad.then(|| {
        reduce_to_shape(&broadcast_product(grad, right), &grad.shape, &left.shape)
    });
    let right_grad = right.requires_grad.then(|| {
        reduce_to_shape(&broadcast_product(grad, left), &grad.shape, &right.shape)
    });
    vec![left_grad, right_grad]
}

fn map<T: Numeric>(tensor: &RawTensor<T>, f: fn(T) -> T) -> RawTensor<T> {
    let array = if tensor.array.len() >= PARALLEL_THRESHOLD {
        tensor.array.par_iter().map(|&x| f(x)).collect()
    } else {
        tensor.array.iter().map(|&x| f(x)).collect()
    };
    RawTensor::new(array, tensor.shape.clone())
}

/// `grad * f(input, output)` element by element.
fn chain<T: Numeric>(
    input: &RawTensor<T>,
    output: &RawTensor<T>,
    grad: &RcTensor<T>,
    local: fn(T, T) -> T,
) -> RcTensor<T> {
    let array = grad
        .array
        .iter()
        .zip(input.array.iter().zip(output.array.iter()))
        .map(|(&g, (&x, &y))| g * local(x, y))
        .collect();
    RcTensor::new(array, input.shape.clone())
}

pub fn relu<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = map(tensor, |x| if x < T::zero() { T::zero() } else { x });
    Derivative::attach(
        raw_tensor,
        vec![tensor.clone()],
        relu_vjp,
        concat!("relu, file: ", file!(), ", line: ", line!()),
    )
}

fn relu_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    vec![Some(chain(&inputs[0], output, grad, |x, _| {
        if x > T::zero() {
            T::one()
        } else {
            T::zero()
        }
    }))]
}

pub fn tanh<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = map(tensor, |x| x.tanh());
    Derivative::attach(
        raw_tensor,
        vec![tensor.clone()],
        tanh_vjp,
        concat!("tanh, file: ", file!(), ", line: ", line!()),
    )
}

fn tanh_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    vec![Some(chain(&inputs[0], output, grad, |_, y| {
        T::one() - y * y
    }))]
}

pub fn sigmoid<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = map(tensor, |x| T::one() / (T::one() + (-x).exp()));
    Derivative::attach(
        raw_tensor,
        vec![tensor.clone()],
        sigmoid_vjp,
        concat!("sigmoid, file: ", file!(), ", line: ", line!()),
    )
}

fn sigmoid_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    vec![Some(chain(&inputs[0], output, grad, |_, y| {
        y * (T::one() - y)
    }))]
}

pub fn abs<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let raw_tensor = map(tensor, |x| x.abs());
    Derivative::attach(
        raw_tensor,
        vec![tensor.clone()],
        abs_vjp,
        concat!("abs, file: ", file!(), ", line: ", line!()),
    )
}

fn abs_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    vec![Some(chain(&inputs[0], output, grad, |x, _| {
        if x > T::zero() {
            T::one()
        } else if x < T::zero() {
            -T::one()
        } else {
            T::zero()
        }
    }))]
}

#[cfg(test)]
use super::testing::check_grad;

#[test]
fn test_add() {
    let tensor1 = RcTensor::<f64>::new_with_filler(vec![4, 4], 1.0);
    let tensor2 = RcTensor::new((0..32).map(|x| x as f64).collect(), vec![2, 4, 4]);
    let tensor3 = RcTensor::new((1..33).map(|x| x as f64).collect(), vec![2, 4, 4]);
    assert_eq!(&tensor2 + &tensor1, tensor3);
    assert_eq!(&tensor1 + &tensor2, tensor3);
    assert_eq!(tensor1 + tensor2, tensor3);
}

#[test]
fn test_add_scalar() {
    let tensor1 = RcTensor::new((0..32).map(|x| x as f64).collect(), vec![2, 4, 4]);
    let tensor2 = RcTensor::new((42..74).map(|x| x as f64).collect(), vec![2, 4, 4]);
    let scalar = RcTensor::scalar(42.0);
    assert_eq!(&tensor1 + &scalar, tensor2);
    assert_eq!(&scalar + &tensor1, tensor2);
}

#[test]
fn test_sub() {
    let left = RcTensor::<f64>::from([[5.0, 6.0], [7.0, 8.0]]);
    let right = RcTensor::<f64>::from([[1.0, 2.0]]);
    assert_eq!(&left - &right, RcTensor::from([[4.0, 4.0], [6.0, 6.0]]));
}

#[test]
fn test_bias_grad_sums_over_rows() {
    let rows = RcTensor::<f64>::parameter(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]);
    let bias = RcTensor::<f64>::parameter(vec![0.5, -0.5], vec![1, 2]);
    (&rows + &bias).sum().backward().unwrap();
    assert_eq!(bias.grad().unwrap(), RcTensor::from([[3.0, 3.0]]));
    assert_eq!(rows.grad().unwrap(), RcTensor::new_with_filler(vec![3, 2], 1.0));
}

#[test]
fn test_sub_grad() {
    let left = RcTensor::<f64>::parameter(vec![1.0, 2.0], vec![2]);
    let right = RcTensor::<f64>::parameter(vec![3.0, 5.0], vec![2]);
    (&left - &right).sum().backward().unwrap();
    assert_eq!(left.grad().unwrap(), RcTensor::from([1.0, 1.0]));
    assert_eq!(right.grad().unwrap(), RcTensor::from([-1.0, -1.0]));
}

#[test]
fn test_mul_grad_with_broadcast() {
    let column = RcTensor::new(vec![2.0, -1.0], vec![2, 1]);
    check_grad(
        |x| x * &column,
        &[0.3, -0.7, 1.1, 0.2, 0.9, -1.3],
        &[2, 3],
    );
    let matrix = RcTensor::new(vec![0.3, -0.7, 1.1, 0.2, 0.9, -1.3], vec![2, 3]);
    check_grad(|x| &matrix * x, &[2.0, -1.0], &[2, 1]);
}

#[test]
fn test_relu() {
    let input = RcTensor::<f64>::from([-1.0, 0.0, 2.5]);
    assert_eq!(input.relu(), RcTensor::from([0.0, 0.0, 2.5]));
    check_grad(|x| x.relu(), &[-1.0, 0.4, 2.5, -0.2], &[2, 2]);
}

#[test]
fn test_relu_keeps_nan() {
    let out = RcTensor::<f64>::from([f64::NAN, f64::INFINITY, -1.0]).relu();
    assert!(out.data()[0].is_nan());
    assert_eq!(&out.data()[1..], &[f64::INFINITY, 0.0]);
}

#[test]
fn test_tanh_grad() {
    check_grad(|x| x.tanh(), &[0.666, 12.0, -3.2, -0.1], &[2, 2]);
    check_grad(|x| x.tanh().tanh(), &[0.666], &[1]);
}

#[test]
fn test_sigmoid_grad() {
    let half = RcTensor::<f64>::from([0.0]).sigmoid();
    assert!((half.data()[0] - 0.5).abs() < 1e-12);
    check_grad(|x| x.sigmoid(), &[-2.0, 0.0, 0.5, 3.0], &[4]);
}

#[test]
fn test_abs_grad() {
    check_grad(|x| x.abs(), &[-2.0, 0.5, 3.0], &[3]);
}

#[test]
fn test_large_map_runs_in_parallel_path() {
    let input = RcTensor::<f32>::new_with_filler(vec![PARALLEL_THRESHOLD + 1], -1.0);
    assert!(input.relu().data().iter().all(|&v| v == 0.0));
}
