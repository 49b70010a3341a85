use rayon::prelude::*;

use crate::tensor::autograd::Derivative;
use crate::tensor::numeric::*;
use crate::tensor::{RawTensor, RcTensor, TensorList};

/// Row-major `[n, k] x [k, m]` product, rows computed in parallel.
pub(crate) fn matmul_raw<T: Numeric>(
    left: &[T],
    right: &[T],
    n: usize,
    k: usize,
    m: usize,
) -> Vec<T> {
    let mut out = vec![T::zero(); n * m];
    if m == 0 {
        return out;
    }
    // zeros may only be skipped against rows where 0 * b stays 0
    let finite_rows: Vec<bool> = right
        .chunks(m)
        .map(|row| row.iter().all(|b| b.is_finite()))
        .collect();
    out.par_chunks_mut(m).enumerate().for_each(|(row, out_row)| {
        let left_row = &left[row * k..(row + 1) * k];
        for (i, &a) in left_row.iter().enumerate() {
            // post-relu activations are mostly zero
            if a == T::zero() && finite_rows[i] {
                continue;
            }
            let right_row = &right[i * m..(i + 1) * m];
            for (o, &b) in out_row.iter_mut().zip(right_row.iter()) {
                *o += a * b;
            }
        }
    });
    out
}

pub(crate) fn transpose_raw<T: Numeric>(array: &[T], rows: usize, cols: usize) -> Vec<T> {
    let mut out = vec![T::zero(); array.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = array[r * cols + c];
        }
    }
    out
}

fn matrix_dims<T: Numeric>(tensor: &RawTensor<T>) -> (usize, usize) {
    match tensor.shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        shape => panic!("matmul expects 2-d tensors, got shape {shape:?}"),
    }
}

/// `[n, k] x [k, m] -> [n, m]`.
pub fn matmul<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    let (n, k) = matrix_dims(left);
    let (k2, m) = matrix_dims(right);
    assert_eq!(
        k, k2,
        "matmul inner dimensions differ: {:?} x {:?}",
        left.shape, right.shape
    );
    let array = matmul_raw(&left.array, &right.array, n, k, m);
    Derivative::attach(
        RawTensor::new(array, vec![n, m]),
        vec![left.clone(), right.clone()],
        matmul_vjp,
        concat!("matmul, file: ", file!(), ", line: ", line!()),
    )
}

fn matmul_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    let (left, right) = (&inputs[0], &inputs[1]);
    let (n, k) = matrix_dims(left);
    let (_, m) = matrix_dims(right);
    let left_grad = left.requires_grad.then(|| {
        let right_t = transpose_raw(&right.array, k, m);
        RcTensor::new(matmul_raw(&grad.array, &right_t, n, m, k), vec![n, k])
    });
    let right_grad = right.requires_grad.then(|| {
        let left_t = transpose_raw(&left.array, n, k);
        RcTensor::new(matmul_raw(&left_t, &grad.array, k, n, m), vec![k, m])
    });
    vec![left_grad, right_grad]
}

#[cfg(test)]
use super::testing::check_grad;

#[test]
fn test_matmul() {
    let left = RcTensor::<f64>::from([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    let right = RcTensor::<f64>::from([[1.0, 0.0, -1.0], [2.0, 1.0, 0.0]]);
    let expected = RcTensor::from([[5.0, 2.0, -1.0], [11.0, 4.0, -3.0], [17.0, 6.0, -5.0]]);
    assert_eq!(left.matmul(&right), expected);
}

#[test]
fn test_matmul_identity() {
    let identity = RcTensor::<f64>::from([[1.0, 0.0], [0.0, 1.0]]);
    let matrix = RcTensor::<f64>::from([[0.5, -2.0], [7.0, 3.0]]);
    assert_eq!(identity.matmul(&matrix), matrix);
    assert_eq!(matrix.matmul(&identity), matrix);
}

#[test]
fn test_matmul_zero_times_non_finite_is_nan() {
    let left = RcTensor::<f64>::from([[0.0, 1.0]]);
    let right = RcTensor::<f64>::from([[f64::NAN, 1.0], [2.0, 3.0]]);
    let out = left.matmul(&right);
    assert!(out.data()[0].is_nan());
    assert_eq!(out.data()[1], 3.0);
    let right = RcTensor::<f64>::from([[f64::INFINITY, 1.0], [2.0, 3.0]]);
    assert!(left.matmul(&right).data()[0].is_nan());
}

#[test]
fn test_transpose() {
    assert_eq!(
        transpose_raw(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3),
        vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
    );
}

#[test]
fn test_matmul_grad() {
    let right = RcTensor::new(vec![0.1, -0.4, 0.7, 1.5, 0.2, -0.9], vec![3, 2]);
    check_grad(
        |x| x.matmul(&right).tanh(),
        &[0.5, -1.0, 2.0, 0.3, 0.0, -0.6],
        &[2, 3],
    );
    let left = RcTensor::new(vec![0.5, -1.0, 2.0, 0.3, 0.0, -0.6], vec![2, 3]);
    check_grad(
        |x| left.matmul(x).tanh(),
        &[0.1, -0.4, 0.7, 1.5, 0.2, -0.9],
        &[3, 2],
    );
}

#[test]
#[should_panic]
fn test_matmul_rejects_mismatch() {
    let left = RcTensor::<f64>::zeros(vec![2, 3]);
    let right = RcTensor::<f64>::zeros(vec![2, 3]);
    left.matmul(&right);
}
