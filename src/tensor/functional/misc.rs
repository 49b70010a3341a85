use rayon::prelude::*;

use super::PARALLEL_THRESHOLD;
use crate::tensor::autograd::Derivative;
use crate::tensor::numeric::*;
use crate::tensor::{RawTensor, RcTensor, TensorList};

/// Clip bound applied to predicted probabilities before taking logs.
pub const EPSILON: f64 = 1e-7;

/// Sum of every element, as a scalar.
pub fn sum<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let total = tensor.array.iter().fold(T::zero(), |acc, &x| acc + x);
    Derivative::attach(
        RawTensor::scalar(total),
        vec![tensor.clone()],
        sum_vjp,
        concat!("sum, file: ", file!(), ", line: ", line!()),
    )
}

fn sum_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    vec![Some(RcTensor::new_with_filler(
        inputs[0].shape.clone(),
        grad.elem(),
    ))]
}

pub fn mean<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let count = T::from_f64_lossy(tensor.count() as f64);
    let total = tensor.array.iter().fold(T::zero(), |acc, &x| acc + x);
    Derivative::attach(
        RawTensor::scalar(total / count),
        vec![tensor.clone()],
        mean_vjp,
        concat!("mean, file: ", file!(), ", line: ", line!()),
    )
}

fn mean_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    let count = T::from_f64_lossy(inputs[0].count() as f64);
    vec![Some(RcTensor::new_with_filler(
        inputs[0].shape.clone(),
        grad.elem() / count,
    ))]
}

pub fn reshape<T: Numeric>(tensor: &RcTensor<T>, shape: Vec<usize>) -> RcTensor<T> {
    Derivative::attach(
        RawTensor::new(tensor.array.clone(), shape),
        vec![tensor.clone()],
        reshape_vjp,
        concat!("reshape, file: ", file!(), ", line: ", line!()),
    )
}

fn reshape_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    vec![Some(RcTensor::new(
        grad.array.clone(),
        inputs[0].shape.clone(),
    ))]
}

fn last_dim<T: Numeric>(tensor: &RawTensor<T>, op: &str) -> usize {
    match tensor.shape.last() {
        Some(&cols) if cols > 0 => cols,
        _ => panic!("{op} needs a non-empty last axis, got {:?}", tensor.shape),
    }
}

fn softmax_row<T: Numeric>(row: &[T], out: &mut [T]) {
    let max = row.iter().fold(T::neg_infinity(), |m, &x| m.max(x));
    let mut total = T::zero();
    for (o, &x) in out.iter_mut().zip(row.iter()) {
        *o = (x - max).exp();
        total += *o;
    }
    for o in out.iter_mut() {
        *o = *o / total;
    }
}

/// Softmax along the last axis.
pub fn softmax<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    let cols = last_dim(tensor, "softmax");
    let mut array = vec![T::zero(); tensor.count()];
    if array.len() >= PARALLEL_THRESHOLD {
        array
            .par_chunks_mut(cols)
            .zip(tensor.array.par_chunks(cols))
            .for_each(|(out, row)| softmax_row(row, out));
    } else {
        for (out, row) in array.chunks_mut(cols).zip(tensor.array.chunks(cols)) {
            softmax_row(row, out);
        }
    }
    Derivative::attach(
        RawTensor::new(array, tensor.shape.clone()),
        vec![tensor.clone()],
        softmax_vjp,
        concat!("softmax, file: ", file!(), ", line: ", line!()),
    )
}

fn softmax_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    let cols = last_dim(output, "softmax");
    let mut array = Vec::with_capacity(output.count());
    for (y, g) in output.array.chunks(cols).zip(grad.array.chunks(cols)) {
        let dot = y
            .iter()
            .zip(g.iter())
            .fold(T::zero(), |acc, (&y, &g)| acc + y * g);
        array.extend(y.iter().zip(g.iter()).map(|(&y, &g)| y * (g - dot)));
    }
    vec![Some(RcTensor::new(array, inputs[0].shape.clone()))]
}

/// Clamps to `[low, high]`, NaN passes through.
fn clip<T: Numeric>(x: T, low: T, high: T) -> T {
    if x < low {
        low
    } else if x > high {
        high
    } else {
        x
    }
}

/// Mean over rows of `-sum(targets * ln(p))`, where each row of
/// `probabilities` is first rescaled to sum to one and then clipped to
/// `[EPSILON, 1 - EPSILON]`.
pub fn categorical_crossentropy<T: Numeric>(
    probabilities: &RcTensor<T>,
    targets: &RcTensor<T>,
) -> RcTensor<T> {
    assert_eq!(
        probabilities.shape, targets.shape,
        "categorical_crossentropy: predictions and targets differ in shape"
    );
    let cols = last_dim(probabilities, "categorical_crossentropy");
    let rows = probabilities.count() / cols;
    let epsilon = T::from_f64_lossy(EPSILON);
    let mut total = T::zero();
    for (p, y) in probabilities
        .array
        .chunks(cols)
        .zip(targets.array.chunks(cols))
    {
        let row_sum = p.iter().fold(T::zero(), |acc, &x| acc + x);
        for (&p, &y) in p.iter().zip(y.iter()) {
            let q = clip(p / row_sum, epsilon, T::one() - epsilon);
            total -= y * q.ln();
        }
    }
    let loss = total / T::from_f64_lossy(rows as f64);
    Derivative::attach(
        RawTensor::scalar(loss),
        vec![probabilities.clone(), targets.clone()],
        categorical_crossentropy_vjp,
        concat!("categorical_crossentropy, file: ", file!(), ", line: ", line!()),
    )
}

fn categorical_crossentropy_vjp<T: Numeric>(
    inputs: &TensorList<T>,
    _output: &RawTensor<T>,
    grad: &RcTensor<T>,
) -> Vec<Option<RcTensor<T>>> {
    let (probabilities, targets) = (&inputs[0], &inputs[1]);
    let cols = last_dim(probabilities, "categorical_crossentropy");
    let rows = probabilities.count() / cols;
    let factor = grad.elem() / T::from_f64_lossy(rows as f64);
    let epsilon = T::from_f64_lossy(EPSILON);
    let upper = T::one() - epsilon;

    let mut probability_grad = Vec::with_capacity(probabilities.count());
    let mut target_grad = Vec::with_capacity(targets.count());
    for (p, y) in probabilities
        .array
        .chunks(cols)
        .zip(targets.array.chunks(cols))
    {
        let row_sum = p.iter().fold(T::zero(), |acc, &x| acc + x);
        let q: Vec<T> = p.iter().map(|&x| x / row_sum).collect();
        // d loss / d q, zero where the clip is active
        let u: Vec<T> = q
            .iter()
            .zip(y.iter())
            .map(|(&q, &y)| {
                if q >= epsilon && q <= upper {
                    -y / q
                } else {
                    T::zero()
                }
            })
            .collect();
        let weighted = u
            .iter()
            .zip(q.iter())
            .fold(T::zero(), |acc, (&u, &q)| acc + u * q);
        probability_grad.extend(u.iter().map(|&u| factor * (u - weighted) / row_sum));
        target_grad.extend(q.iter().map(|&q| -factor * clip(q, epsilon, upper).ln()));
    }
    vec![
        probabilities
            .requires_grad
            .then(|| RcTensor::new(probability_grad, probabilities.shape.clone())),
        targets
            .requires_grad
            .then(|| RcTensor::new(target_grad, targets.shape.clone())),
    ]
}

#[cfg(test)]
use super::testing::{assert_close, check_grad};

#[test]
fn test_sum_and_mean() {
    let tensor = RcTensor::<f64>::from([[1.0, 2.0], [3.0, 6.0]]);
    assert_eq!(tensor.sum(), RcTensor::scalar(12.0));
    assert_eq!(tensor.mean(), RcTensor::scalar(3.0));
    check_grad(|x| x.mean(), &[1.0, 2.0, 3.0], &[3]);
}

#[test]
fn test_reshape_grad() {
    let weights = RcTensor::new(vec![1.0, -2.0, 0.5, 4.0, 3.0, -1.0], vec![6]);
    check_grad(
        |x| &x.reshape(vec![6]) * &weights,
        &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        &[2, 3],
    );
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let logits = RcTensor::<f64>::from([[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
    let probabilities = logits.softmax();
    for row in probabilities.data().chunks(3) {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
    assert_close(&probabilities.data()[3..], &[1.0 / 3.0; 3], 1e-12);
}

#[test]
fn test_softmax_grad() {
    let weights = RcTensor::new(vec![1.0, -2.0, 0.5, 4.0, 3.0, -1.0], vec![2, 3]);
    check_grad(
        |x| &x.softmax() * &weights,
        &[0.3, -1.2, 2.0, 0.0, 0.1, -0.5],
        &[2, 3],
    );
}

#[test]
fn test_crossentropy_value() {
    let probabilities = RcTensor::<f64>::from([[0.1, 0.6, 0.3], [0.8, 0.1, 0.1]]);
    let targets = RcTensor::<f64>::from([[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    let loss = categorical_crossentropy(&probabilities, &targets).elem();
    let expected = -(0.6f64.ln() + 0.8f64.ln()) / 2.0;
    assert!((loss - expected).abs() < 1e-12);
}

#[test]
fn test_crossentropy_rescales_rows() {
    let scaled = RcTensor::<f64>::from([[0.2, 1.2, 0.6]]);
    let unit = RcTensor::<f64>::from([[0.1, 0.6, 0.3]]);
    let targets = RcTensor::<f64>::from([[0.0, 1.0, 0.0]]);
    let left = categorical_crossentropy(&scaled, &targets).elem();
    let right = categorical_crossentropy(&unit, &targets).elem();
    assert!((left - right).abs() < 1e-12);
}

#[test]
fn test_crossentropy_clips_zero_probability() {
    let probabilities = RcTensor::<f64>::from([[0.0, 1.0]]);
    let targets = RcTensor::<f64>::from([[1.0, 0.0]]);
    let loss = categorical_crossentropy(&probabilities, &targets).elem();
    assert!((loss + EPSILON.ln()).abs() < 1e-9);
}

#[test]
fn test_crossentropy_propagates_nan() {
    let probabilities = RcTensor::<f64>::from([[f64::NAN, f64::NAN], [0.5, 0.5]]);
    let targets = RcTensor::<f64>::from([[1.0, 0.0], [0.0, 1.0]]);
    assert!(categorical_crossentropy(&probabilities, &targets)
        .elem()
        .is_nan());
}

#[test]
fn test_crossentropy_grad() {
    let targets = RcTensor::new(vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0], vec![2, 3]);
    check_grad(
        |x| categorical_crossentropy(x, &targets),
        &[0.2, 0.5, 0.3, 0.1, 0.3, 0.4],
        &[2, 3],
    );
    check_grad(
        |x| categorical_crossentropy(&x.softmax(), &targets),
        &[0.3, -1.2, 2.0, 0.0, 0.1, -0.5],
        &[2, 3],
    );
}

#[test]
fn test_crossentropy_target_grad() {
    let probabilities = RcTensor::new(vec![0.2, 0.5, 0.3, 0.1, 0.3, 0.6], vec![2, 3]);
    check_grad(
        |y| categorical_crossentropy(&probabilities, y),
        &[0.0, 1.0, 0.0, 0.5, 0.0, 0.5],
        &[2, 3],
    );
}
