mod element_wise_ops;
mod linalg;
mod misc;

pub use element_wise_ops::*;
pub use linalg::*;
pub use misc::*;

/// Inputs past this many elements are mapped with rayon.
const PARALLEL_THRESHOLD: usize = 1 << 14;

#[cfg(test)]
pub(crate) mod testing {
    use crate::tensor::RcTensor;

    /// Central difference estimate of d f(x).sum() / dx.
    pub fn numerical_grad<F>(f: F, x: &[f64], shape: &[usize]) -> Vec<f64>
    where
        F: Fn(&RcTensor<f64>) -> RcTensor<f64>,
    {
        let epsilon = 1e-6;
        (0..x.len())
            .map(|i| {
                let mut up = x.to_vec();
                let mut down = x.to_vec();
                up[i] += epsilon;
                down[i] -= epsilon;
                let f_up = f(&RcTensor::new(up, shape.to_vec())).sum().elem();
                let f_down = f(&RcTensor::new(down, shape.to_vec())).sum().elem();
                (f_up - f_down) / (2.0 * epsilon)
            })
            .collect()
    }

    /// Gradient of f(x).sum() computed by `backward`.
    pub fn analytic_grad<F>(f: F, x: &[f64], shape: &[usize]) -> Vec<f64>
    where
        F: Fn(&RcTensor<f64>) -> RcTensor<f64>,
    {
        let input = RcTensor::parameter(x.to_vec(), shape.to_vec());
        f(&input).sum().backward().unwrap();
        input.grad().unwrap().data().to_vec()
    }

    pub fn assert_close(left: &[f64], right: &[f64], tolerance: f64) {
        assert_eq!(left.len(), right.len());
        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            assert!(
                (l - r).abs() <= tolerance,
                "mismatch at {i}: {l} vs {r}\nleft={left:?}\nright={right:?}"
            );
        }
    }

    pub fn check_grad<F>(f: F, x: &[f64], shape: &[usize])
    where
        F: Fn(&RcTensor<f64>) -> RcTensor<f64>,
    {
        let numerical = numerical_grad(&f, x, shape);
        let analytic = analytic_grad(&f, x, shape);
        assert_close(&numerical, &analytic, 1e-5);
    }
}
