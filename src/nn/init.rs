use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::tensor::{Numeric, RcTensor};

/// Glorot (Xavier) uniform: `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`.
pub fn glorot_uniform<T, R>(fan_in: usize, fan_out: usize, rng: &mut R) -> RcTensor<T>
where
    T: Numeric,
    R: Rng + ?Sized,
{
    let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    let uniform = Uniform::new_inclusive(-limit, limit);
    let array = (0..fan_in * fan_out)
        .map(|_| T::from_f64_lossy(uniform.sample(rng)))
        .collect();
    RcTensor::parameter(array, vec![fan_in, fan_out])
}

pub fn zeros<T: Numeric>(shape: Vec<usize>) -> RcTensor<T> {
    let count = shape.iter().product();
    RcTensor::parameter(vec![T::zero(); count], shape)
}

#[test]
fn test_glorot_bounds() {
    use rand::SeedableRng;

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let weights = glorot_uniform::<f32, _>(784, 512, &mut rng);
    let limit = (6.0f32 / (784.0 + 512.0)).sqrt();
    assert_eq!(weights.shape(), &vec![784, 512]);
    assert!(weights.requires_grad());
    assert!(weights.data().iter().all(|w| w.abs() <= limit));
    let mean = weights.data().iter().sum::<f32>() / weights.count() as f32;
    assert!(mean.abs() < 1e-2);
}

#[test]
fn test_seeded_init_repeats() {
    use rand::SeedableRng;

    let first = glorot_uniform::<f64, _>(3, 4, &mut rand::rngs::StdRng::seed_from_u64(7));
    let second = glorot_uniform::<f64, _>(3, 4, &mut rand::rngs::StdRng::seed_from_u64(7));
    assert_eq!(first, second);
}
