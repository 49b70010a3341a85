use num::traits::Float;
pub use num::{One, Zero};
use std::fmt::{Debug, Display};

pub use std::ops::{AddAssign, MulAssign, SubAssign};

/// Element type of a tensor.
///
/// Only floating point types qualify since every op has to be differentiable.
/// `Send + Sync` lets batches and matmul rows cross into worker threads.
pub trait Numeric:
    Float + AddAssign + SubAssign + MulAssign + Debug + Display + Send + Sync + 'static
{
    fn from_f64_lossy(value: f64) -> Self;

    fn as_f64(self) -> f64;
}

// https://stackoverflow.com/questions/42381185/specifying-generic-parameter-to-belong-to-a-small-set-of-types
macro_rules! numeric_impl {
    ($($t: ty),+) => {
        $(
            impl Numeric for $t {
                #[inline]
                fn from_f64_lossy(value: f64) -> Self {
                    value as $t
                }

                #[inline]
                fn as_f64(self) -> f64 {
                    self as f64
                }
            }
        )+
    }
}

numeric_impl!(f32, f64);

#[test]
fn test_lossy_conversion() {
    assert_eq!(f32::from_f64_lossy(0.5), 0.5f32);
    assert_eq!(2.0f32.as_f64(), 2.0f64);
}
