use std::fmt::Debug;
use std::iter::Sum;
use std::ops::AddAssign;

use num_traits::{AsPrimitive, Float, NumCast};

/// Numeric bound for values stored in the sparse matrices consumed by this crate.
///
/// All statistics are accumulated in `f64`, `AsPrimitive` gives the lossless cast.
pub trait NumericOps:
    Float + NumCast + AsPrimitive<f64> + AddAssign + Sum + Debug + Send + Sync + 'static
{
}

impl NumericOps for f32 {}
impl NumericOps for f64 {}
