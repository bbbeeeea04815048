//! The sample value type used throughout the store.
//!
//! JSON encoders generally cannot represent NaN, but this store uses NaN
//! as the signal for missing data. `Float` therefore carries its own
//! serde implementation which maps NaN to `null` and back.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign};

/// A single sample. f32 on purpose: the heap full of live samples is the
/// binding constraint, not precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Float(pub f32);

/// The missing-value sentinel.
pub const NAN: Float = Float(f32::NAN);

impl Float {
    /// Returns true if this sample is the missing-value sentinel.
    #[inline]
    pub fn is_nan(self) -> bool {
        self.0.is_nan()
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        f64::from(self.0)
    }
}

impl From<f32> for Float {
    fn from(x: f32) -> Self {
        Float(x)
    }
}

impl From<f64> for Float {
    fn from(x: f64) -> Self {
        Float(x as f32)
    }
}

impl Add for Float {
    type Output = Float;
    fn add(self, rhs: Float) -> Float {
        Float(self.0 + rhs.0)
    }
}

impl AddAssign for Float {
    fn add_assign(&mut self, rhs: Float) {
        self.0 += rhs.0;
    }
}

impl Mul for Float {
    type Output = Float;
    fn mul(self, rhs: Float) -> Float {
        Float(self.0 * rhs.0)
    }
}

impl MulAssign for Float {
    fn mul_assign(&mut self, rhs: Float) {
        self.0 *= rhs.0;
    }
}

impl Div for Float {
    type Output = Float;
    fn div(self, rhs: Float) -> Float {
        Float(self.0 / rhs.0)
    }
}

impl DivAssign for Float {
    fn div_assign(&mut self, rhs: Float) {
        self.0 /= rhs.0;
    }
}

impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nan() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Serialize for Float {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Float {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<f32>::deserialize(deserializer)?
            .map(Float)
            .unwrap_or(NAN))
    }
}
