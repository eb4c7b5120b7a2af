//! Tensor shape and scalar type arithmetic.
//!
//! Every buffer size in the crate is derived from [`TensorShape::volume`]
//! and [`ScalarType::byte_width`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RunnerError};

/// Element type of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// 32-bit IEEE float.
    Float32,
    /// 16-bit IEEE float.
    Float16,
    /// 8-bit integer, reserved for quantized plans.
    Int8,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 => 2,
            Self::Int8 => 1,
        }
    }

    /// Decode a raw data type code as reported by a device runtime
    /// (0 = float, 1 = half, 2 = int8).
    ///
    /// # Panics
    ///
    /// Panics on any other code. The supported set is closed, so an unknown
    /// code means the plan and this crate disagree about the device runtime.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Float32,
            1 => Self::Float16,
            2 => Self::Int8,
            other => panic!("unsupported scalar type code {}", other),
        }
    }

    /// Raw data type code understood by the device runtime.
    pub const fn code(self) -> i32 {
        match self {
            Self::Float32 => 0,
            Self::Float16 => 1,
            Self::Int8 => 2,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32 => write!(f, "fp32"),
            Self::Float16 => write!(f, "fp16"),
            Self::Int8 => write!(f, "int8"),
        }
    }
}

impl FromStr for ScalarType {
    type Err = RunnerError;

    /// Parse a precision string like "fp32", "float16", "half" or "int8".
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fp32" | "float32" | "f32" | "float" => Ok(Self::Float32),
            "fp16" | "float16" | "f16" | "half" => Ok(Self::Float16),
            "int8" | "i8" => Ok(Self::Int8),
            other => Err(RunnerError::config(format!("Invalid precision: {}", other))),
        }
    }
}

/// Channel-first tensor extents, e.g. `(C, H, W)`.
///
/// Never empty and never contains a zero extent, so [`volume`](Self::volume)
/// is always positive. One sample fits in `usize` bytes at every scalar type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    /// Create a shape from its extents.
    ///
    /// # Errors
    ///
    /// Returns an error for a rank-0 shape, a zero extent, or a sample too
    /// large to address.
    pub fn new(dims: impl Into<Vec<usize>>) -> Result<Self> {
        let dims = dims.into();
        if dims.is_empty() {
            return Err(RunnerError::shape("rank-0 shapes have no volume"));
        }
        if dims.contains(&0) {
            return Err(RunnerError::shape(format!(
                "extents must be positive, got {:?}",
                dims
            )));
        }
        let bytes = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .and_then(|volume| volume.checked_mul(ScalarType::Float32.byte_width()));
        if bytes.is_none() {
            return Err(RunnerError::shape(format!(
                "volume of {:?} overflows usize",
                dims
            )));
        }
        Ok(Self(dims))
    }

    /// Shorthand for a `(C, H, W)` shape.
    pub fn chw(channels: usize, height: usize, width: usize) -> Result<Self> {
        Self::new(vec![channels, height, width])
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Extents in channel-first order.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of elements.
    pub fn volume(&self) -> usize {
        self.0.iter().product()
    }

    /// Bytes occupied by one sample of this shape.
    pub fn bytes_per_sample(&self, scalar_type: ScalarType) -> usize {
        self.volume() * scalar_type.byte_width()
    }
}

impl TryFrom<Vec<usize>> for TensorShape {
    type Error = RunnerError;

    fn try_from(dims: Vec<usize>) -> Result<Self> {
        Self::new(dims)
    }
}

impl From<TensorShape> for Vec<usize> {
    fn from(shape: TensorShape) -> Self {
        shape.0
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "({})", dims.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_product_of_extents() {
        let shape = TensorShape::chw(3, 32, 32).unwrap();
        assert_eq!(shape.volume(), 3 * 32 * 32);
        assert_eq!(shape.rank(), 3);
        assert_eq!(TensorShape::new(vec![10]).unwrap().volume(), 10);
        assert_eq!(TensorShape::new(vec![2, 1, 5, 7]).unwrap().volume(), 70);
    }

    #[test]
    fn rank_zero_and_zero_extent_are_rejected() {
        assert!(matches!(TensorShape::new(Vec::new()), Err(RunnerError::Shape(_))));
        assert!(matches!(TensorShape::chw(3, 0, 4), Err(RunnerError::Shape(_))));
    }

    #[test]
    fn overflowing_volume_is_rejected() {
        let huge = 1usize << (usize::BITS / 2);
        assert!(matches!(
            TensorShape::new(vec![huge, huge]),
            Err(RunnerError::Shape(_))
        ));
        // Fits as an element count but not in bytes at fp32.
        assert!(matches!(
            TensorShape::new(vec![usize::MAX / 2]),
            Err(RunnerError::Shape(_))
        ));
        let parsed = serde_json::from_str::<TensorShape>(&format!("[{}, {}]", huge, huge));
        assert!(parsed.is_err());
    }

    #[test]
    fn byte_widths_are_fixed() {
        assert_eq!(ScalarType::Float32.byte_width(), 4);
        assert_eq!(ScalarType::Float16.byte_width(), 2);
        assert_eq!(ScalarType::Int8.byte_width(), 1);
        let shape = TensorShape::new(vec![10]).unwrap();
        assert_eq!(shape.bytes_per_sample(ScalarType::Float32), 40);
    }

    #[test]
    fn type_codes_round_trip() {
        for t in [ScalarType::Float32, ScalarType::Float16, ScalarType::Int8] {
            assert_eq!(ScalarType::from_code(t.code()), t);
        }
    }

    #[test]
    #[should_panic(expected = "unsupported scalar type code 3")]
    fn unknown_type_code_is_fatal() {
        // int32 bindings have no supported width
        ScalarType::from_code(3);
    }

    #[test]
    fn precision_parsing() {
        assert_eq!("fp16".parse::<ScalarType>().unwrap(), ScalarType::Float16);
        assert_eq!(" Half ".parse::<ScalarType>().unwrap(), ScalarType::Float16);
        assert_eq!("float32".parse::<ScalarType>().unwrap(), ScalarType::Float32);
        assert_eq!("int8".parse::<ScalarType>().unwrap(), ScalarType::Int8);
        assert!("bf16".parse::<ScalarType>().is_err());
        assert_eq!(ScalarType::Float16.to_string(), "fp16");
    }

    #[test]
    fn shape_display_and_serde() {
        let shape = TensorShape::chw(3, 368, 432).unwrap();
        assert_eq!(shape.to_string(), "(3, 368, 432)");

        let parsed: TensorShape = serde_json::from_str("[19, 46, 54]").unwrap();
        assert_eq!(parsed.dims(), &[19, 46, 54]);
        assert!(serde_json::from_str::<TensorShape>("[]").is_err());
    }
}
