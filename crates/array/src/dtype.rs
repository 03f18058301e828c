//! Element types, scalars and promotion

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// One byte per element, `0` or `1`
    Bool,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit IEEE float
    Float32,
    /// 64-bit IEEE float
    Float64,
}

impl DType {
    /// Encoded width of one element in bytes.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Lowercase name used in messages and fingerprints.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// `true` for `Float32` and `Float64`.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// `true` for `Int32` and `Int64`.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }

    /// `true` for every dtype that supports arithmetic.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool)
    }

    /// Common type of two numeric dtypes, `None` if either is `Bool`.
    ///
    /// Integers widen to the larger integer, floats to the larger float, and
    /// an integer mixed with a float yields `Float64`.
    #[must_use]
    pub fn promote(self, other: Self) -> Option<Self> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }
        Some(match (self, other) {
            (Self::Float32, Self::Float32) => Self::Float32,
            (a, b) if a.is_float() || b.is_float() => Self::Float64,
            (a, b) => a.max(b),
        })
    }

    /// Float type used for true division of values of this type.
    #[must_use]
    pub const fn division_type(self) -> Self {
        match self {
            Self::Float32 => Self::Float32,
            _ => Self::Float64,
        }
    }

    /// Accumulator type of `sum` over values of this type.
    #[must_use]
    pub const fn sum_type(self) -> Self {
        match self {
            Self::Bool | Self::Int32 | Self::Int64 => Self::Int64,
            other => other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = String;

    /// Accepts the lowercase names as well as the short codes found in
    /// column descriptors (`?`, `i4`, `i8`, `f4`, `f8`, optionally with a
    /// `<` or `|` byte-order prefix).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().trim_start_matches(['<', '|']);
        match code.to_ascii_lowercase().as_str() {
            "bool" | "?" | "b1" => Ok(Self::Bool),
            "int32" | "i4" => Ok(Self::Int32),
            "int64" | "i8" => Ok(Self::Int64),
            "float32" | "f4" => Ok(Self::Float32),
            "float64" | "f8" => Ok(Self::Float64),
            _ => Err(format!("unknown dtype '{s}'")),
        }
    }
}

/// Scalar operand of an elementwise operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Boolean literal
    Bool(bool),
    /// Integer literal, adopts the dtype of the array it meets
    Int(i64),
    /// Float literal
    Float(f64),
}

impl Scalar {
    /// Dtype this scalar has on its own.
    #[must_use]
    pub const fn natural_dtype(self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int(_) => DType::Int64,
            Self::Float(_) => DType::Float64,
        }
    }

    /// Dtype both sides are computed in when this scalar meets an array of
    /// `array` dtype, `None` if they cannot be combined.
    ///
    /// Integer scalars adopt the array dtype. Float scalars keep a float
    /// array's dtype and promote integer arrays to `Float64`. Booleans only
    /// meet booleans.
    #[must_use]
    pub const fn operand_dtype(self, array: DType) -> Option<DType> {
        match (self, array) {
            (Self::Bool(_), DType::Bool) => Some(DType::Bool),
            (Self::Bool(_), _) | (_, DType::Bool) => None,
            (Self::Int(_), dtype) => Some(dtype),
            (Self::Float(_), dtype) if dtype.is_float() => Some(dtype),
            (Self::Float(_), _) => Some(DType::Float64),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}
