//! Realized array values

use crate::dtype::{DType, Scalar};
use crate::{Error, Result};
use lazycat_cache::SizeBytes;
use ndarray::{Array1, ArrayD, Axis as NdAxis, IxDyn, Slice};
use std::borrow::Cow;
use std::fmt;

/// Rust element types backing each [`DType`].
pub trait Element: Copy + PartialOrd + Send + Sync + fmt::Debug + 'static {
    /// Dtype this element type represents
    const DTYPE: DType;

    /// Wrap a typed array.
    fn wrap(array: ArrayD<Self>) -> ArrayData;

    /// Borrow the typed array if `data` holds this element type.
    fn peek(data: &ArrayData) -> Option<&ArrayD<Self>>;

    /// Decode one little-endian element; `bytes` is exactly one element wide.
    fn from_le(bytes: &[u8]) -> Self;

    /// Append the little-endian encoding of this element.
    fn put_le(self, out: &mut Vec<u8>);

    /// Convert to `f64`
    fn to_f64(self) -> f64;

    /// Convert to `i64`, truncating floats
    fn to_i64(self) -> i64;

    /// Convert from `f64`
    fn from_f64(value: f64) -> Self;

    /// Convert from `i64`
    fn from_i64(value: i64) -> Self;

    /// Convert a scalar operand to this element type.
    fn from_scalar(value: Scalar) -> Self {
        match value {
            Scalar::Bool(v) => Self::from_i64(i64::from(v)),
            Scalar::Int(v) => Self::from_i64(v),
            Scalar::Float(v) => Self::from_f64(v),
        }
    }
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn wrap(array: ArrayD<Self>) -> ArrayData {
        ArrayData::Bool(array)
    }

    fn peek(data: &ArrayData) -> Option<&ArrayD<Self>> {
        match data {
            ArrayData::Bool(a) => Some(a),
            _ => None,
        }
    }

    fn from_le(bytes: &[u8]) -> Self {
        bytes.first().is_some_and(|b| *b != 0)
    }

    fn put_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn to_f64(self) -> f64 {
        f64::from(u8::from(self))
    }

    fn to_i64(self) -> i64 {
        i64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn from_i64(value: i64) -> Self {
        value != 0
    }
}

macro_rules! impl_numeric_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn wrap(array: ArrayD<Self>) -> ArrayData {
                ArrayData::$variant(array)
            }

            fn peek(data: &ArrayData) -> Option<&ArrayD<Self>> {
                match data {
                    ArrayData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn from_le(bytes: &[u8]) -> Self {
                let mut buf = [0_u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[allow(clippy::unnecessary_cast)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[allow(clippy::unnecessary_cast)]
            fn to_i64(self) -> i64 {
                self as i64
            }

            #[allow(clippy::unnecessary_cast)]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            #[allow(clippy::unnecessary_cast)]
            fn from_i64(value: i64) -> Self {
                value as $ty
            }
        }
    };
}

impl_numeric_element!(i32, Int32);
impl_numeric_element!(i64, Int64);
impl_numeric_element!(f32, Float32);
impl_numeric_element!(f64, Float64);

/// A realized array of one of the supported dtypes.
///
/// The leading axis is the row axis that chunk layouts partition. A 0-d
/// array is a single value and counts as one row.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// Boolean elements
    Bool(ArrayD<bool>),
    /// 32-bit integers
    Int32(ArrayD<i32>),
    /// 64-bit integers
    Int64(ArrayD<i64>),
    /// 32-bit floats
    Float32(ArrayD<f32>),
    /// 64-bit floats
    Float64(ArrayD<f64>),
}

/// Run `$body` against the typed array inside `$data`.
macro_rules! with_array {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($arr) => $body,
            ArrayData::Int32($arr) => $body,
            ArrayData::Int64($arr) => $body,
            ArrayData::Float32($arr) => $body,
            ArrayData::Float64($arr) => $body,
        }
    };
}

/// Map the typed array inside `$data` to a new array of the same dtype.
macro_rules! map_same {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($arr) => ArrayData::Bool($body),
            ArrayData::Int32($arr) => ArrayData::Int32($body),
            ArrayData::Int64($arr) => ArrayData::Int64($body),
            ArrayData::Float32($arr) => ArrayData::Float32($body),
            ArrayData::Float64($arr) => ArrayData::Float64($body),
        }
    };
}

pub(crate) use {map_same, with_array};

fn cast_elements<S: Element, T: Element>(array: &ArrayD<S>) -> ArrayD<T> {
    if S::DTYPE.is_float() {
        array.mapv(|x| T::from_f64(x.to_f64()))
    } else {
        array.mapv(|x| T::from_i64(x.to_i64()))
    }
}

fn cast_array<S: Element>(array: &ArrayD<S>, dtype: DType) -> ArrayData {
    match dtype {
        DType::Bool => ArrayData::Bool(cast_elements(array)),
        DType::Int32 => ArrayData::Int32(cast_elements(array)),
        DType::Int64 => ArrayData::Int64(cast_elements(array)),
        DType::Float32 => ArrayData::Float32(cast_elements(array)),
        DType::Float64 => ArrayData::Float64(cast_elements(array)),
    }
}

fn decode_typed<T: Element>(shape: &[usize], bytes: &[u8]) -> Result<ArrayData> {
    let values: Vec<T> = bytes
        .chunks_exact(T::DTYPE.size_bytes())
        .map(T::from_le)
        .collect();
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map(T::wrap)
        .map_err(|e| Error::shape_mismatch("decode", e.to_string()))
}

fn concat_typed<T: Element>(parts: &[&ArrayData], axis: usize) -> Result<ArrayData> {
    let views = parts
        .iter()
        .map(|part| {
            T::peek(part).map(|a| a.view()).ok_or_else(|| {
                Error::dtype(
                    "concatenate",
                    format!("expected {}, found {}", T::DTYPE, part.dtype()),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;
    ndarray::concatenate(NdAxis(axis), &views)
        .map(T::wrap)
        .map_err(|e| Error::shape_mismatch("concatenate", e.to_string()))
}

fn filled<T: Element>(shape: &[usize], value: T) -> ArrayData {
    T::wrap(ArrayD::from_elem(IxDyn(shape), value))
}

impl ArrayData {
    /// Build an array from a shape and row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `values` does not fill `shape`.
    pub fn from_shape_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), values)
            .map(T::wrap)
            .map_err(|e| Error::shape_mismatch("from_shape_vec", e.to_string()))
    }

    /// Build a 1-d array.
    #[must_use]
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        T::wrap(Array1::from_vec(values).into_dyn())
    }

    /// A 0-d array holding one value.
    #[must_use]
    pub fn scalar<T: Element>(value: T) -> Self {
        filled(&[], value)
    }

    /// Array of zeros (or `false`).
    #[must_use]
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        match dtype {
            DType::Bool => filled(shape, false),
            DType::Int32 => filled(shape, 0_i32),
            DType::Int64 => filled(shape, 0_i64),
            DType::Float32 => filled(shape, 0.0_f32),
            DType::Float64 => filled(shape, 0.0_f64),
        }
    }

    /// Array of `value` converted to `dtype`.
    #[must_use]
    pub fn full(dtype: DType, shape: &[usize], value: Scalar) -> Self {
        match dtype {
            DType::Bool => filled(shape, bool::from_scalar(value)),
            DType::Int32 => filled(shape, i32::from_scalar(value)),
            DType::Int64 => filled(shape, i64::from_scalar(value)),
            DType::Float32 => filled(shape, f32::from_scalar(value)),
            DType::Float64 => filled(shape, f64::from_scalar(value)),
        }
    }

    /// Decode little-endian row-major bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the byte count does not match
    /// `shape` and `dtype`.
    pub fn decode(dtype: DType, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        let count: usize = shape.iter().product();
        let expected = count * dtype.size_bytes();
        if bytes.len() != expected {
            return Err(Error::shape_mismatch(
                "decode",
                format!(
                    "expected {expected} bytes for {dtype} {shape:?}, got {}",
                    bytes.len()
                ),
            ));
        }
        match dtype {
            DType::Bool => decode_typed::<bool>(shape, bytes),
            DType::Int32 => decode_typed::<i32>(shape, bytes),
            DType::Int64 => decode_typed::<i64>(shape, bytes),
            DType::Float32 => decode_typed::<f32>(shape, bytes),
            DType::Float64 => decode_typed::<f64>(shape, bytes),
        }
    }

    /// Little-endian row-major encoding.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        with_array!(self, a => {
            for &x in a {
                x.put_le(&mut out);
            }
        });
        out
    }

    /// Element type
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    /// Full shape
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Rows along the leading axis (1 for a 0-d array).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    /// Total number of elements
    #[must_use]
    pub fn num_elements(&self) -> usize {
        with_array!(self, a => a.len())
    }

    /// Borrow the typed array.
    #[must_use]
    pub fn values<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::peek(self)
    }

    /// All elements converted to `f64`, row-major.
    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_array!(self, a => a.iter().map(|x| x.to_f64()).collect())
    }

    /// Same dtype, shape and bit-identical elements (NaN equals NaN).
    #[must_use]
    pub fn bit_eq(&self, other: &Self) -> bool {
        self.dtype() == other.dtype()
            && self.shape() == other.shape()
            && self.to_le_bytes() == other.to_le_bytes()
    }

    /// Convert to another dtype.
    #[must_use]
    pub fn cast(&self, dtype: DType) -> Self {
        if self.dtype() == dtype {
            return self.clone();
        }
        with_array!(self, a => cast_array(a, dtype))
    }

    /// Convert to another dtype, borrowing when nothing changes.
    #[must_use]
    pub fn cast_cow(&self, dtype: DType) -> Cow<'_, Self> {
        if self.dtype() == dtype {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(with_array!(self, a => cast_array(a, dtype)))
        }
    }

    /// Rows `start..end` of the leading axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] for a 0-d array or a range past the end.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        if self.ndim() == 0 || start > end || end > self.rows() {
            return Err(Error::out_of_bounds(
                "slice",
                format!("rows {start}..{end} of shape {:?}", self.shape()),
            ));
        }
        let slice = Slice::from(start..end);
        Ok(map_same!(self, a => a.slice_axis(NdAxis(0), slice).to_owned()))
    }

    /// Take position `index` along `axis`, removing that axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAxis`] or [`Error::OutOfBounds`].
    pub fn select(&self, axis: usize, index: usize) -> Result<Self> {
        let shape = self.shape();
        if axis >= shape.len() {
            return Err(Error::invalid_axis("select", axis, shape.len()));
        }
        if index >= shape[axis] {
            return Err(Error::out_of_bounds(
                "select",
                format!("index {index} on axis {axis} of shape {shape:?}"),
            ));
        }
        Ok(map_same!(self, a => a.index_axis(NdAxis(axis), index).to_owned()))
    }

    /// Same elements, new shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the element count differs.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let target = IxDyn(shape);
        let reshaped = map_same!(self, a => ArrayD::from_shape_vec(
            target.clone(),
            a.iter().copied().collect(),
        )
        .map_err(|e| Error::shape_mismatch("reshape", e.to_string()))?);
        Ok(reshaped)
    }

    /// Join arrays of one dtype along an existing axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] for an empty list or incompatible
    /// shapes, [`Error::Dtype`] if the dtypes differ.
    pub fn concatenate(parts: &[&Self], axis: usize) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(Error::shape_mismatch("concatenate", "no arrays given"));
        };
        match first.dtype() {
            DType::Bool => concat_typed::<bool>(parts, axis),
            DType::Int32 => concat_typed::<i32>(parts, axis),
            DType::Int64 => concat_typed::<i64>(parts, axis),
            DType::Float32 => concat_typed::<f32>(parts, axis),
            DType::Float64 => concat_typed::<f64>(parts, axis),
        }
    }
}

impl SizeBytes for ArrayData {
    fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype().size_bytes()
    }
}

impl<T: Element> From<Vec<T>> for ArrayData {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian() {
        let bytes: Vec<u8> = [1.5_f64, -2.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let data = ArrayData::decode(DType::Float64, &[2], &bytes).unwrap();
        assert_eq!(data, ArrayData::from_vec(vec![1.5_f64, -2.0]));
        assert_eq!(data.to_le_bytes(), bytes);
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let err = ArrayData::decode(DType::Int32, &[3], &[0; 8]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_cast_truncates_and_widens() {
        let data = ArrayData::from_vec(vec![1.9_f64, -1.9, 0.0]);
        let ints = data.cast(DType::Int32);
        assert_eq!(ints, ArrayData::from_vec(vec![1_i32, -1, 0]));
        let flags = data.cast(DType::Bool);
        assert_eq!(flags, ArrayData::from_vec(vec![true, true, false]));
        let back = ArrayData::from_vec(vec![true, false]).cast(DType::Float32);
        assert_eq!(back, ArrayData::from_vec(vec![1.0_f32, 0.0]));
    }

    #[test]
    fn test_slice_select_reshape() {
        let data = ArrayData::from_shape_vec(&[3, 2], vec![0_i64, 1, 2, 3, 4, 5]).unwrap();
        let rows = data.slice_rows(1, 3).unwrap();
        assert_eq!(rows.shape(), &[2, 2]);
        assert_eq!(rows.to_f64_vec(), vec![2.0, 3.0, 4.0, 5.0]);

        let column = data.select(1, 1).unwrap();
        assert_eq!(column, ArrayData::from_vec(vec![1_i64, 3, 5]));

        let flat = data.reshape(&[6]).unwrap();
        assert_eq!(flat.shape(), &[6]);
        assert!(data.reshape(&[4]).is_err());
        assert!(data.select(1, 2).is_err());
        assert!(data.slice_rows(2, 4).is_err());
    }

    #[test]
    fn test_concatenate_rows() {
        let a = ArrayData::from_vec(vec![1_i32, 2]);
        let b = ArrayData::from_vec(vec![3_i32]);
        let joined = ArrayData::concatenate(&[&a, &b], 0).unwrap();
        assert_eq!(joined, ArrayData::from_vec(vec![1_i32, 2, 3]));

        let c = ArrayData::from_vec(vec![1.0_f32]);
        assert!(matches!(
            ArrayData::concatenate(&[&a, &c], 0),
            Err(Error::Dtype { .. })
        ));
    }

    #[test]
    fn test_size_and_rows() {
        let data = ArrayData::zeros(DType::Float32, &[4, 3]);
        assert_eq!(data.size_bytes(), 48);
        assert_eq!(data.rows(), 4);
        let scalar = ArrayData::scalar(2.0_f64);
        assert_eq!(scalar.rows(), 1);
        assert_eq!(scalar.ndim(), 0);
        assert_eq!(scalar.size_bytes(), 8);
    }

    #[test]
    fn test_bit_eq_treats_nan_as_equal() {
        let a = ArrayData::from_vec(vec![f64::NAN, 1.0]);
        let b = ArrayData::from_vec(vec![f64::NAN, 1.0]);
        assert_ne!(a, b);
        assert!(a.bit_eq(&b));
    }
}
