//! Chunk-level kernels for elementwise operations and reductions

use crate::data::{ArrayData, Element, with_array};
use crate::dtype::{DType, Scalar};
use crate::node::{ArithOp, CompareOp, MapOp, ReduceKind, UnaryOp};
use ndarray::{ArrayD, ArrayViewD, Axis as NdAxis, IxDyn};
use std::fmt;

/// Failure inside a kernel; the evaluator attaches the failing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelError(String);

impl KernelError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ndarray::ShapeError> for KernelError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self(err.to_string())
    }
}

type KernelResult<T> = Result<T, KernelError>;

/// Element types that support arithmetic.
pub(crate) trait Numeric: Element {
    const ZERO: Self;

    fn plus(self, rhs: Self) -> Self;
    fn minus(self, rhs: Self) -> Self;
    fn times(self, rhs: Self) -> Self;
    fn divide(self, rhs: Self) -> KernelResult<Self>;
    fn power(self, rhs: Self) -> KernelResult<Self>;
    fn negate(self) -> Self;
    fn absolute(self) -> Self;
    fn min_of(self, rhs: Self) -> Self;
    fn max_of(self, rhs: Self) -> Self;
}

macro_rules! impl_integer {
    ($ty:ty) => {
        impl Numeric for $ty {
            const ZERO: Self = 0;

            fn plus(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn minus(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            fn times(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn divide(self, rhs: Self) -> KernelResult<Self> {
                self.checked_div(rhs)
                    .ok_or_else(|| KernelError::new("integer division by zero"))
            }

            fn power(self, rhs: Self) -> KernelResult<Self> {
                if rhs < 0 {
                    return Err(KernelError::new(
                        "integers to negative integer powers are not allowed",
                    ));
                }
                u32::try_from(rhs)
                    .map(|exp| self.wrapping_pow(exp))
                    .map_err(|_| KernelError::new(format!("exponent {rhs} is too large")))
            }

            fn negate(self) -> Self {
                self.wrapping_neg()
            }

            fn absolute(self) -> Self {
                self.wrapping_abs()
            }

            fn min_of(self, rhs: Self) -> Self {
                Ord::min(self, rhs)
            }

            fn max_of(self, rhs: Self) -> Self {
                Ord::max(self, rhs)
            }
        }
    };
}

macro_rules! impl_float {
    ($ty:ty) => {
        impl Numeric for $ty {
            const ZERO: Self = 0.0;

            fn plus(self, rhs: Self) -> Self {
                self + rhs
            }

            fn minus(self, rhs: Self) -> Self {
                self - rhs
            }

            fn times(self, rhs: Self) -> Self {
                self * rhs
            }

            fn divide(self, rhs: Self) -> KernelResult<Self> {
                Ok(self / rhs)
            }

            fn power(self, rhs: Self) -> KernelResult<Self> {
                Ok(self.powf(rhs))
            }

            fn negate(self) -> Self {
                -self
            }

            fn absolute(self) -> Self {
                self.abs()
            }

            fn min_of(self, rhs: Self) -> Self {
                if self.is_nan() || rhs.is_nan() {
                    <$ty>::NAN
                } else {
                    self.min(rhs)
                }
            }

            fn max_of(self, rhs: Self) -> Self {
                if self.is_nan() || rhs.is_nan() {
                    <$ty>::NAN
                } else {
                    self.max(rhs)
                }
            }
        }
    };
}

impl_integer!(i32);
impl_integer!(i64);
impl_float!(f32);
impl_float!(f64);

fn map_elements<T: Element, U: Element>(
    array: &ArrayD<T>,
    f: impl Fn(T) -> KernelResult<U>,
) -> KernelResult<ArrayD<U>> {
    let values = array
        .iter()
        .map(|&x| f(x))
        .collect::<KernelResult<Vec<U>>>()?;
    Ok(ArrayD::from_shape_vec(array.raw_dim(), values)?)
}

fn zip_elements<T: Element, U: Element>(
    lhs: &ArrayD<T>,
    rhs: &ArrayD<T>,
    f: impl Fn(T, T) -> KernelResult<U>,
) -> KernelResult<ArrayD<U>> {
    if lhs.shape() != rhs.shape() {
        return Err(KernelError::new(format!(
            "operand chunks differ in shape: {:?} vs {:?}",
            lhs.shape(),
            rhs.shape()
        )));
    }
    let values = lhs
        .iter()
        .zip(rhs.iter())
        .map(|(&x, &y)| f(x, y))
        .collect::<KernelResult<Vec<U>>>()?;
    Ok(ArrayD::from_shape_vec(lhs.raw_dim(), values)?)
}

fn apply_arith<T: Numeric>(op: ArithOp, x: T, y: T) -> KernelResult<T> {
    match op {
        ArithOp::Add => Ok(x.plus(y)),
        ArithOp::Sub => Ok(x.minus(y)),
        ArithOp::Mul => Ok(x.times(y)),
        ArithOp::Div => x.divide(y),
        ArithOp::Pow => x.power(y),
    }
}

fn apply_compare<T: PartialOrd>(op: CompareOp, x: T, y: T) -> bool {
    match op {
        CompareOp::Eq => x == y,
        CompareOp::Ne => x != y,
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    }
}

fn arith_typed<T: Numeric>(
    op: ArithOp,
    lhs: &ArrayD<T>,
    rhs: Option<&ArrayData>,
    scalar: Option<Scalar>,
) -> KernelResult<ArrayData> {
    let out = match (rhs, scalar) {
        (_, Some(scalar)) => {
            let y = T::from_scalar(scalar);
            map_elements(lhs, |x| apply_arith(op, x, y))?
        }
        (Some(rhs), None) => {
            let rhs = T::peek(rhs).ok_or_else(|| operand_mismatch(T::DTYPE, rhs.dtype()))?;
            zip_elements(lhs, rhs, |x, y| apply_arith(op, x, y))?
        }
        (None, None) => return Err(KernelError::new("missing right-hand operand")),
    };
    Ok(T::wrap(out))
}

fn compare_typed<T: Element>(
    op: CompareOp,
    lhs: &ArrayD<T>,
    rhs: Option<&ArrayData>,
    scalar: Option<Scalar>,
) -> KernelResult<ArrayData> {
    let out = match (rhs, scalar) {
        (_, Some(scalar)) => {
            let y = T::from_scalar(scalar);
            map_elements(lhs, |x| Ok(apply_compare(op, x, y)))?
        }
        (Some(rhs), None) => {
            let rhs = T::peek(rhs).ok_or_else(|| operand_mismatch(T::DTYPE, rhs.dtype()))?;
            zip_elements(lhs, rhs, |x, y| Ok(apply_compare(op, x, y)))?
        }
        (None, None) => return Err(KernelError::new("missing right-hand operand")),
    };
    Ok(ArrayData::Bool(out))
}

fn operand_mismatch(expected: DType, found: DType) -> KernelError {
    KernelError::new(format!("expected {expected} operand, found {found}"))
}

fn not_numeric(what: &str) -> KernelError {
    KernelError::new(format!("{what} is not defined for bool"))
}

/// Apply an elementwise operation to one chunk of each input.
pub(crate) fn apply_map(op: &MapOp, inputs: &[&ArrayData]) -> KernelResult<ArrayData> {
    let Some(first) = inputs.first() else {
        return Err(KernelError::new("elementwise operation without input"));
    };
    match *op {
        MapOp::Arith {
            op,
            scalar,
            operand,
        } => {
            let lhs = first.cast_cow(operand);
            let rhs = inputs.get(1).map(|rhs| rhs.cast_cow(operand));
            let rhs = rhs.as_deref();
            match &*lhs {
                ArrayData::Int32(a) => arith_typed(op, a, rhs, scalar),
                ArrayData::Int64(a) => arith_typed(op, a, rhs, scalar),
                ArrayData::Float32(a) => arith_typed(op, a, rhs, scalar),
                ArrayData::Float64(a) => arith_typed(op, a, rhs, scalar),
                ArrayData::Bool(_) => Err(not_numeric(op.name())),
            }
        }
        MapOp::Compare {
            op,
            scalar,
            operand,
        } => {
            let lhs = first.cast_cow(operand);
            let rhs = inputs.get(1).map(|rhs| rhs.cast_cow(operand));
            let rhs = rhs.as_deref();
            with_array!(&*lhs, a => compare_typed(op, a, rhs, scalar))
        }
        MapOp::Unary(op) => apply_unary(op, first),
        MapOp::Cast(dtype) => Ok(first.cast(dtype)),
    }
}

fn apply_unary(op: UnaryOp, input: &ArrayData) -> KernelResult<ArrayData> {
    fn numeric<T: Numeric>(op: UnaryOp, a: &ArrayD<T>) -> ArrayData {
        match op {
            UnaryOp::Abs => T::wrap(a.mapv(T::absolute)),
            _ => T::wrap(a.mapv(T::negate)),
        }
    }
    match (op, input) {
        (UnaryOp::Not, ArrayData::Bool(a)) => Ok(ArrayData::Bool(a.mapv(|x| !x))),
        (UnaryOp::Not, other) => Err(KernelError::new(format!(
            "not is only defined for bool, found {}",
            other.dtype()
        ))),
        (_, ArrayData::Bool(_)) => Err(not_numeric(op.name())),
        (_, ArrayData::Int32(a)) => Ok(numeric(op, a)),
        (_, ArrayData::Int64(a)) => Ok(numeric(op, a)),
        (_, ArrayData::Float32(a)) => Ok(numeric(op, a)),
        (_, ArrayData::Float64(a)) => Ok(numeric(op, a)),
    }
}

/// Reduction applied along the lanes of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneReduce {
    Min,
    Max,
    Sum,
}

fn fold_lane<T: Numeric>(kind: LaneReduce, lane: impl Iterator<Item = T>) -> Option<T> {
    match kind {
        LaneReduce::Sum => Some(lane.fold(T::ZERO, T::plus)),
        LaneReduce::Min => lane.reduce(T::min_of),
        LaneReduce::Max => lane.reduce(T::max_of),
    }
}

fn reduce_view<T: Numeric>(
    kind: LaneReduce,
    view: &ArrayViewD<'_, T>,
    axis: usize,
) -> KernelResult<ArrayD<T>> {
    let lanes = view.map_axis(NdAxis(axis), |lane| fold_lane(kind, lane.iter().copied()));
    if lanes.iter().any(Option::is_none) {
        let name = if kind == LaneReduce::Min { "min" } else { "max" };
        return Err(KernelError::new(format!(
            "zero-size array to reduction operation {name} which has no identity"
        )));
    }
    Ok(lanes.mapv(|value| value.unwrap_or(T::ZERO)))
}

fn reduce_typed<T: Numeric>(
    kind: LaneReduce,
    array: &ArrayD<T>,
    axis: Option<usize>,
) -> KernelResult<ArrayD<T>> {
    match axis {
        Some(axis) => reduce_view(kind, &array.view(), axis),
        None => {
            let flat = ArrayD::from_shape_vec(IxDyn(&[array.len()]), array.iter().copied().collect())?;
            reduce_view(kind, &flat.view(), 0)
        }
    }
}

fn reduce_lanes(kind: LaneReduce, data: &ArrayData, axis: Option<usize>) -> KernelResult<ArrayData> {
    if let Some(axis) = axis {
        if axis >= data.ndim() {
            return Err(KernelError::new(format!(
                "axis {axis} out of range for shape {:?}",
                data.shape()
            )));
        }
    }
    match data {
        ArrayData::Bool(_) => Err(not_numeric("reduction")),
        ArrayData::Int32(a) => Ok(ArrayData::Int32(reduce_typed(kind, a, axis)?)),
        ArrayData::Int64(a) => Ok(ArrayData::Int64(reduce_typed(kind, a, axis)?)),
        ArrayData::Float32(a) => Ok(ArrayData::Float32(reduce_typed(kind, a, axis)?)),
        ArrayData::Float64(a) => Ok(ArrayData::Float64(reduce_typed(kind, a, axis)?)),
    }
}

fn divide_by(data: &ArrayData, count: usize) -> KernelResult<ArrayData> {
    let count = count as f64;
    match data {
        ArrayData::Float64(a) => Ok(ArrayData::Float64(a.mapv(|x| x / count))),
        other => Err(operand_mismatch(DType::Float64, other.dtype())),
    }
}

/// Reduce one chunk along `axis` (`None` for every element).
///
/// `mean` yields the `float64` sum, leaving the division to whoever knows
/// the element count.
pub(crate) fn reduce_partial(
    kind: ReduceKind,
    data: &ArrayData,
    axis: Option<usize>,
) -> KernelResult<ArrayData> {
    match kind {
        ReduceKind::Min => reduce_lanes(LaneReduce::Min, data, axis),
        ReduceKind::Max => reduce_lanes(LaneReduce::Max, data, axis),
        ReduceKind::Sum => {
            let widened = data.cast_cow(data.dtype().sum_type());
            reduce_lanes(LaneReduce::Sum, &widened, axis)
        }
        ReduceKind::Mean => {
            let widened = data.cast_cow(DType::Float64);
            reduce_lanes(LaneReduce::Sum, &widened, axis)
        }
    }
}

/// Reduce one chunk along a trailing axis; the result keeps the chunk's rows.
pub(crate) fn reduce_local(kind: ReduceKind, data: &ArrayData, axis: usize) -> KernelResult<ArrayData> {
    let partial = reduce_partial(kind, data, Some(axis))?;
    if kind == ReduceKind::Mean {
        let len = data.shape().get(axis).copied().unwrap_or(1);
        divide_by(&partial, len)
    } else {
        Ok(partial)
    }
}

fn stack_typed<T: Element>(parts: &[&ArrayData]) -> KernelResult<ArrayD<T>> {
    let views = parts
        .iter()
        .map(|part| {
            T::peek(part)
                .map(|a| a.view())
                .ok_or_else(|| operand_mismatch(T::DTYPE, part.dtype()))
        })
        .collect::<KernelResult<Vec<_>>>()?;
    Ok(ndarray::stack(NdAxis(0), &views)?)
}

/// Combine per-chunk partials, in chunk order, into the final reduction.
///
/// `count` is the number of elements that fed each output element and is
/// only used by `mean`. With no partials at all, `sum` yields zeros, `mean`
/// NaN, and `min`/`max` fail.
pub(crate) fn combine_partials(
    kind: ReduceKind,
    partials: &[&ArrayData],
    count: usize,
    dtype: DType,
    shape: &[usize],
) -> KernelResult<ArrayData> {
    let Some(first) = partials.first() else {
        return match kind {
            ReduceKind::Sum => Ok(ArrayData::zeros(dtype, shape)),
            ReduceKind::Mean => Ok(ArrayData::full(DType::Float64, shape, Scalar::Float(f64::NAN))),
            ReduceKind::Min | ReduceKind::Max => Err(KernelError::new(format!(
                "zero-size array to reduction operation {} which has no identity",
                kind.name()
            ))),
        };
    };
    let stacked = match first.dtype() {
        DType::Bool => ArrayData::Bool(stack_typed(partials)?),
        DType::Int32 => ArrayData::Int32(stack_typed(partials)?),
        DType::Int64 => ArrayData::Int64(stack_typed(partials)?),
        DType::Float32 => ArrayData::Float32(stack_typed(partials)?),
        DType::Float64 => ArrayData::Float64(stack_typed(partials)?),
    };
    let lane = match kind {
        ReduceKind::Min => LaneReduce::Min,
        ReduceKind::Max => LaneReduce::Max,
        ReduceKind::Sum | ReduceKind::Mean => LaneReduce::Sum,
    };
    let reduced = reduce_lanes(lane, &stacked, Some(0))?;
    if kind == ReduceKind::Mean {
        divide_by(&reduced, count)
    } else {
        Ok(reduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith(op: ArithOp, operand: DType, scalar: Option<Scalar>) -> MapOp {
        MapOp::Arith {
            op,
            scalar,
            operand,
        }
    }

    #[test]
    fn test_arith_with_promotion() {
        let a = ArrayData::from_vec(vec![1_i32, 2, 3]);
        let b = ArrayData::from_vec(vec![0.5_f64, 0.5, 0.5]);
        let out = apply_map(&arith(ArithOp::Add, DType::Float64, None), &[&a, &b]).unwrap();
        assert_eq!(out, ArrayData::from_vec(vec![1.5_f64, 2.5, 3.5]));
    }

    #[test]
    fn test_true_division_of_integers() {
        let a = ArrayData::from_vec(vec![1_i64, 3]);
        let b = ArrayData::from_vec(vec![2_i64, 0]);
        let out = apply_map(&arith(ArithOp::Div, DType::Float64, None), &[&a, &b]).unwrap();
        let values = out.to_f64_vec();
        assert_eq!(values[0], 0.5);
        assert!(values[1].is_infinite());
    }

    #[test]
    fn test_scalar_operands() {
        let a = ArrayData::from_vec(vec![1.0_f32, 2.0]);
        let out = apply_map(
            &arith(ArithOp::Mul, DType::Float32, Some(Scalar::Int(3))),
            &[&a],
        )
        .unwrap();
        assert_eq!(out, ArrayData::from_vec(vec![3.0_f32, 6.0]));

        let ints = ArrayData::from_vec(vec![2_i32, 3]);
        let squared = apply_map(
            &arith(ArithOp::Pow, DType::Int32, Some(Scalar::Int(2))),
            &[&ints],
        )
        .unwrap();
        assert_eq!(squared, ArrayData::from_vec(vec![4_i32, 9]));
    }

    #[test]
    fn test_negative_integer_power_fails() {
        let ints = ArrayData::from_vec(vec![2_i64]);
        let err = apply_map(
            &arith(ArithOp::Pow, DType::Int64, Some(Scalar::Int(-1))),
            &[&ints],
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_compare_and_not() {
        let a = ArrayData::from_vec(vec![1.0_f64, f64::NAN, 3.0]);
        let cmp = MapOp::Compare {
            op: CompareOp::Gt,
            scalar: Some(Scalar::Float(1.5)),
            operand: DType::Float64,
        };
        let mask = apply_map(&cmp, &[&a]).unwrap();
        assert_eq!(mask, ArrayData::from_vec(vec![false, false, true]));
        let inverted = apply_map(&MapOp::Unary(UnaryOp::Not), &[&mask]).unwrap();
        assert_eq!(inverted, ArrayData::from_vec(vec![true, true, false]));
    }

    #[test]
    fn test_unary_numeric() {
        let a = ArrayData::from_vec(vec![-2_i32, 5]);
        assert_eq!(
            apply_map(&MapOp::Unary(UnaryOp::Abs), &[&a]).unwrap(),
            ArrayData::from_vec(vec![2_i32, 5])
        );
        assert_eq!(
            apply_map(&MapOp::Unary(UnaryOp::Neg), &[&a]).unwrap(),
            ArrayData::from_vec(vec![2_i32, -5])
        );
    }

    #[test]
    fn test_partial_and_combine() {
        let a = ArrayData::from_shape_vec(&[2, 2], vec![1_i32, 5, 3, 2]).unwrap();
        let b = ArrayData::from_shape_vec(&[1, 2], vec![-1_i32, 9]).unwrap();

        let pa = reduce_partial(ReduceKind::Min, &a, Some(0)).unwrap();
        let pb = reduce_partial(ReduceKind::Min, &b, Some(0)).unwrap();
        let min = combine_partials(ReduceKind::Min, &[&pa, &pb], 3, DType::Int32, &[2]).unwrap();
        assert_eq!(min, ArrayData::from_vec(vec![-1_i32, 2]));

        let sa = reduce_partial(ReduceKind::Sum, &a, None).unwrap();
        let sb = reduce_partial(ReduceKind::Sum, &b, None).unwrap();
        assert_eq!(sa.dtype(), DType::Int64);
        let sum = combine_partials(ReduceKind::Sum, &[&sa, &sb], 6, DType::Int64, &[]).unwrap();
        assert_eq!(sum, ArrayData::scalar(19_i64));

        let ma = reduce_partial(ReduceKind::Mean, &a, None).unwrap();
        let mb = reduce_partial(ReduceKind::Mean, &b, None).unwrap();
        let mean = combine_partials(ReduceKind::Mean, &[&ma, &mb], 6, DType::Float64, &[]).unwrap();
        assert_eq!(mean.to_f64_vec(), vec![19.0 / 6.0]);
    }

    #[test]
    fn test_nan_propagates_through_min() {
        let a = ArrayData::from_vec(vec![1.0_f64, f64::NAN, -3.0]);
        let min = reduce_partial(ReduceKind::Min, &a, None).unwrap();
        assert!(min.to_f64_vec()[0].is_nan());
    }

    #[test]
    fn test_empty_reductions() {
        assert!(combine_partials(ReduceKind::Max, &[], 0, DType::Float64, &[]).is_err());
        let sum = combine_partials(ReduceKind::Sum, &[], 0, DType::Int64, &[]).unwrap();
        assert_eq!(sum, ArrayData::scalar(0_i64));

        let empty_rows = ArrayData::zeros(DType::Float64, &[2, 0]);
        assert!(reduce_local(ReduceKind::Min, &empty_rows, 1).is_err());
    }

    #[test]
    fn test_local_mean() {
        let a = ArrayData::from_shape_vec(&[2, 3], vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mean = reduce_local(ReduceKind::Mean, &a, 1).unwrap();
        assert_eq!(mean, ArrayData::from_vec(vec![2.0_f64, 5.0]));
    }
}
