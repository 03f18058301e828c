//! Deferred computation nodes
//!
//! A [`TaskNode`] records one operation over its input nodes. Shape, dtype
//! and chunk layout are worked out when the node is built, so invalid
//! expressions fail immediately rather than at evaluation time. Nodes are
//! immutable and shared through [`NodeRef`]; identical subexpressions get
//! identical fingerprints.

use crate::dtype::{DType, Scalar};
use crate::layout::{ChunkLayout, ChunkPiece};
use crate::storage::StorageBackend;
use crate::{Error, Result};
use lazycat_task_graph::{Fingerprint, FingerprintBuilder};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Shared handle to a node
pub type NodeRef = Arc<TaskNode>;

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// True division, always producing floats
    Div,
    /// `a ** b`
    Pow,
}

impl ArithOp {
    /// Lowercase operator name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Pow => "pow",
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `a == b`
    Eq,
    /// `a != b`
    Ne,
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
    /// `a > b`
    Gt,
    /// `a >= b`
    Ge,
}

impl CompareOp {
    /// Lowercase operator name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }

    const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Absolute value
    Abs,
    /// Logical not (bool only)
    Not,
}

impl UnaryOp {
    /// Lowercase operator name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Not => "not",
        }
    }
}

/// Reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    /// Smallest element, NaN propagating
    Min,
    /// Largest element, NaN propagating
    Max,
    /// Sum, accumulated in `int64` for integers
    Sum,
    /// Arithmetic mean in `float64`
    Mean,
}

impl ReduceKind {
    /// Lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Mean => "mean",
        }
    }

    /// Dtype of the reduction over `input`, `None` if unsupported.
    #[must_use]
    pub const fn output_dtype(self, input: DType) -> Option<DType> {
        match (self, input) {
            (Self::Min | Self::Max, DType::Bool) => None,
            (Self::Min | Self::Max, dtype) => Some(dtype),
            (Self::Sum, dtype) => Some(dtype.sum_type()),
            (Self::Mean, _) => Some(DType::Float64),
        }
    }
}

/// Axis of a reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Every element
    All,
    /// One axis; axis 0 reduces across chunks
    Index(usize),
}

impl From<usize> for Axis {
    fn from(axis: usize) -> Self {
        Self::Index(axis)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Index(axis) => write!(f, "{axis}"),
        }
    }
}

/// Elementwise operation of a map node.
///
/// `operand` is the dtype both sides are converted to before the kernel
/// runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapOp {
    /// Arithmetic between two arrays, or an array and a scalar
    Arith {
        /// Operator
        op: ArithOp,
        /// Right-hand scalar; `None` when the right side is an array
        scalar: Option<Scalar>,
        /// Computation dtype
        operand: DType,
    },
    /// Comparison producing `bool`
    Compare {
        /// Operator
        op: CompareOp,
        /// Right-hand scalar; `None` when the right side is an array
        scalar: Option<Scalar>,
        /// Computation dtype
        operand: DType,
    },
    /// Unary operator
    Unary(UnaryOp),
    /// Dtype conversion
    Cast(DType),
}

impl MapOp {
    fn feed(&self, builder: FingerprintBuilder) -> FingerprintBuilder {
        let with_scalar = |builder: FingerprintBuilder, scalar: &Option<Scalar>| match scalar {
            None => builder.str("array"),
            Some(Scalar::Bool(v)) => builder.str("bool").bool(*v),
            Some(Scalar::Int(v)) => builder.str("int").i64(*v),
            Some(Scalar::Float(v)) => builder.str("float").f64(*v),
        };
        match self {
            Self::Arith {
                op,
                scalar,
                operand,
            } => with_scalar(builder.str("arith").str(op.name()), scalar).str(operand.name()),
            Self::Compare {
                op,
                scalar,
                operand,
            } => with_scalar(builder.str("compare").str(op.name()), scalar).str(operand.name()),
            Self::Unary(op) => builder.str("unary").str(op.name()),
            Self::Cast(dtype) => builder.str("cast").str(dtype.name()),
        }
    }
}

impl fmt::Display for MapOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arith {
                op, scalar: None, ..
            } => f.write_str(op.name()),
            Self::Arith {
                op,
                scalar: Some(s),
                ..
            } => write!(f, "{} {s}", op.name()),
            Self::Compare {
                op, scalar: None, ..
            } => f.write_str(op.name()),
            Self::Compare {
                op,
                scalar: Some(s),
                ..
            } => write!(f, "{} {s}", op.name()),
            Self::Unary(op) => f.write_str(op.name()),
            Self::Cast(dtype) => write!(f, "cast {dtype}"),
        }
    }
}

/// Leaf read of one column row range.
#[derive(Clone)]
pub struct ReadSpec {
    /// Backend serving the column
    pub storage: Arc<dyn StorageBackend>,
    /// File name within the backend
    pub file: String,
    /// Column name
    pub column: String,
    /// Rows of the file to expose
    pub rows: Range<usize>,
    /// Element type
    pub dtype: DType,
    /// Shape of one row
    pub trailing: Vec<usize>,
    /// [`crate::FileSchema::generation`] of the file when the read was built
    pub generation: u64,
}

impl ReadSpec {
    /// Encoded bytes per row
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.trailing.iter().product::<usize>() * self.dtype.size_bytes()
    }
}

impl fmt::Debug for ReadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSpec")
            .field("storage", &self.storage.id())
            .field("file", &self.file)
            .field("column", &self.column)
            .field("rows", &self.rows)
            .field("dtype", &self.dtype)
            .field("trailing", &self.trailing)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Operation recorded by a node.
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// Leaf column read
    Read(ReadSpec),
    /// Elementwise operation over one or two row-aligned inputs
    Map(MapOp),
    /// Reduction of the single input
    Reduce {
        /// Reduction
        kind: ReduceKind,
        /// Axis reduced
        axis: Axis,
    },
    /// Row range of the leading axis
    Slice {
        /// First row
        start: usize,
        /// One past the last row
        stop: usize,
        /// Source chunk behind each output chunk
        pieces: Arc<[ChunkPiece]>,
    },
    /// Fixed position along a trailing axis
    Select {
        /// Axis (at least 1)
        axis: usize,
        /// Position along that axis
        index: usize,
    },
    /// New trailing shape with the same rows
    Reshape {
        /// Shape of one row
        trailing: Vec<usize>,
    },
    /// Concatenation of the inputs
    Concat {
        /// Axis joined along
        axis: usize,
    },
}

impl OperationKind {
    /// Short operation name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Map(_) => "map",
            Self::Reduce { .. } => "reduce",
            Self::Slice { .. } => "slice",
            Self::Select { .. } => "select",
            Self::Reshape { .. } => "reshape",
            Self::Concat { .. } => "concat",
        }
    }

    fn feed(&self, builder: FingerprintBuilder) -> FingerprintBuilder {
        match self {
            Self::Read(spec) => builder
                .str(spec.storage.id())
                .str(&spec.file)
                .u64(spec.generation)
                .str(&spec.column)
                .usize(spec.rows.start)
                .usize(spec.rows.end)
                .str(spec.dtype.name())
                .usizes(&spec.trailing),
            Self::Map(op) => op.feed(builder),
            Self::Reduce { kind, axis } => {
                let builder = builder.str(kind.name());
                match axis {
                    Axis::All => builder.str("all"),
                    Axis::Index(k) => builder.str("axis").usize(*k),
                }
            }
            Self::Slice { start, stop, .. } => builder.usize(*start).usize(*stop),
            Self::Select { axis, index } => builder.usize(*axis).usize(*index),
            Self::Reshape { trailing } => builder.usizes(trailing),
            Self::Concat { axis } => builder.usize(*axis),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(spec) => write!(f, "read({}:{})", spec.file, spec.column),
            Self::Map(op) => write!(f, "map({op})"),
            Self::Reduce { kind, axis } => write!(f, "reduce({}, axis={axis})", kind.name()),
            Self::Slice { start, stop, .. } => write!(f, "slice({start}..{stop})"),
            Self::Select { axis, index } => write!(f, "select(axis={axis}, index={index})"),
            Self::Reshape { trailing } => write!(f, "reshape({trailing:?})"),
            Self::Concat { axis } => write!(f, "concat(axis={axis})"),
        }
    }
}

/// One deferred computation.
#[derive(Debug)]
pub struct TaskNode {
    operation: OperationKind,
    inputs: Vec<NodeRef>,
    shape: Vec<usize>,
    dtype: DType,
    layout: ChunkLayout,
    fingerprint: Fingerprint,
}

impl TaskNode {
    fn build(
        operation: OperationKind,
        inputs: Vec<NodeRef>,
        shape: Vec<usize>,
        dtype: DType,
        layout: ChunkLayout,
    ) -> NodeRef {
        let builder = operation.feed(Fingerprint::builder(operation.name()));
        let fingerprint = inputs
            .iter()
            .fold(builder, |b, input| b.fingerprint(&input.fingerprint))
            .usizes(&shape)
            .str(dtype.name())
            .usizes(layout.offsets())
            .finish();
        Arc::new(Self {
            operation,
            inputs,
            shape,
            dtype,
            layout,
            fingerprint,
        })
    }

    /// Operation of this node
    #[must_use]
    pub const fn operation(&self) -> &OperationKind {
        &self.operation
    }

    /// Input nodes, in operand order
    #[must_use]
    pub fn inputs(&self) -> &[NodeRef] {
        &self.inputs
    }

    /// Full result shape
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Result dtype
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Chunk layout of the result's leading axis
    #[must_use]
    pub const fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Structural identity
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Whether chunk results of this node are worth keeping in the cache.
    ///
    /// Views and conversions are cheap to recompute from cached inputs, so
    /// only reads, arithmetic and reductions are stored.
    #[must_use]
    pub const fn is_cacheable(&self) -> bool {
        match &self.operation {
            OperationKind::Read(_) | OperationKind::Reduce { .. } => true,
            OperationKind::Map(MapOp::Cast(_)) => false,
            OperationKind::Map(_) => true,
            OperationKind::Slice { .. }
            | OperationKind::Select { .. }
            | OperationKind::Reshape { .. }
            | OperationKind::Concat { .. } => false,
        }
    }

    /// Shape of chunk `index` of the result.
    #[must_use]
    pub fn chunk_shape(&self, index: usize) -> Vec<usize> {
        let mut shape = self.shape.clone();
        if let (Some(rows), Some(chunk)) = (shape.first_mut(), self.layout.chunk(index)) {
            *rows = chunk.len();
        }
        shape
    }

    /// Leaf read of `spec`, chunked every `chunk_rows` rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] for a zero chunk size and
    /// [`Error::OutOfBounds`] for a reversed row range.
    pub fn read(spec: ReadSpec, chunk_rows: usize) -> Result<NodeRef> {
        let layout = Self::read_layout(&spec, chunk_rows)?;
        Self::read_with_layout(spec, layout)
    }

    fn read_layout(spec: &ReadSpec, chunk_rows: usize) -> Result<ChunkLayout> {
        if spec.rows.start > spec.rows.end {
            return Err(Error::out_of_bounds(
                "read",
                format!("reversed rows {}..{}", spec.rows.start, spec.rows.end),
            ));
        }
        ChunkLayout::uniform(spec.rows.len(), chunk_rows)
    }

    /// Leaf read of `spec` with an explicit layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the layout does not cover exactly
    /// the requested rows.
    pub fn read_with_layout(spec: ReadSpec, layout: ChunkLayout) -> Result<NodeRef> {
        if spec.rows.start > spec.rows.end || layout.total_rows() != spec.rows.len() {
            return Err(Error::shape_mismatch(
                "read",
                format!(
                    "layout covers {} rows, read covers {}..{}",
                    layout.total_rows(),
                    spec.rows.start,
                    spec.rows.end
                ),
            ));
        }
        let mut shape = vec![spec.rows.len()];
        shape.extend_from_slice(&spec.trailing);
        let dtype = spec.dtype;
        Ok(Self::build(
            OperationKind::Read(spec),
            Vec::new(),
            shape,
            dtype,
            layout,
        ))
    }

    fn check_aligned(operation: &str, lhs: &NodeRef, rhs: &NodeRef) -> Result<()> {
        if lhs.shape != rhs.shape {
            return Err(Error::shape_mismatch(
                operation,
                format!("{:?} vs {:?}", lhs.shape, rhs.shape),
            ));
        }
        if lhs.layout != rhs.layout {
            return Err(Error::shape_mismatch(
                operation,
                format!(
                    "chunk layouts differ: {:?} vs {:?}",
                    lhs.layout.offsets(),
                    rhs.layout.offsets()
                ),
            ));
        }
        Ok(())
    }

    fn elementwise(input: &NodeRef, op: MapOp, rhs: Option<&NodeRef>, dtype: DType) -> NodeRef {
        let mut inputs = vec![Arc::clone(input)];
        inputs.extend(rhs.cloned());
        Self::build(
            OperationKind::Map(op),
            inputs,
            input.shape.clone(),
            dtype,
            input.layout.clone(),
        )
    }

    /// Elementwise arithmetic of two arrays with equal shapes and layouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] or [`Error::Dtype`] (booleans do not
    /// support arithmetic).
    pub fn arith(lhs: &NodeRef, rhs: &NodeRef, op: ArithOp) -> Result<NodeRef> {
        Self::check_aligned(op.name(), lhs, rhs)?;
        let promoted = lhs.dtype.promote(rhs.dtype).ok_or_else(|| {
            Error::dtype(
                op.name(),
                format!("no arithmetic between {} and {}", lhs.dtype, rhs.dtype),
            )
        })?;
        let operand = if op == ArithOp::Div {
            promoted.division_type()
        } else {
            promoted
        };
        let map = MapOp::Arith {
            op,
            scalar: None,
            operand,
        };
        Ok(Self::elementwise(lhs, map, Some(rhs), operand))
    }

    /// Elementwise arithmetic with a scalar right-hand side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dtype`] for boolean arrays or scalars.
    pub fn arith_scalar(lhs: &NodeRef, scalar: Scalar, op: ArithOp) -> Result<NodeRef> {
        let promoted = scalar
            .operand_dtype(lhs.dtype)
            .filter(|dtype| dtype.is_numeric())
            .ok_or_else(|| {
                Error::dtype(
                    op.name(),
                    format!("no arithmetic between {} and scalar {scalar}", lhs.dtype),
                )
            })?;
        let operand = if op == ArithOp::Div {
            promoted.division_type()
        } else {
            promoted
        };
        let map = MapOp::Arith {
            op,
            scalar: Some(scalar),
            operand,
        };
        Ok(Self::elementwise(lhs, map, None, operand))
    }

    fn compare_operand(op: CompareOp, lhs: DType, rhs: DType) -> Option<DType> {
        match (lhs, rhs) {
            (DType::Bool, DType::Bool) if op.is_equality() => Some(DType::Bool),
            _ => lhs.promote(rhs),
        }
    }

    /// Elementwise comparison of two arrays, producing `bool`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`], or [`Error::Dtype`] when mixing
    /// booleans with numbers or ordering booleans.
    pub fn compare(lhs: &NodeRef, rhs: &NodeRef, op: CompareOp) -> Result<NodeRef> {
        Self::check_aligned(op.name(), lhs, rhs)?;
        let operand = Self::compare_operand(op, lhs.dtype, rhs.dtype).ok_or_else(|| {
            Error::dtype(
                op.name(),
                format!("cannot compare {} with {}", lhs.dtype, rhs.dtype),
            )
        })?;
        let map = MapOp::Compare {
            op,
            scalar: None,
            operand,
        };
        Ok(Self::elementwise(lhs, map, Some(rhs), DType::Bool))
    }

    /// Elementwise comparison with a scalar, producing `bool`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dtype`] when mixing booleans with numbers or
    /// ordering booleans.
    pub fn compare_scalar(lhs: &NodeRef, scalar: Scalar, op: CompareOp) -> Result<NodeRef> {
        let operand = scalar
            .operand_dtype(lhs.dtype)
            .filter(|dtype| dtype.is_numeric() || op.is_equality())
            .ok_or_else(|| {
                Error::dtype(
                    op.name(),
                    format!("cannot compare {} with scalar {scalar}", lhs.dtype),
                )
            })?;
        let map = MapOp::Compare {
            op,
            scalar: Some(scalar),
            operand,
        };
        Ok(Self::elementwise(lhs, map, None, DType::Bool))
    }

    /// Unary operator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dtype`] for `neg`/`abs` on booleans and `not` on
    /// anything else.
    pub fn unary(input: &NodeRef, op: UnaryOp) -> Result<NodeRef> {
        let valid = match op {
            UnaryOp::Neg | UnaryOp::Abs => input.dtype.is_numeric(),
            UnaryOp::Not => input.dtype == DType::Bool,
        };
        if !valid {
            return Err(Error::dtype(
                op.name(),
                format!("not defined for {}", input.dtype),
            ));
        }
        Ok(Self::elementwise(input, MapOp::Unary(op), None, input.dtype))
    }

    /// Dtype conversion; returns the input itself if nothing changes.
    #[must_use]
    pub fn cast(input: &NodeRef, dtype: DType) -> NodeRef {
        if input.dtype == dtype {
            return Arc::clone(input);
        }
        Self::elementwise(input, MapOp::Cast(dtype), None, dtype)
    }

    /// Reduction over every element or one axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAxis`] for an axis the input does not have and
    /// [`Error::Dtype`] for `min`/`max` of booleans.
    pub fn reduce(input: &NodeRef, kind: ReduceKind, axis: Axis) -> Result<NodeRef> {
        let dtype = kind.output_dtype(input.dtype).ok_or_else(|| {
            Error::dtype(kind.name(), format!("not defined for {}", input.dtype))
        })?;
        let (shape, layout) = match axis {
            Axis::All => (Vec::new(), ChunkLayout::single(1)),
            Axis::Index(k) if k < input.shape.len() => {
                let mut shape = input.shape.clone();
                shape.remove(k);
                let layout = if k == 0 {
                    ChunkLayout::single(shape.first().copied().unwrap_or(1))
                } else {
                    input.layout.clone()
                };
                (shape, layout)
            }
            Axis::Index(k) => return Err(Error::invalid_axis(kind.name(), k, input.shape.len())),
        };
        Ok(Self::build(
            OperationKind::Reduce { kind, axis },
            vec![Arc::clone(input)],
            shape,
            dtype,
            layout,
        ))
    }

    /// Rows `range` of the leading axis; returns the input for the full range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAxis`] for 0-d input and [`Error::OutOfBounds`]
    /// for a range outside the rows.
    pub fn slice(input: &NodeRef, range: Range<usize>) -> Result<NodeRef> {
        let Some(&rows) = input.shape.first() else {
            return Err(Error::invalid_axis("slice", 0, 0));
        };
        if range.start == 0 && range.end == rows {
            return Ok(Arc::clone(input));
        }
        let (layout, pieces) = input.layout.slice(range.clone())?;
        let mut shape = input.shape.clone();
        shape[0] = range.len();
        Ok(Self::build(
            OperationKind::Slice {
                start: range.start,
                stop: range.end,
                pieces: pieces.into(),
            },
            vec![Arc::clone(input)],
            shape,
            input.dtype,
            layout,
        ))
    }

    /// Position `index` along trailing axis `axis`, removing that axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAxis`] for axis 0 or a missing axis and
    /// [`Error::OutOfBounds`] for an index past the end of the axis.
    pub fn select(input: &NodeRef, axis: usize, index: usize) -> Result<NodeRef> {
        if axis == 0 || axis >= input.shape.len() {
            return Err(Error::invalid_axis("select", axis, input.shape.len()));
        }
        if index >= input.shape[axis] {
            return Err(Error::out_of_bounds(
                "select",
                format!("index {index} on axis {axis} of shape {:?}", input.shape),
            ));
        }
        let mut shape = input.shape.clone();
        shape.remove(axis);
        Ok(Self::build(
            OperationKind::Select { axis, index },
            vec![Arc::clone(input)],
            shape,
            input.dtype,
            input.layout.clone(),
        ))
    }

    /// Keep the rows, change the shape of each row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAxis`] for 0-d input and
    /// [`Error::ShapeMismatch`] if the row size changes.
    pub fn reshape(input: &NodeRef, trailing: &[usize]) -> Result<NodeRef> {
        let Some((&rows, current)) = input.shape.split_first() else {
            return Err(Error::invalid_axis("reshape", 0, 0));
        };
        if current.iter().product::<usize>() != trailing.iter().product::<usize>() {
            return Err(Error::shape_mismatch(
                "reshape",
                format!("cannot reshape rows of {current:?} into {trailing:?}"),
            ));
        }
        if current == trailing {
            return Ok(Arc::clone(input));
        }
        let mut shape = vec![rows];
        shape.extend_from_slice(trailing);
        Ok(Self::build(
            OperationKind::Reshape {
                trailing: trailing.to_vec(),
            },
            vec![Arc::clone(input)],
            shape,
            input.dtype,
            input.layout.clone(),
        ))
    }

    /// Join arrays of one dtype along `axis`.
    ///
    /// Along axis 0 the chunk layouts are appended; along any other axis
    /// the inputs must share shape (outside `axis`) and layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`], [`Error::Dtype`] or
    /// [`Error::InvalidAxis`].
    pub fn concat(inputs: &[NodeRef], axis: usize) -> Result<NodeRef> {
        let Some(first) = inputs.first() else {
            return Err(Error::shape_mismatch("concat", "no arrays given"));
        };
        let ndim = first.shape.len();
        if axis >= ndim {
            return Err(Error::invalid_axis("concat", axis, ndim));
        }
        for other in &inputs[1..] {
            if other.dtype != first.dtype {
                return Err(Error::dtype(
                    "concat",
                    format!("{} vs {}", first.dtype, other.dtype),
                ));
            }
            let compatible = other.shape.len() == ndim
                && other
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(dim, (a, b))| dim == axis || a == b);
            if !compatible {
                return Err(Error::shape_mismatch(
                    "concat",
                    format!(
                        "{:?} vs {:?} along axis {axis}",
                        first.shape, other.shape
                    ),
                ));
            }
            if axis > 0 && other.layout != first.layout {
                return Err(Error::shape_mismatch(
                    "concat",
                    "chunk layouts differ".to_string(),
                ));
            }
        }
        if inputs.len() == 1 {
            return Ok(Arc::clone(first));
        }
        let mut shape = first.shape.clone();
        shape[axis] = inputs.iter().map(|n| n.shape[axis]).sum();
        let layout = if axis == 0 {
            inputs
                .iter()
                .skip(1)
                .fold(first.layout.clone(), |acc, n| acc.concat(&n.layout))
        } else {
            first.layout.clone()
        };
        Ok(Self::build(
            OperationKind::Concat { axis },
            inputs.to_vec(),
            shape,
            first.dtype,
            layout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn leaf(name: &str, dtype: DType, rows: usize, trailing: &[usize], chunk: usize) -> NodeRef {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::with_id("nodes"));
        TaskNode::read(
            ReadSpec {
                storage,
                file: "f".to_string(),
                column: name.to_string(),
                rows: 0..rows,
                dtype,
                trailing: trailing.to_vec(),
                generation: 0,
            },
            chunk,
        )
        .unwrap()
    }

    #[test]
    fn test_read_shape_and_layout() {
        let node = leaf("Coordinates", DType::Float64, 10, &[3], 4);
        assert_eq!(node.shape(), &[10, 3]);
        assert_eq!(node.layout().offsets(), &[0, 4, 8, 10]);
        assert_eq!(node.chunk_shape(2), vec![2, 3]);
        assert!(node.is_cacheable());
    }

    #[test]
    fn test_identical_expressions_share_fingerprint() {
        let a = leaf("x", DType::Float64, 8, &[], 4);
        let b = leaf("x", DType::Float64, 8, &[], 4);
        let sa = TaskNode::arith_scalar(&a, Scalar::Float(2.0), ArithOp::Mul).unwrap();
        let sb = TaskNode::arith_scalar(&b, Scalar::Float(2.0), ArithOp::Mul).unwrap();
        assert_eq!(sa.fingerprint(), sb.fingerprint());

        let other = TaskNode::arith_scalar(&a, Scalar::Float(3.0), ArithOp::Mul).unwrap();
        assert_ne!(sa.fingerprint(), other.fingerprint());

        let rechunked = leaf("x", DType::Float64, 8, &[], 2);
        assert_ne!(a.fingerprint(), rechunked.fingerprint());
    }

    #[test]
    fn test_arith_promotion() {
        let ints = leaf("i", DType::Int32, 4, &[], 2);
        let longs = leaf("l", DType::Int64, 4, &[], 2);
        let floats = leaf("f", DType::Float32, 4, &[], 2);
        assert_eq!(TaskNode::arith(&ints, &longs, ArithOp::Add).unwrap().dtype(), DType::Int64);
        assert_eq!(TaskNode::arith(&ints, &floats, ArithOp::Mul).unwrap().dtype(), DType::Float64);
        assert_eq!(TaskNode::arith(&ints, &longs, ArithOp::Div).unwrap().dtype(), DType::Float64);
        assert_eq!(
            TaskNode::arith(&floats, &floats, ArithOp::Div).unwrap().dtype(),
            DType::Float32
        );
        assert_eq!(
            TaskNode::arith_scalar(&ints, Scalar::Int(3), ArithOp::Add).unwrap().dtype(),
            DType::Int32
        );
        assert_eq!(
            TaskNode::arith_scalar(&ints, Scalar::Float(0.5), ArithOp::Add).unwrap().dtype(),
            DType::Float64
        );
    }

    #[test]
    fn test_boolean_rules() {
        let flags = leaf("b", DType::Bool, 4, &[], 2);
        let ints = leaf("i", DType::Int32, 4, &[], 2);
        assert!(matches!(
            TaskNode::arith(&flags, &ints, ArithOp::Add),
            Err(Error::Dtype { .. })
        ));
        assert!(TaskNode::compare(&flags, &flags, CompareOp::Eq).is_ok());
        assert!(matches!(
            TaskNode::compare(&flags, &flags, CompareOp::Lt),
            Err(Error::Dtype { .. })
        ));
        assert!(TaskNode::compare_scalar(&flags, Scalar::Bool(true), CompareOp::Ne).is_ok());
        assert!(TaskNode::compare_scalar(&ints, Scalar::Bool(true), CompareOp::Eq).is_err());
        assert!(TaskNode::unary(&flags, UnaryOp::Not).is_ok());
        assert!(TaskNode::unary(&flags, UnaryOp::Neg).is_err());
        assert!(TaskNode::unary(&ints, UnaryOp::Not).is_err());
        assert!(TaskNode::reduce(&flags, ReduceKind::Max, Axis::All).is_err());
        assert_eq!(
            TaskNode::reduce(&flags, ReduceKind::Sum, Axis::All).unwrap().dtype(),
            DType::Int64
        );
    }

    #[test]
    fn test_shape_mismatch_is_eager() {
        let a = leaf("a", DType::Float64, 8, &[], 4);
        let b = leaf("b", DType::Float64, 6, &[], 4);
        let c = leaf("c", DType::Float64, 8, &[], 2);
        assert!(matches!(
            TaskNode::arith(&a, &b, ArithOp::Add),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            TaskNode::arith(&a, &c, ArithOp::Add),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reduce_shapes_and_layouts() {
        let xyz = leaf("xyz", DType::Float32, 10, &[3], 4);
        let all = TaskNode::reduce(&xyz, ReduceKind::Sum, Axis::All).unwrap();
        assert!(all.shape().is_empty());
        assert_eq!(all.layout().num_chunks(), 1);

        let rows = TaskNode::reduce(&xyz, ReduceKind::Min, Axis::Index(0)).unwrap();
        assert_eq!(rows.shape(), &[3]);
        assert_eq!(rows.layout().offsets(), &[0, 3]);

        let per_row = TaskNode::reduce(&xyz, ReduceKind::Mean, Axis::Index(1)).unwrap();
        assert_eq!(per_row.shape(), &[10]);
        assert_eq!(per_row.layout(), xyz.layout());
        assert_eq!(per_row.dtype(), DType::Float64);

        assert!(matches!(
            TaskNode::reduce(&xyz, ReduceKind::Sum, Axis::Index(2)),
            Err(Error::InvalidAxis { axis: 2, ndim: 2, .. })
        ));
    }

    #[test]
    fn test_structural_operations() {
        let xyz = leaf("xyz", DType::Float64, 10, &[3], 4);
        let sliced = TaskNode::slice(&xyz, 2..9).unwrap();
        assert_eq!(sliced.shape(), &[7, 3]);
        assert_eq!(sliced.layout().offsets(), &[0, 2, 6, 7]);
        assert!(Arc::ptr_eq(&TaskNode::slice(&xyz, 0..10).unwrap(), &xyz));
        assert!(matches!(
            TaskNode::slice(&xyz, 4..11),
            Err(Error::OutOfBounds { .. })
        ));

        let y = TaskNode::select(&xyz, 1, 1).unwrap();
        assert_eq!(y.shape(), &[10]);
        assert!(matches!(
            TaskNode::select(&xyz, 0, 1),
            Err(Error::InvalidAxis { .. })
        ));
        assert!(matches!(
            TaskNode::select(&xyz, 1, 3),
            Err(Error::OutOfBounds { .. })
        ));

        let wide = leaf("w", DType::Float64, 10, &[6], 4);
        assert_eq!(TaskNode::reshape(&wide, &[2, 3]).unwrap().shape(), &[10, 2, 3]);
        assert!(TaskNode::reshape(&wide, &[4]).is_err());

        let joined = TaskNode::concat(&[Arc::clone(&xyz), Arc::clone(&xyz)], 0).unwrap();
        assert_eq!(joined.shape(), &[20, 3]);
        assert_eq!(joined.layout().offsets(), &[0, 4, 8, 10, 14, 18, 20]);

        let side = TaskNode::concat(&[Arc::clone(&xyz), wide], 1).unwrap();
        assert_eq!(side.shape(), &[10, 9]);
        assert!(!side.is_cacheable());
    }

    #[test]
    fn test_cast_to_same_dtype_is_identity() {
        let a = leaf("a", DType::Int64, 4, &[], 2);
        assert!(Arc::ptr_eq(&TaskNode::cast(&a, DType::Int64), &a));
        let f = TaskNode::cast(&a, DType::Float32);
        assert_eq!(f.dtype(), DType::Float32);
        assert!(!f.is_cacheable());
    }
}
