//! The user-facing lazy array

use crate::data::ArrayData;
use crate::dtype::{DType, Scalar};
use crate::evaluator::Evaluator;
use crate::layout::ChunkLayout;
use crate::node::{
    ArithOp, Axis, CompareOp, NodeRef, ReadSpec, ReduceKind, TaskNode, UnaryOp,
};
use crate::storage::StorageBackend;
use crate::{Result, StorageError};
use lazycat_task_graph::Fingerprint;
use std::ops::Range;
use std::sync::Arc;

/// A lazily evaluated array partitioned into row chunks.
///
/// Every operation returns a new array describing the computation; nothing
/// is read or computed until an [`Evaluator`] realizes it. Cloning is cheap
/// and clones share the underlying node.
///
/// ```
/// use lazycat_array::{ArrayData, ChunkCache, ChunkedArray, Evaluator, MemoryStorage};
/// use std::sync::Arc;
///
/// let storage = Arc::new(MemoryStorage::new());
/// storage
///     .insert_file("snap", vec![("mass".to_string(), ArrayData::from_vec(vec![1.0_f64, 2.0, 3.0]))])
///     .unwrap();
/// let mass = ChunkedArray::from_storage(storage, "snap", "mass", 2).unwrap();
/// let total = mass.mul_scalar(2).unwrap().sum_all().unwrap();
///
/// let evaluator = Evaluator::new(Arc::new(ChunkCache::new(1 << 20)));
/// let value = evaluator.compute_one(&total).unwrap();
/// assert_eq!(value.to_f64_vec(), vec![12.0]);
/// ```
#[derive(Debug, Clone)]
pub struct ChunkedArray {
    root: NodeRef,
}

#[allow(clippy::should_implement_trait)]
impl ChunkedArray {
    /// Wrap an existing node.
    #[must_use]
    pub const fn from_node(root: NodeRef) -> Self {
        Self { root }
    }

    /// Leaf array over `spec`, chunked every `chunk_rows` rows.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::read`].
    pub fn read(spec: ReadSpec, chunk_rows: usize) -> Result<Self> {
        TaskNode::read(spec, chunk_rows).map(Self::from_node)
    }

    /// Leaf array over `spec` with an explicit layout.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::read_with_layout`].
    pub fn read_with_layout(spec: ReadSpec, layout: ChunkLayout) -> Result<Self> {
        TaskNode::read_with_layout(spec, layout).map(Self::from_node)
    }

    /// Leaf array over a whole column, described by the backend's schema.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the file or column does not exist and
    /// [`crate::Error::InvalidLayout`] for a zero chunk size.
    pub fn from_storage(
        storage: Arc<dyn StorageBackend>,
        file: &str,
        column: &str,
        chunk_rows: usize,
    ) -> Result<Self> {
        let schema = storage.schema(file)?;
        let described = schema
            .column(column)
            .ok_or_else(|| StorageError::column_not_found(file, column))?;
        let spec = ReadSpec {
            dtype: described.dtype,
            trailing: described.trailing.clone(),
            storage,
            file: file.to_string(),
            column: column.to_string(),
            rows: 0..schema.rows,
            generation: schema.generation,
        };
        Self::read(spec, chunk_rows)
    }

    /// Root node of the expression
    #[must_use]
    pub const fn node(&self) -> &NodeRef {
        &self.root
    }

    /// Structural identity
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.root.fingerprint()
    }

    /// Full shape
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.root.shape()
    }

    /// Element type
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.root.dtype()
    }

    /// Number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.root.shape().len()
    }

    /// Rows along the leading axis (1 for a 0-d array)
    #[must_use]
    pub fn rows(&self) -> usize {
        self.root.shape().first().copied().unwrap_or(1)
    }

    /// Chunk layout of the leading axis
    #[must_use]
    pub fn layout(&self) -> &ChunkLayout {
        self.root.layout()
    }

    /// Number of chunks
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.root.layout().num_chunks()
    }

    /// Elementwise arithmetic with another array.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith`].
    pub fn arith(&self, op: ArithOp, other: &Self) -> Result<Self> {
        TaskNode::arith(&self.root, &other.root, op).map(Self::from_node)
    }

    /// Elementwise arithmetic with a scalar right-hand side.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith_scalar`].
    pub fn arith_scalar(&self, op: ArithOp, scalar: impl Into<Scalar>) -> Result<Self> {
        TaskNode::arith_scalar(&self.root, scalar.into(), op).map(Self::from_node)
    }

    /// `self + other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith`].
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.arith(ArithOp::Add, other)
    }

    /// `self - other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith`].
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.arith(ArithOp::Sub, other)
    }

    /// `self * other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith`].
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.arith(ArithOp::Mul, other)
    }

    /// `self / other`, always a float array
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith`].
    pub fn div(&self, other: &Self) -> Result<Self> {
        self.arith(ArithOp::Div, other)
    }

    /// `self ** other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith`].
    pub fn pow(&self, other: &Self) -> Result<Self> {
        self.arith(ArithOp::Pow, other)
    }

    /// `self + scalar`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith_scalar`].
    pub fn add_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self> {
        self.arith_scalar(ArithOp::Add, scalar)
    }

    /// `self - scalar`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith_scalar`].
    pub fn sub_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self> {
        self.arith_scalar(ArithOp::Sub, scalar)
    }

    /// `self * scalar`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith_scalar`].
    pub fn mul_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self> {
        self.arith_scalar(ArithOp::Mul, scalar)
    }

    /// `self / scalar`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith_scalar`].
    pub fn div_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self> {
        self.arith_scalar(ArithOp::Div, scalar)
    }

    /// `self ** scalar`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::arith_scalar`].
    pub fn pow_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self> {
        self.arith_scalar(ArithOp::Pow, scalar)
    }

    /// Elementwise comparison with another array.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn compare(&self, op: CompareOp, other: &Self) -> Result<Self> {
        TaskNode::compare(&self.root, &other.root, op).map(Self::from_node)
    }

    /// Elementwise comparison with a scalar.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare_scalar`].
    pub fn compare_scalar(&self, op: CompareOp, scalar: impl Into<Scalar>) -> Result<Self> {
        TaskNode::compare_scalar(&self.root, scalar.into(), op).map(Self::from_node)
    }

    /// `self == other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn eq(&self, other: &Self) -> Result<Self> {
        self.compare(CompareOp::Eq, other)
    }

    /// `self != other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn ne(&self, other: &Self) -> Result<Self> {
        self.compare(CompareOp::Ne, other)
    }

    /// `self < other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn lt(&self, other: &Self) -> Result<Self> {
        self.compare(CompareOp::Lt, other)
    }

    /// `self <= other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn le(&self, other: &Self) -> Result<Self> {
        self.compare(CompareOp::Le, other)
    }

    /// `self > other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn gt(&self, other: &Self) -> Result<Self> {
        self.compare(CompareOp::Gt, other)
    }

    /// `self >= other`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::compare`].
    pub fn ge(&self, other: &Self) -> Result<Self> {
        self.compare(CompareOp::Ge, other)
    }

    /// Arithmetic negation
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Dtype`] for booleans.
    pub fn neg(&self) -> Result<Self> {
        TaskNode::unary(&self.root, UnaryOp::Neg).map(Self::from_node)
    }

    /// Absolute value
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Dtype`] for booleans.
    pub fn abs(&self) -> Result<Self> {
        TaskNode::unary(&self.root, UnaryOp::Abs).map(Self::from_node)
    }

    /// Logical not
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Dtype`] unless the array is boolean.
    pub fn not(&self) -> Result<Self> {
        TaskNode::unary(&self.root, UnaryOp::Not).map(Self::from_node)
    }

    /// Convert to another dtype.
    #[must_use]
    pub fn cast(&self, dtype: DType) -> Self {
        Self::from_node(TaskNode::cast(&self.root, dtype))
    }

    /// Reduction over every element or one axis.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn reduce(&self, kind: ReduceKind, axis: impl Into<Axis>) -> Result<Self> {
        TaskNode::reduce(&self.root, kind, axis.into()).map(Self::from_node)
    }

    /// Minimum along `axis`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn min(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce(ReduceKind::Min, axis)
    }

    /// Maximum along `axis`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn max(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce(ReduceKind::Max, axis)
    }

    /// Sum along `axis`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn sum(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce(ReduceKind::Sum, axis)
    }

    /// Mean along `axis`
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn mean(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce(ReduceKind::Mean, axis)
    }

    /// Minimum of every element
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn min_all(&self) -> Result<Self> {
        self.reduce(ReduceKind::Min, Axis::All)
    }

    /// Maximum of every element
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn max_all(&self) -> Result<Self> {
        self.reduce(ReduceKind::Max, Axis::All)
    }

    /// Sum of every element
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn sum_all(&self) -> Result<Self> {
        self.reduce(ReduceKind::Sum, Axis::All)
    }

    /// Mean of every element
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reduce`].
    pub fn mean_all(&self) -> Result<Self> {
        self.reduce(ReduceKind::Mean, Axis::All)
    }

    /// Rows `range` of the leading axis.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::slice`].
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        TaskNode::slice(&self.root, range).map(Self::from_node)
    }

    /// Position `index` along trailing axis `axis`.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::select`].
    pub fn select(&self, axis: usize, index: usize) -> Result<Self> {
        TaskNode::select(&self.root, axis, index).map(Self::from_node)
    }

    /// Change the shape of each row.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::reshape`].
    pub fn reshape(&self, trailing: &[usize]) -> Result<Self> {
        TaskNode::reshape(&self.root, trailing).map(Self::from_node)
    }

    /// Join arrays along `axis`.
    ///
    /// # Errors
    ///
    /// See [`TaskNode::concat`].
    pub fn concatenate(arrays: &[&Self], axis: usize) -> Result<Self> {
        let nodes: Vec<NodeRef> = arrays.iter().map(|a| Arc::clone(&a.root)).collect();
        TaskNode::concat(&nodes, axis).map(Self::from_node)
    }

    /// Realize with `evaluator`.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::compute`].
    pub fn compute(&self, evaluator: &Evaluator) -> Result<ArrayData> {
        evaluator.compute_one(self)
    }
}

impl From<NodeRef> for ChunkedArray {
    fn from(root: NodeRef) -> Self {
        Self::from_node(root)
    }
}
