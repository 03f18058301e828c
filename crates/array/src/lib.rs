//! Chunked, lazily evaluated arrays for lazycat
//!
//! Arrays are built as graphs of [`TaskNode`]s. Building an expression only
//! checks shapes and dtypes; an [`Evaluator`] later expands the graph into
//! per-chunk tasks, runs the ones whose results are not already cached, and
//! assembles the requested arrays.
//!
//! - Leaf data comes from a [`StorageBackend`] as little-endian column bytes
//! - Every node has a structural [`Fingerprint`]; equal expressions share
//!   cached chunks across evaluations
//! - Reductions along the row axis combine one partial per chunk in chunk
//!   order, so results do not depend on scheduling
//!
//! ```
//! use lazycat_array::{ArrayData, ChunkCache, ChunkedArray, Evaluator, MemoryStorage};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! storage
//!     .insert_file("halo", vec![("x".to_string(), ArrayData::from_vec(vec![3.0_f64, -1.0, 4.0, 1.5]))])
//!     .unwrap();
//! let x = ChunkedArray::from_storage(storage, "halo", "x", 3).unwrap();
//!
//! let evaluator = Evaluator::new(Arc::new(ChunkCache::new(1 << 20)));
//! let values = evaluator.compute(&[&x.min(0).unwrap(), &x.max(0).unwrap()]).unwrap();
//! assert_eq!(values[0].to_f64_vec(), vec![-1.0]);
//! assert_eq!(values[1].to_f64_vec(), vec![4.0]);
//! ```

mod chunked;
mod data;
mod dtype;
mod error;
pub mod evaluator;
mod kernels;
mod layout;
pub mod node;
mod plan;
pub mod storage;

pub use chunked::ChunkedArray;
pub use data::{ArrayData, Element};
pub use dtype::{DType, Scalar};
pub use error::{Error, Result, StorageError};
pub use evaluator::{
    ChunkCache, EvaluationStats, Evaluator, EvaluatorBuilder, EvaluatorConfig, evaluate,
};
pub use layout::{Chunk, ChunkLayout, ChunkPiece};
pub use lazycat_task_graph::Fingerprint;
pub use node::{
    ArithOp, Axis, CompareOp, MapOp, NodeRef, OperationKind, ReadSpec, ReduceKind, TaskNode,
    UnaryOp,
};
pub use storage::{ColumnSchema, FileSchema, MemoryStorage, ReadRequest, StorageBackend};
