//! Structural fingerprints and DAG algorithms for lazycat task graphs.
//!
//! This crate provides the two graph-level building blocks the evaluator
//! relies on:
//!
//! - [`Fingerprint`]: a sha256 identity computed from an operation, its
//!   parameters and the fingerprints of its inputs. Equal fingerprints mean
//!   interchangeable results, which makes them usable as cache keys.
//! - [`TaskGraph`]: a petgraph-backed DAG of tasks keyed by any hashable id,
//!   with topological ordering and grouping into levels of independent
//!   tasks.
//!
//! # Example
//!
//! ```
//! use lazycat_task_graph::{TaskGraph, TaskNodeData};
//!
//! #[derive(Clone)]
//! struct Step {
//!     deps: Vec<String>,
//! }
//!
//! impl TaskNodeData for Step {
//!     type Key = String;
//!
//!     fn dependencies(&self) -> &[String] {
//!         &self.deps
//!     }
//! }
//!
//! let mut graph = TaskGraph::new();
//! graph.add_task("read".to_string(), Step { deps: vec![] }).unwrap();
//! graph
//!     .add_task("sum".to_string(), Step { deps: vec!["read".to_string()] })
//!     .unwrap();
//! graph.add_dependency_edges().unwrap();
//!
//! let sorted = graph.topological_sort().unwrap();
//! assert_eq!(sorted[0].key, "read");
//! ```

mod error;
mod fingerprint;
mod graph;

pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use graph::{GraphNode, TaskGraph};

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Trait for task data that can be stored in the task graph.
///
/// Implement this trait for your task type to enable it to be stored
/// in a [`TaskGraph`] and participate in dependency resolution.
pub trait TaskNodeData: Clone {
    /// Identifier used to name tasks and refer to dependencies.
    type Key: Clone + Eq + Hash + Debug + Display;

    /// Returns the keys of tasks this task depends on.
    fn dependencies(&self) -> &[Self::Key];
}
