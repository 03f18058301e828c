//! Error types for task graph operations.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for task graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during task graph operations.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    #[error("Cycle detected in task graph: {message}")]
    #[diagnostic(code(lazycat::graph::cycle))]
    CycleDetected {
        /// Human-readable description of the cycle.
        message: String,
    },

    /// Tasks depend on tasks that were never added.
    #[error("Missing dependencies: {}", format_missing(missing))]
    #[diagnostic(
        code(lazycat::graph::missing_dependency),
        help("Every dependency must be added to the graph before edges are wired")
    )]
    MissingDependencies {
        /// List of (task, missing_dependency) pairs.
        missing: Vec<(String, String)>,
    },

    /// Failed to perform topological sort.
    #[error("Failed to sort tasks topologically: {reason}")]
    #[diagnostic(code(lazycat::graph::toposort))]
    TopologicalSortFailed {
        /// Reason for the failure.
        reason: String,
    },
}

fn format_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(task, dep)| format!("task '{task}' depends on missing task '{dep}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
