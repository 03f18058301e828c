//! Error types for array construction, storage access and evaluation

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use lazycat_task_graph::Fingerprint;
use miette::Diagnostic;
use std::ops::Range;
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// The backend has no file with this name
    #[error("File not found: {file}")]
    #[diagnostic(code(lazycat::storage::file_not_found))]
    FileNotFound {
        /// Requested file
        file: String,
    },

    /// The file exists but has no such column
    #[error("Column '{column}' not found in {file}")]
    #[diagnostic(code(lazycat::storage::column_not_found))]
    ColumnNotFound {
        /// File that was searched
        file: String,
        /// Requested column
        column: String,
    },

    /// Requested rows lie outside the column
    #[error("Rows {start}..{end} out of range for {file} ({rows} rows)")]
    #[diagnostic(code(lazycat::storage::out_of_range))]
    OutOfRange {
        /// File that was read
        file: String,
        /// First requested row
        start: usize,
        /// End of the requested rows (exclusive)
        end: usize,
        /// Rows actually present
        rows: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error reading {file}: {source}")]
    #[diagnostic(code(lazycat::storage::io))]
    Io {
        /// File that was read
        file: String,
        /// Original error
        #[source]
        source: std::io::Error,
    },

    /// Bytes were returned but do not decode to the declared column
    #[error("Corrupt data in {file}: {message}")]
    #[diagnostic(code(lazycat::storage::corrupt))]
    Corrupt {
        /// File that was read
        file: String,
        /// What did not line up
        message: String,
    },

    /// Data handed to a backend is not a valid file
    #[error("Invalid file contents for {file}: {message}")]
    #[diagnostic(code(lazycat::storage::invalid))]
    InvalidData {
        /// File being registered
        file: String,
        /// Why it was rejected
        message: String,
    },
}

impl StorageError {
    /// Create a file-not-found error
    #[must_use]
    pub fn file_not_found(file: impl Into<String>) -> Self {
        Self::FileNotFound { file: file.into() }
    }

    /// Create a column-not-found error
    #[must_use]
    pub fn column_not_found(file: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            file: file.into(),
            column: column.into(),
        }
    }

    /// Create a corrupt-data error
    #[must_use]
    pub fn corrupt(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-data error
    #[must_use]
    pub fn invalid_data(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidData {
            file: file.into(),
            message: message.into(),
        }
    }
}

/// Error type for array operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Operand shapes or chunk layouts are incompatible
    #[error("Shape mismatch in {operation}: {detail}")]
    #[diagnostic(code(lazycat::array::shape_mismatch))]
    ShapeMismatch {
        /// Operation being built
        operation: String,
        /// Shapes involved
        detail: String,
    },

    /// Operand dtypes are not supported by the operation
    #[error("Unsupported dtype in {operation}: {detail}")]
    #[diagnostic(code(lazycat::array::dtype))]
    Dtype {
        /// Operation being built
        operation: String,
        /// Dtypes involved
        detail: String,
    },

    /// Axis does not exist or cannot be used here
    #[error("Invalid axis {axis} for {operation} on a {ndim}-d array")]
    #[diagnostic(
        code(lazycat::array::invalid_axis),
        help("Use slice() to restrict the leading axis")
    )]
    InvalidAxis {
        /// Operation being built
        operation: String,
        /// Requested axis
        axis: usize,
        /// Dimensionality of the operand
        ndim: usize,
    },

    /// Index or range outside the array
    #[error("Out of bounds in {operation}: {detail}")]
    #[diagnostic(code(lazycat::array::out_of_bounds))]
    OutOfBounds {
        /// Operation being built
        operation: String,
        /// Offending index or range
        detail: String,
    },

    /// Chunk layout description is invalid
    #[error("Invalid chunk layout: {message}")]
    #[diagnostic(code(lazycat::array::layout))]
    InvalidLayout {
        /// What is wrong with it
        message: String,
    },

    /// A leaf read failed
    #[error("Failed to read column '{column}' of {file} (bytes {}..{})", byte_range.start, byte_range.end)]
    #[diagnostic(code(lazycat::array::io))]
    Io {
        /// File being read
        file: String,
        /// Column being read
        column: String,
        /// Bytes of the file that were requested, as located by the backend
        byte_range: Range<u64>,
        /// Backend error
        #[source]
        source: StorageError,
    },

    /// A chunk computation failed
    #[error("Computation failed in {operation} (node {}): {message}", fingerprint.short())]
    #[diagnostic(code(lazycat::array::computation))]
    Computation {
        /// Operation that failed
        operation: String,
        /// Identity of the failing node
        fingerprint: Fingerprint,
        /// Underlying failure
        message: String,
    },

    /// Storage error outside of chunk evaluation
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    /// Chunk task graph could not be scheduled
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] lazycat_task_graph::Error),

    /// Evaluator configuration error
    #[error("Evaluator configuration error: {message}")]
    #[diagnostic(code(lazycat::array::config))]
    Configuration {
        /// What is wrong with it
        message: String,
    },
}

impl Error {
    /// Create a shape mismatch error
    #[must_use]
    pub fn shape_mismatch(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    /// Create a dtype error
    #[must_use]
    pub fn dtype(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Dtype {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    /// Create an invalid axis error
    #[must_use]
    pub fn invalid_axis(operation: impl Into<String>, axis: usize, ndim: usize) -> Self {
        Self::InvalidAxis {
            operation: operation.into(),
            axis,
            ndim,
        }
    }

    /// Create an out-of-bounds error
    #[must_use]
    pub fn out_of_bounds(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::OutOfBounds {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    /// Create an invalid layout error
    #[must_use]
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        Self::InvalidLayout {
            message: message.into(),
        }
    }

    /// Create a computation error for the given node
    #[must_use]
    pub fn computation(
        operation: impl Into<String>,
        fingerprint: Fingerprint,
        message: impl Into<String>,
    ) -> Self {
        Self::Computation {
            operation: operation.into(),
            fingerprint,
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Result type for array operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_file_and_range() {
        let err = Error::Io {
            file: "snap_0.bin".to_string(),
            column: "Coordinates".to_string(),
            byte_range: 96..192,
            source: StorageError::file_not_found("snap_0.bin"),
        };
        let message = err.to_string();
        assert!(message.contains("snap_0.bin"));
        assert!(message.contains("96..192"));
        assert!(message.contains("Coordinates"));
    }

    #[test]
    fn test_computation_error_names_node() {
        let fingerprint = Fingerprint::builder("map").finish();
        let err = Error::computation("map(pow)", fingerprint, "negative exponent");
        let message = err.to_string();
        assert!(message.contains(&fingerprint.short()));
        assert!(message.contains("map(pow)"));
    }

    #[test]
    fn test_storage_error_converts() {
        let err: Error = StorageError::column_not_found("a", "Mass").into();
        assert!(matches!(err, Error::Storage(StorageError::ColumnNotFound { .. })));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
        assert_send_sync::<StorageError>();
    }
}
