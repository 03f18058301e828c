//! Error types for catalog views

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for catalog construction and column access
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The view has no column with this name
    #[error("Column '{column}' not found; available columns: {}", available.join(", "))]
    #[diagnostic(code(lazycat::catalog::column_not_found))]
    ColumnNotFound {
        /// Requested column
        column: String,
        /// Columns the view does provide
        available: Vec<String>,
    },

    /// A file's columns disagree with the first file of the view
    #[error("Schema of {file} does not match {reference}: {detail}")]
    #[diagnostic(
        code(lazycat::catalog::schema_mismatch),
        help("Every file of a catalog must have the same column names, dtypes and row shapes")
    )]
    SchemaMismatch {
        /// File whose schema differs
        file: String,
        /// First file of the view
        reference: String,
        /// What differs
        detail: String,
    },

    /// The view was built without any file
    #[error("A catalog view needs at least one file")]
    #[diagnostic(code(lazycat::catalog::no_files))]
    NoFiles,

    /// Zero rows per chunk
    #[error("Invalid chunk size {chunk_rows}: chunks must hold at least one row")]
    #[diagnostic(code(lazycat::catalog::chunk_size))]
    InvalidChunkSize {
        /// Rejected chunk size
        chunk_rows: usize,
    },

    /// Shard index outside `0..count`
    #[error("Invalid shard {index} of {count}")]
    #[diagnostic(code(lazycat::catalog::shard))]
    InvalidShard {
        /// Requested shard
        index: usize,
        /// Number of shards
        count: usize,
    },

    /// Storage backend failure while reading schemas
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] lazycat_array::StorageError),

    /// Failure building the column arrays
    #[error(transparent)]
    #[diagnostic(transparent)]
    Array(#[from] lazycat_array::Error),
}

impl Error {
    /// Create a column lookup error
    #[must_use]
    pub fn column_not_found(column: impl Into<String>, available: Vec<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
            available,
        }
    }

    /// Create a schema mismatch error
    #[must_use]
    pub fn schema_mismatch(
        file: impl Into<String>,
        reference: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            file: file.into(),
            reference: reference.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_not_found_lists_columns() {
        let err = Error::column_not_found(
            "Velocity",
            vec!["Position".to_string(), "Mass".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("'Velocity'"));
        assert!(msg.contains("Position, Mass"));
    }

    #[test]
    fn test_schema_mismatch_names_files() {
        let err = Error::schema_mismatch("b.bin", "a.bin", "column 'Mass' is f4, expected f8");
        let msg = err.to_string();
        assert!(msg.contains("b.bin"));
        assert!(msg.contains("a.bin"));
        assert!(msg.contains("Mass"));
    }

    #[test]
    fn test_wrapped_errors_are_transparent() {
        let err: Error = lazycat_array::StorageError::file_not_found("missing").into();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
