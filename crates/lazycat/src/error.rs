//! Error types for the lazycat facade

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for settings, tracing and sessions
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid or unreadable settings
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(lazycat::config),
        help("Check the settings file and the LAZYCAT_* environment variables")
    )]
    Config {
        /// What was wrong
        message: String,
    },

    /// A settings file could not be read
    #[error("Failed to read settings from {}: {source}", path.display())]
    #[diagnostic(code(lazycat::config::io))]
    ConfigIo {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The tracing subscriber could not be installed
    #[error("Tracing setup failed: {message}")]
    #[diagnostic(code(lazycat::tracing))]
    Tracing {
        /// What went wrong
        message: String,
    },

    /// Cache error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] lazycat_cache::Error),

    /// Array construction or evaluation error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Array(#[from] lazycat_array::Error),

    /// Catalog error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] lazycat_catalog::Error),
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a tracing setup error
    #[must_use]
    pub fn tracing(message: impl Into<String>) -> Self {
        Self::Tracing {
            message: message.into(),
        }
    }
}

/// Result type for the facade
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::config("chunk_rows must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: chunk_rows must be positive"
        );
    }

    #[test]
    fn test_wrapped_cache_error() {
        let err: Error = lazycat_cache::Error::invalid_byte_size("x", "not a number").into();
        assert!(matches!(err, Error::Cache(_)));
        assert!(err.to_string().contains("'x'"));
    }
}
