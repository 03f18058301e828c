//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(lazycat::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A byte size string could not be parsed
    #[error("Invalid byte size '{input}': {reason}")]
    #[diagnostic(
        code(lazycat::cache::byte_size),
        help("Use a plain number of bytes or a suffix such as 512MB, 2GiB or 1e9")
    )]
    InvalidByteSize {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a byte size parse error
    #[must_use]
    pub fn invalid_byte_size(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidByteSize {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
