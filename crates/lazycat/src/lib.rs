//! Lazy, chunked arrays over file catalogs
//!
//! `lazycat` builds deferred computations over columns that may be spread
//! across many files and be larger than memory. Expressions are evaluated
//! chunk by chunk on demand; realized chunks are kept in a byte-budgeted
//! cache so that overlapping expressions never read the same data twice.
//!
//! The pieces live in separate crates, re-exported here:
//! - [`cache`]: the byte-budgeted LRU result cache
//! - [`array`]: chunked arrays, storage backends and the evaluator
//! - [`catalog`]: views presenting many files as one set of columns
//!
//! This crate adds [`Settings`], tracing setup and [`Session`].
//!
//! ```
//! use lazycat::{ArrayData, MemoryStorage, Session, Settings};
//! use std::sync::Arc;
//!
//! let storage = MemoryStorage::new();
//! storage.insert_file("snap", vec![(
//!     "Position".into(),
//!     ArrayData::from_shape_vec(&[4, 2], vec![0.0_f64, 5.0, 2.0, -1.0, 7.0, 3.0, 1.0, 1.0])?,
//! )])?;
//!
//! let session = Session::new(Settings::default())?;
//! let view = session.catalog(Arc::new(storage)).file("snap").chunk_rows(2).build()?;
//! let position = view.column("Position")?;
//! let extent = position.max(0)?.sub(&position.min(0)?)?;
//!
//! assert_eq!(session.compute_one(&extent)?.to_f64_vec(), vec![7.0, 6.0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
pub mod session;
pub mod settings;
pub mod telemetry;

pub use error::{Error, Result};
pub use session::{Session, default_cache};
pub use settings::Settings;
pub use telemetry::{TracingConfig, TracingFormat, init_tracing};

pub use lazycat_array as array;
pub use lazycat_cache as cache;
pub use lazycat_catalog as catalog;

pub use lazycat_array::{
    ArrayData, Axis, ChunkCache, ChunkedArray, DType, Evaluator, MemoryStorage, Scalar,
    StorageBackend,
};
pub use lazycat_catalog::{CatalogView, RawFileStorage};
