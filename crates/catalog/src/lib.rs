//! Catalog views for lazycat
//!
//! A [`CatalogView`] presents the columns of one or more files as chunked
//! arrays sharing a single chunk layout. Nothing is read when a view or a
//! column is created; data moves only when an evaluator realizes an
//! expression built on the columns.
//!
//! ```
//! use lazycat_array::{ArrayData, ChunkCache, Evaluator, MemoryStorage};
//! use lazycat_catalog::CatalogView;
//! use std::sync::Arc;
//!
//! let storage = MemoryStorage::new();
//! storage.insert_file("a", vec![("Mass".into(), ArrayData::from_vec(vec![1.0_f64, 2.0]))])?;
//! storage.insert_file("b", vec![("Mass".into(), ArrayData::from_vec(vec![4.0_f64]))])?;
//!
//! let view = CatalogView::builder(Arc::new(storage)).files(["a", "b"]).build()?;
//! let total = view.column("Mass")?.sum_all()?;
//!
//! let evaluator = Evaluator::new(Arc::new(ChunkCache::new(1 << 20)));
//! assert_eq!(evaluator.compute_one(&total)?, ArrayData::scalar(7.0_f64));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
pub mod raw;
mod view;

pub use error::{Error, Result};
pub use raw::{RawColumn, RawFileLayout, RawFileStorage};
pub use view::{CatalogBuilder, CatalogView, DEFAULT_CHUNK_ROWS};
