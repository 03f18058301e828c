//! Byte-budgeted result cache for lazycat
//!
//! This crate provides the store that memoizes realized chunk results
//! across evaluations:
//! - Capacity is expressed in bytes, not entries
//! - Strict least-recently-used eviction, ties broken by insertion order
//! - Entries larger than the whole budget bypass the cache
//! - Safe to share between threads and to resize at any time
//!
//! # Overview
//!
//! The cache is an explicit value rather than process-global state. Callers
//! create one (usually wrapped in an `Arc`) and hand it to whatever evaluates
//! graphs; tests create their own instances.
//!
//! ```
//! use lazycat_cache::GlobalCache;
//!
//! let cache: GlobalCache<u64, Vec<u8>> = GlobalCache::new(16);
//! cache.put(1, vec![0; 8]);
//! cache.put(2, vec![0; 8]);
//! cache.put(3, vec![0; 8]);
//! assert!(cache.get(&1).is_none());
//! assert!(cache.usage_bytes() <= cache.capacity_bytes());
//! ```

mod error;
mod size;
pub mod store;

pub use error::{Error, Result};
pub use size::{SizeBytes, format_byte_size, parse_byte_size};
pub use store::{CacheStats, DEFAULT_CAPACITY_BYTES, GlobalCache};
