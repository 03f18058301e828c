//! Peak heap use while reducing a column much larger than one chunk.
//!
//! Kept in its own test binary: the global allocator below counts every
//! allocation of the process, so nothing else may run alongside.

#![allow(clippy::unwrap_used, unsafe_code)]

use lazycat_array::{ArrayData, ChunkCache, ChunkedArray, Evaluator, MemoryStorage, StorageBackend};
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Tracking;

static CURRENT: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for Tracking {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            let now = CURRENT.fetch_add(layout.size(), Ordering::SeqCst) + layout.size();
            PEAK.fetch_max(now, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        CURRENT.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}

#[global_allocator]
static ALLOCATOR: Tracking = Tracking;

/// Run `f` and return its result with the heap growth above the starting
/// point at its peak.
fn peak_during<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let base = CURRENT.load(Ordering::SeqCst);
    PEAK.store(base, Ordering::SeqCst);
    let result = f();
    let peak = PEAK.load(Ordering::SeqCst).saturating_sub(base);
    (result, peak)
}

const ROWS: usize = 2_000_000;
const CHUNK_ROWS: usize = 20_000;
const COLUMN_BYTES: usize = ROWS * 8;
const CHUNK_BYTES: usize = CHUNK_ROWS * 8;

fn column() -> ChunkedArray {
    let storage = MemoryStorage::with_id("large");
    let values: Vec<f64> = (0..ROWS).map(|i| (i % 7) as f64).collect();
    storage
        .insert_file("big", vec![("x".to_string(), ArrayData::from_vec(values))])
        .unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(storage);
    ChunkedArray::from_storage(backend, "big", "x", CHUNK_ROWS).unwrap()
}

fn expected_total() -> f64 {
    (0..ROWS).map(|i| (i % 7) as f64 * 2.0).sum()
}

#[test]
fn test_reduction_holds_a_few_chunks_at_a_time() {
    let x = column();
    let total = x.mul_scalar(2.0).unwrap().sum_all().unwrap();

    // nothing cacheable survives: every intermediate must be dropped
    let sequential = Evaluator::builder()
        .cache(Arc::new(ChunkCache::new(0)))
        .parallel(false)
        .build()
        .unwrap();
    let (value, peak) = peak_during(|| sequential.compute_one(&total).unwrap());
    assert_eq!(value.to_f64_vec(), vec![expected_total()]);
    assert!(
        peak < COLUMN_BYTES / 4,
        "sequential peak {peak} bytes for a {COLUMN_BYTES} byte column"
    );

    let parallel = Evaluator::builder()
        .cache(Arc::new(ChunkCache::new(0)))
        .max_threads(2)
        .build()
        .unwrap();
    let (value, peak) = peak_during(|| parallel.compute_one(&total).unwrap());
    assert_eq!(value.to_f64_vec(), vec![expected_total()]);
    assert!(
        peak < COLUMN_BYTES / 2,
        "parallel peak {peak} bytes for a {COLUMN_BYTES} byte column"
    );

    // staged results are bounded by what the cache can hold
    let capacity = 8 * CHUNK_BYTES;
    let cache = Arc::new(ChunkCache::new(capacity));
    let small = Evaluator::builder()
        .cache(Arc::clone(&cache))
        .parallel(false)
        .build()
        .unwrap();
    let ((value, stats), peak) =
        peak_during(|| small.compute_with_stats(&[&total]).unwrap());
    assert_eq!(value[0].to_f64_vec(), vec![expected_total()]);
    assert!(stats.cached > 0);
    assert!(cache.usage_bytes() <= capacity);
    assert!(
        peak < COLUMN_BYTES / 4 + capacity,
        "peak {peak} bytes with a {capacity} byte cache"
    );
}
