//! Thread-safe, byte-budgeted LRU store

use crate::size::{SizeBytes, format_byte_size};
use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Capacity used when the caller does not choose one (10^9 bytes).
pub const DEFAULT_CAPACITY_BYTES: usize = 1_000_000_000;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    size_bytes: usize,
    last_access: u64,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    capacity_bytes: usize,
    usage_bytes: usize,
    clock: u64,
}

impl<K: Hash + Eq, V> Inner<K, V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Pop least-recently-used entries until usage fits `limit`.
    fn evict_to(&mut self, limit: usize) -> u64 {
        let mut evicted = 0;
        while self.usage_bytes > limit {
            let Some((_, entry)) = self.entries.pop_lru() else {
                // Accounting drifted; nothing left to free.
                self.usage_bytes = 0;
                break;
            };
            self.usage_bytes -= entry.size_bytes;
            evicted += 1;
            trace!(
                size_bytes = entry.size_bytes,
                last_access = entry.last_access,
                "evicted cache entry"
            );
        }
        evicted
    }
}

/// Snapshot of cache counters and occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Values stored by `put`
    pub insertions: u64,
    /// Entries removed to respect the budget
    pub evictions: u64,
    /// Values rejected for being larger than the whole budget
    pub bypassed: u64,
    /// Entries currently stored
    pub entries: usize,
    /// Bytes currently stored
    pub usage_bytes: usize,
    /// Current budget in bytes
    pub capacity_bytes: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or `0.0` before any lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Byte-budgeted LRU cache shared by every evaluation that is handed it.
///
/// Keys are usually structural fingerprints of computations; values are
/// realized results, typically behind an `Arc` so that a lookup hands out a
/// cheap read-only handle. After every mutating call the stored bytes never
/// exceed the capacity.
pub struct GlobalCache<K: Hash + Eq, V> {
    inner: RwLock<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    bypassed: AtomicU64,
}

impl<K, V> GlobalCache<K, V>
where
    K: Hash + Eq + Clone,
    V: SizeBytes + Clone,
{
    /// Creates an empty cache holding at most `capacity_bytes` bytes.
    ///
    /// A capacity of zero is valid: every value then bypasses the cache.
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        debug!(capacity = %format_byte_size(capacity_bytes), "created cache");
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::unbounded(),
                capacity_bytes,
                usage_bytes: 0,
                clock: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
        }
    }

    /// Looks up a value and marks it as most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let now = inner.tick();

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_access = now;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Returns true if `key` is stored, without touching its recency.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().entries.contains(key)
    }

    /// Inserts or overwrites a value, evicting older entries as needed.
    ///
    /// A value larger than the whole capacity is not stored at all and the
    /// cache is left untouched; the method returns `false` in that case.
    pub fn put(&self, key: K, value: V) -> bool {
        let size_bytes = value.size_bytes();
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if size_bytes > inner.capacity_bytes {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            warn!(
                size = %format_byte_size(size_bytes),
                capacity = %format_byte_size(inner.capacity_bytes),
                "value larger than cache capacity, not cached"
            );
            return false;
        }

        let now = inner.tick();
        let entry = CacheEntry {
            value,
            size_bytes,
            last_access: now,
        };
        if let Some(previous) = inner.entries.put(key, entry) {
            inner.usage_bytes -= previous.size_bytes;
        }
        inner.usage_bytes += size_bytes;
        self.insertions.fetch_add(1, Ordering::Relaxed);

        let limit = inner.capacity_bytes;
        let evicted = inner.evict_to(limit);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        true
    }

    /// Changes the budget, evicting least-recently-used entries if the
    /// current usage no longer fits.
    pub fn resize(&self, capacity_bytes: usize) {
        let mut guard = self.inner.write();
        guard.capacity_bytes = capacity_bytes;
        let evicted = guard.evict_to(capacity_bytes);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(
            capacity = %format_byte_size(capacity_bytes),
            usage = %format_byte_size(guard.usage_bytes),
            evicted,
            "resized cache"
        );
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut guard = self.inner.write();
        guard.entries.clear();
        guard.usage_bytes = 0;
        debug!("cleared cache");
    }

    /// Current budget in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.inner.read().capacity_bytes
    }

    /// Bytes currently stored.
    #[must_use]
    pub fn usage_bytes(&self) -> usize {
        self.inner.read().usage_bytes
    }

    /// Returns the number of entries in the cache
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Keys from least to most recently used.
    #[must_use]
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Counters and occupancy at this instant.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            entries: inner.entries.len(),
            usage_bytes: inner.usage_bytes,
            capacity_bytes: inner.capacity_bytes,
        }
    }
}

impl<K, V> Default for GlobalCache<K, V>
where
    K: Hash + Eq + Clone,
    V: SizeBytes + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

impl<K: Hash + Eq, V> fmt::Debug for GlobalCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("GlobalCache")
            .field("entries", &inner.entries.len())
            .field("usage_bytes", &inner.usage_bytes)
            .field("capacity_bytes", &inner.capacity_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn payload(size: usize) -> Vec<u8> {
        vec![0; size]
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = GlobalCache::new(100);
        assert!(cache.put("a", payload(10)));

        assert_eq!(cache.get(&"a").map(|v| v.len()), Some(10));
        assert!(cache.get(&"b").is_none());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage_bytes(), 10);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
    }

    #[test]
    fn test_cache_evicts_oldest_first() {
        let cache = GlobalCache::new(30);
        cache.put(1, payload(10));
        cache.put(2, payload(10));
        cache.put(3, payload(10));
        cache.put(4, payload(10));

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert!(cache.contains(&4));
        assert_eq!(cache.usage_bytes(), 30);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_cache_get_refreshes_recency() {
        let cache = GlobalCache::new(30);
        cache.put(1, payload(10));
        cache.put(2, payload(10));
        cache.put(3, payload(10));

        assert!(cache.get(&1).is_some());
        cache.put(4, payload(10));

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert_eq!(cache.keys_by_recency(), vec![3, 1, 4]);
    }

    #[test]
    fn test_cache_overwrite_does_not_double_count() {
        let cache = GlobalCache::new(100);
        cache.put("k", payload(40));
        cache.put("k", payload(40));
        cache.put("k", payload(25));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage_bytes(), 25);
    }

    #[test]
    fn test_cache_oversized_bypass() {
        let cache = GlobalCache::new(50);
        cache.put("small", payload(20));

        assert!(!cache.put("huge", payload(51)));

        assert_eq!(cache.usage_bytes(), 20);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"huge").is_none());
        assert!(cache.contains(&"small"));
        assert_eq!(cache.stats().bypassed, 1);
    }

    #[test]
    fn test_cache_zero_capacity_stores_nothing() {
        let cache = GlobalCache::new(0);
        assert!(!cache.put("a", payload(1)));
        assert!(cache.put("empty", payload(0)));
        assert_eq!(cache.usage_bytes(), 0);
    }

    #[test]
    fn test_cache_resize_down_evicts() {
        let cache = GlobalCache::new(100);
        for key in 0..10 {
            cache.put(key, payload(10));
        }
        assert_eq!(cache.usage_bytes(), 100);

        cache.resize(35);

        assert!(cache.usage_bytes() <= 35);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.keys_by_recency(), vec![7, 8, 9]);
        assert_eq!(cache.capacity_bytes(), 35);
    }

    #[test]
    fn test_cache_resize_up_keeps_entries() {
        let cache = GlobalCache::new(20);
        cache.put(1, payload(10));
        cache.put(2, payload(10));
        cache.resize(1_000);
        cache.put(3, payload(500));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_cache_clear() {
        let cache = GlobalCache::new(100);
        cache.put(1, payload(10));
        cache.put(2, payload(10));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.usage_bytes(), 0);
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn test_cache_concurrent_puts_of_same_key() {
        let cache = Arc::new(GlobalCache::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..100 {
                        cache.put("shared", Arc::new(payload(64)));
                        let _ = cache.get(&"shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage_bytes(), 64);
    }

    #[test]
    fn test_cache_concurrent_resize_keeps_invariant() {
        let cache = Arc::new(GlobalCache::new(10_000));
        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for key in 0..2_000_u32 {
                    cache.put(key, payload(16));
                }
            })
        };
        let resizer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for step in 0..200_usize {
                    cache.resize(100 + (step % 7) * 500);
                    let stats = cache.stats();
                    assert!(stats.usage_bytes <= stats.capacity_bytes);
                }
            })
        };
        writer.join().unwrap();
        resizer.join().unwrap();

        let stats = cache.stats();
        assert!(stats.usage_bytes <= stats.capacity_bytes);
    }

    #[test]
    fn test_hit_ratio() {
        let cache = GlobalCache::new(100);
        assert_eq!(cache.stats().hit_ratio(), 0.0);
        cache.put(1, payload(1));
        let _ = cache.get(&1);
        let _ = cache.get(&2);
        assert!((cache.stats().hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
