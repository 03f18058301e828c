//! Sessions tie settings, a result cache and an evaluator together

use crate::Result;
use crate::settings::Settings;
use lazycat_array::{
    ArrayData, ChunkCache, ChunkedArray, EvaluationStats, Evaluator, StorageBackend,
};
use lazycat_cache::{CacheStats, DEFAULT_CAPACITY_BYTES};
use lazycat_catalog::CatalogBuilder;
use std::sync::{Arc, OnceLock};
use tracing::debug;

static DEFAULT_CACHE: OnceLock<Arc<ChunkCache>> = OnceLock::new();

/// Process-wide cache with the default 1 GB budget.
///
/// Created on first use. Sessions built with [`Session::shared`] draw from
/// it; everything else takes an explicit cache.
pub fn default_cache() -> Arc<ChunkCache> {
    Arc::clone(DEFAULT_CACHE.get_or_init(|| Arc::new(ChunkCache::new(DEFAULT_CAPACITY_BYTES))))
}

/// Settings plus the cache and evaluator built from them.
#[derive(Debug, Clone)]
pub struct Session {
    settings: Settings,
    evaluator: Evaluator,
}

impl Session {
    /// Session with its own cache sized by `settings`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let cache = Arc::new(ChunkCache::new(settings.cache_capacity_bytes));
        Self::with_cache(settings, cache)
    }

    /// Session on the process-wide [`default_cache`].
    ///
    /// The default cache is resized to `settings.cache_capacity_bytes`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings.
    pub fn shared(settings: Settings) -> Result<Self> {
        let cache = default_cache();
        cache.resize(settings.cache_capacity_bytes);
        Self::with_cache(settings, cache)
    }

    /// Session on an existing cache; the cache keeps its current budget.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings.
    pub fn with_cache(settings: Settings, cache: Arc<ChunkCache>) -> Result<Self> {
        settings.validate()?;
        let mut builder = Evaluator::builder().cache(cache).parallel(settings.parallel);
        if let Some(threads) = settings.max_threads {
            builder = builder.max_threads(threads);
        }
        let evaluator = builder.build()?;
        debug!(?settings, "session ready");
        Ok(Self {
            settings,
            evaluator,
        })
    }

    /// Session from defaults and the environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::with_env_overrides`].
    pub fn from_env() -> Result<Self> {
        Self::new(Settings::default().with_env_overrides()?)
    }

    /// Catalog builder over `storage` using this session's chunk size.
    #[must_use]
    pub fn catalog(&self, storage: Arc<dyn StorageBackend>) -> CatalogBuilder {
        lazycat_catalog::CatalogView::builder(storage).chunk_rows(self.settings.chunk_rows)
    }

    /// Realize several arrays in one pass.
    ///
    /// # Errors
    ///
    /// Returns the evaluation error of the first failing chunk.
    pub fn compute(&self, arrays: &[&ChunkedArray]) -> Result<Vec<ArrayData>> {
        Ok(self.evaluator.compute(arrays)?)
    }

    /// Realize one array.
    ///
    /// # Errors
    ///
    /// See [`Session::compute`].
    pub fn compute_one(&self, array: &ChunkedArray) -> Result<ArrayData> {
        Ok(self.evaluator.compute_one(array)?)
    }

    /// Realize arrays and report what the evaluation did.
    ///
    /// # Errors
    ///
    /// See [`Session::compute`].
    pub fn compute_with_stats(
        &self,
        arrays: &[&ChunkedArray],
    ) -> Result<(Vec<ArrayData>, EvaluationStats)> {
        Ok(self.evaluator.compute_with_stats(arrays)?)
    }

    /// Change the cache budget, evicting as needed.
    pub fn resize_cache(&mut self, capacity_bytes: usize) {
        self.evaluator.cache().resize(capacity_bytes);
        self.settings.cache_capacity_bytes = capacity_bytes;
    }

    /// Drop every cached chunk
    pub fn clear_cache(&self) {
        self.evaluator.cache().clear();
    }

    /// Cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.evaluator.cache().stats()
    }

    /// Shared result cache
    #[must_use]
    pub const fn cache(&self) -> &Arc<ChunkCache> {
        self.evaluator.cache()
    }

    /// Evaluator used by [`Session::compute`]
    #[must_use]
    pub const fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Active settings
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }
}
