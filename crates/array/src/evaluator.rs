//! Evaluation of chunked arrays
//!
//! The evaluator expands the requested nodes into chunk tasks, checks them
//! with a [`TaskGraph`] and runs them in small batches of ready tasks,
//! either sequentially or on a rayon pool. Batches follow planning order,
//! which finishes one chunk's chain before starting the next, and every
//! intermediate chunk is dropped after its last consumer has run. Memory
//! held by an evaluation is therefore a few chunks per worker plus the
//! requested results, not whole columns.
//!
//! Results are written to the cache only after the whole call has
//! succeeded, so a failing evaluation leaves the cache untouched.

use crate::data::ArrayData;
use crate::kernels;
use crate::node::{Axis, NodeRef, OperationKind};
use crate::plan::{self, ChunkTask, Step};
use crate::storage::ReadRequest;
use crate::{ChunkedArray, Error, Result, StorageError};
use lazycat_cache::{GlobalCache, SizeBytes, format_byte_size};
use lazycat_task_graph::{Fingerprint, TaskGraph, TaskNodeData};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

/// Cache of realized chunks keyed by chunk fingerprint
pub type ChunkCache = GlobalCache<Fingerprint, Arc<ArrayData>>;

/// How an [`Evaluator`] runs independent tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Run independent chunk tasks concurrently
    pub parallel: bool,
    /// Size of a dedicated thread pool; `None` uses rayon's global pool
    pub max_threads: Option<usize>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_threads: None,
        }
    }
}

/// Counters describing one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationStats {
    /// Chunk tasks executed
    pub tasks: usize,
    /// Chunks served from the cache
    pub cache_hits: usize,
    /// Leaf reads issued to storage
    pub reads: usize,
    /// Bytes returned by those reads
    pub bytes_read: u64,
    /// Results written to the cache
    pub cached: usize,
    /// Scheduling rounds executed
    pub batches: usize,
}

/// Builder for [`Evaluator`]
#[derive(Debug, Default)]
pub struct EvaluatorBuilder {
    cache: Option<Arc<ChunkCache>>,
    capacity_bytes: Option<usize>,
    config: EvaluatorConfig,
}

impl EvaluatorBuilder {
    /// Share an existing cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ChunkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Create a private cache of this many bytes (ignored if a cache is
    /// shared).
    #[must_use]
    pub const fn cache_capacity(mut self, bytes: usize) -> Self {
        self.capacity_bytes = Some(bytes);
        self
    }

    /// Run independent tasks concurrently.
    #[must_use]
    pub const fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Use a dedicated pool of `threads` workers.
    #[must_use]
    pub const fn max_threads(mut self, threads: usize) -> Self {
        self.config.max_threads = Some(threads);
        self
    }

    /// Apply a whole configuration.
    #[must_use]
    pub const fn config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_threads` is zero or the
    /// thread pool cannot be created.
    pub fn build(self) -> Result<Evaluator> {
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(ChunkCache::new(
                self.capacity_bytes
                    .unwrap_or(lazycat_cache::DEFAULT_CAPACITY_BYTES),
            ))
        });
        let pool = match (self.config.parallel, self.config.max_threads) {
            (_, Some(0)) => {
                return Err(Error::configuration("max_threads must be at least 1"));
            }
            (true, Some(threads)) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("lazycat-eval-{i}"))
                    .build()
                    .map_err(|e| Error::configuration(e.to_string()))?,
            )),
            _ => None,
        };
        Ok(Evaluator {
            cache,
            config: self.config,
            pool,
        })
    }
}

/// Runs chunk task graphs against a shared cache.
#[derive(Clone)]
pub struct Evaluator {
    cache: Arc<ChunkCache>,
    config: EvaluatorConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

type TaskOutput = (Fingerprint, Arc<ArrayData>, Option<u64>);

impl Evaluator {
    /// Create a builder
    #[must_use]
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::default()
    }

    /// Evaluator over `cache` with the default configuration.
    #[must_use]
    pub fn new(cache: Arc<ChunkCache>) -> Self {
        Self {
            cache,
            config: EvaluatorConfig::default(),
            pool: None,
        }
    }

    /// Shared result cache
    #[must_use]
    pub const fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> EvaluatorConfig {
        self.config
    }

    /// Realize several arrays in one pass; shared subexpressions are
    /// computed once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] for failed leaf reads, [`Error::Computation`]
    /// for failed kernels and [`Error::Graph`] if scheduling fails.
    pub fn compute(&self, arrays: &[&ChunkedArray]) -> Result<Vec<ArrayData>> {
        let nodes: Vec<NodeRef> = arrays.iter().map(|a| Arc::clone(a.node())).collect();
        self.evaluate(&nodes).map(|(values, _)| values)
    }

    /// Realize one array.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::compute`].
    pub fn compute_one(&self, array: &ChunkedArray) -> Result<ArrayData> {
        let mut values = self.compute(&[array])?;
        values
            .pop()
            .ok_or_else(|| Error::configuration("evaluation returned no value"))
    }

    /// Realize arrays and report what the evaluation did.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::compute`].
    pub fn compute_with_stats(
        &self,
        arrays: &[&ChunkedArray],
    ) -> Result<(Vec<ArrayData>, EvaluationStats)> {
        let nodes: Vec<NodeRef> = arrays.iter().map(|a| Arc::clone(a.node())).collect();
        self.evaluate(&nodes)
    }

    /// Realize raw nodes.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::compute`].
    #[instrument(name = "evaluate", skip_all, fields(roots = nodes.len()))]
    pub fn evaluate(&self, nodes: &[NodeRef]) -> Result<(Vec<ArrayData>, EvaluationStats)> {
        let started = Instant::now();
        let plan = plan::plan(nodes, &self.cache)?;
        let mut stats = EvaluationStats {
            cache_hits: plan.ready.len(),
            ..EvaluationStats::default()
        };

        {
            let mut graph = TaskGraph::new();
            for task in &plan.tasks {
                graph.add_task(task.key, task.clone())?;
            }
            graph.add_dependency_edges()?;
            if graph.has_cycles() {
                return Err(lazycat_task_graph::Error::CycleDetected {
                    message: format!("{} chunk tasks", graph.task_count()),
                }
                .into());
            }
        }

        let pinned: HashSet<Fingerprint> = plan.roots.iter().flatten().copied().collect();
        let mut consumers: HashMap<Fingerprint, usize> = HashMap::new();
        for key in plan.tasks.iter().flat_map(|task| &task.inputs) {
            *consumers.entry(*key).or_default() += 1;
        }

        let mut values = plan.ready;
        let mut done: HashSet<Fingerprint> = HashSet::with_capacity(plan.tasks.len());
        let mut queue: VecDeque<ChunkTask> = plan.tasks.into();
        let mut staged = Staged::new(self.cache.capacity_bytes());
        let width = self.batch_width();

        while !queue.is_empty() {
            let batch = next_batch(&mut queue, &done, width);
            trace!(batch = stats.batches, tasks = batch.len(), "running batch");
            stats.batches += 1;

            let outputs = self.run_batch(&batch, &values);
            for output in outputs {
                let (key, value, bytes_read) = output?;
                if let Some(bytes) = bytes_read {
                    stats.reads += 1;
                    stats.bytes_read += bytes;
                }
                stats.tasks += 1;
                done.insert(key);
                values.insert(key, value);
            }

            for task in &batch {
                if task.node.is_cacheable() {
                    if let Some(value) = values.get(&task.key) {
                        staged.push(task.key, Arc::clone(value));
                    }
                }
                for input in &task.inputs {
                    release(input, &mut consumers, &pinned, &mut values);
                }
                if !consumers.contains_key(&task.key) && !pinned.contains(&task.key) {
                    values.remove(&task.key);
                }
            }
        }

        let results = nodes
            .iter()
            .zip(&plan.roots)
            .map(|(node, keys)| assemble(node, keys, &values))
            .collect::<Result<Vec<_>>>()?;

        stats.cached = staged.commit(&self.cache);

        info!(
            tasks = stats.tasks,
            cache_hits = stats.cache_hits,
            reads = stats.reads,
            bytes_read = %format_byte_size(stats.bytes_read as usize),
            batches = stats.batches,
            elapsed_ms = started.elapsed().as_millis(),
            "evaluation complete"
        );
        Ok((results, stats))
    }

    /// Tasks realized at once; bounds the chunks held between batches.
    fn batch_width(&self) -> usize {
        if !self.config.parallel {
            return 1;
        }
        let threads = self
            .pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads());
        threads.max(1) * 2
    }

    fn run_batch(
        &self,
        batch: &[ChunkTask],
        values: &HashMap<Fingerprint, Arc<ArrayData>>,
    ) -> Vec<Result<TaskOutput>> {
        if self.config.parallel && batch.len() > 1 {
            let run = || {
                batch
                    .par_iter()
                    .map(|task| execute(task, values))
                    .collect::<Vec<_>>()
            };
            match &self.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        } else {
            batch.iter().map(|task| execute(task, values)).collect()
        }
    }
}

/// Take up to `width` tasks whose inputs are all realized.
///
/// `queue` is in planning order, so its front task is always runnable.
/// Only a bounded window is scanned; tasks skipped in it keep their place.
fn next_batch(
    queue: &mut VecDeque<ChunkTask>,
    done: &HashSet<Fingerprint>,
    width: usize,
) -> Vec<ChunkTask> {
    let window = width * 8;
    let mut batch = Vec::with_capacity(width);
    let mut skipped = Vec::new();
    let mut scanned = 0;
    while batch.len() < width && scanned < window {
        let Some(task) = queue.pop_front() else {
            break;
        };
        scanned += 1;
        if task.dependencies().iter().all(|key| done.contains(key)) {
            batch.push(task);
        } else {
            skipped.push(task);
        }
    }
    for task in skipped.into_iter().rev() {
        queue.push_front(task);
    }
    batch
}

/// Drop a realized input once its last consumer has run.
fn release(
    key: &Fingerprint,
    consumers: &mut HashMap<Fingerprint, usize>,
    pinned: &HashSet<Fingerprint>,
    values: &mut HashMap<Fingerprint, Arc<ArrayData>>,
) {
    let Some(remaining) = consumers.get_mut(key) else {
        return;
    };
    *remaining = remaining.saturating_sub(1);
    if *remaining == 0 {
        consumers.remove(key);
        if !pinned.contains(key) {
            values.remove(key);
        }
    }
}

/// Results waiting for the evaluation to succeed before entering the cache.
///
/// Only the most recent `capacity` bytes are kept: anything older would be
/// evicted by the later puts of the same commit.
struct Staged {
    entries: VecDeque<(Fingerprint, Arc<ArrayData>)>,
    bytes: usize,
    capacity: usize,
}

impl Staged {
    const fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            capacity,
        }
    }

    fn push(&mut self, key: Fingerprint, value: Arc<ArrayData>) {
        self.bytes += value.size_bytes();
        self.entries.push_back((key, value));
        while self.bytes > self.capacity {
            match self.entries.pop_front() {
                Some((_, dropped)) => self.bytes -= dropped.size_bytes(),
                None => break,
            }
        }
    }

    fn commit(self, cache: &ChunkCache) -> usize {
        let mut stored = 0;
        for (key, value) in self.entries {
            if cache.put(key, value) {
                stored += 1;
            }
        }
        stored
    }
}

/// Evaluate nodes sequentially against `cache`.
///
/// # Errors
///
/// See [`Evaluator::compute`].
pub fn evaluate(nodes: &[NodeRef], cache: &Arc<ChunkCache>) -> Result<Vec<ArrayData>> {
    Evaluator::builder()
        .cache(Arc::clone(cache))
        .parallel(false)
        .build()?
        .evaluate(nodes)
        .map(|(values, _)| values)
}

fn computation_error(task: &ChunkTask, message: impl Into<String>) -> Error {
    Error::computation(
        task.node.operation().to_string(),
        task.node.fingerprint(),
        message,
    )
}

fn execute(task: &ChunkTask, values: &HashMap<Fingerprint, Arc<ArrayData>>) -> Result<TaskOutput> {
    let inputs = task
        .inputs
        .iter()
        .map(|key| {
            values
                .get(key)
                .map(|value| &**value)
                .ok_or_else(|| computation_error(task, format!("input {key:?} not realized")))
        })
        .collect::<Result<Vec<&ArrayData>>>()?;

    let node = &task.node;
    let mut bytes_read = None;
    let value = match (&task.step, node.operation()) {
        (Step::Read { rows }, OperationKind::Read(spec)) => {
            let request = ReadRequest::new(&spec.file, &spec.column, rows.clone());
            let io_error = |source: StorageError| Error::Io {
                file: spec.file.clone(),
                column: spec.column.clone(),
                byte_range: spec.storage.byte_range(&request, spec.row_bytes()),
                source,
            };
            let bytes = spec.storage.read_range(&request).map_err(io_error)?;
            bytes_read = Some(bytes.len() as u64);
            ArrayData::decode(spec.dtype, &node.chunk_shape(task.chunk), &bytes).map_err(|e| {
                computation_error(task, format!("undecodable payload from {}: {e}", spec.file))
            })?
        }
        (Step::Map, OperationKind::Map(op)) => {
            kernels::apply_map(op, &inputs).map_err(|e| computation_error(task, e.to_string()))?
        }
        (Step::Partial, OperationKind::Reduce { kind, axis }) => {
            let axis = match axis {
                Axis::All => None,
                Axis::Index(k) => Some(*k),
            };
            let input = single(task, &inputs)?;
            kernels::reduce_partial(*kind, input, axis)
                .map_err(|e| computation_error(task, e.to_string()))?
        }
        (Step::Combine { count }, OperationKind::Reduce { kind, .. }) => kernels::combine_partials(
            *kind,
            &inputs,
            *count,
            node.dtype(),
            node.shape(),
        )
        .map_err(|e| computation_error(task, e.to_string()))?,
        (Step::Local, OperationKind::Reduce { kind, axis: Axis::Index(k) }) => {
            kernels::reduce_local(*kind, single(task, &inputs)?, *k)
                .map_err(|e| computation_error(task, e.to_string()))?
        }
        (Step::Slice { start, end }, OperationKind::Slice { .. }) => single(task, &inputs)?
            .slice_rows(*start, *end)
            .map_err(|e| computation_error(task, e.to_string()))?,
        (Step::Local, OperationKind::Select { axis, index }) => single(task, &inputs)?
            .select(*axis, *index)
            .map_err(|e| computation_error(task, e.to_string()))?,
        (Step::Local, OperationKind::Reshape { .. }) => single(task, &inputs)?
            .reshape(&node.chunk_shape(task.chunk))
            .map_err(|e| computation_error(task, e.to_string()))?,
        (Step::Local, OperationKind::Concat { axis }) => ArrayData::concatenate(&inputs, *axis)
            .map_err(|e| computation_error(task, e.to_string()))?,
        (step, _) => {
            return Err(computation_error(
                task,
                format!("step {step:?} does not apply to this operation"),
            ));
        }
    };

    if value.shape() != node.chunk_shape(task.chunk).as_slice()
        && !matches!(task.step, Step::Partial)
    {
        return Err(computation_error(
            task,
            format!(
                "chunk {} has shape {:?}, expected {:?}",
                task.chunk,
                value.shape(),
                node.chunk_shape(task.chunk)
            ),
        ));
    }
    debug!(
        operation = %node.operation(),
        chunk = task.chunk,
        node = %node.fingerprint().short(),
        bytes = value.size_bytes(),
        "chunk realized"
    );
    Ok((task.key, Arc::new(value), bytes_read))
}

fn single<'a>(task: &ChunkTask, inputs: &[&'a ArrayData]) -> Result<&'a ArrayData> {
    match inputs {
        [input] => Ok(*input),
        _ => Err(computation_error(
            task,
            format!("expected one input, found {}", inputs.len()),
        )),
    }
}

fn assemble(
    node: &NodeRef,
    keys: &[Fingerprint],
    values: &HashMap<Fingerprint, Arc<ArrayData>>,
) -> Result<ArrayData> {
    let missing = |key: &Fingerprint| {
        Error::computation(
            node.operation().to_string(),
            node.fingerprint(),
            format!("chunk {key:?} not realized"),
        )
    };
    let chunks = keys
        .iter()
        .map(|key| values.get(key).map(|value| &**value).ok_or_else(|| missing(key)))
        .collect::<Result<Vec<&ArrayData>>>()?;
    let value = match chunks.as_slice() {
        [] => ArrayData::zeros(node.dtype(), node.shape()),
        [only] => (*only).clone(),
        many => ArrayData::concatenate(many, 0).map_err(|e| {
            Error::computation(
                node.operation().to_string(),
                node.fingerprint(),
                e.to_string(),
            )
        })?,
    };
    if value.shape() != node.shape() {
        return Err(Error::computation(
            node.operation().to_string(),
            node.fingerprint(),
            format!(
                "assembled shape {:?} differs from {:?}",
                value.shape(),
                node.shape()
            ),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_zero_threads() {
        let err = Evaluator::builder().max_threads(0).build().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_builder_creates_private_cache() {
        let evaluator = Evaluator::builder()
            .cache_capacity(1024)
            .parallel(false)
            .build()
            .unwrap();
        assert_eq!(evaluator.cache().capacity_bytes(), 1024);
        assert!(!evaluator.config().parallel);
    }

    #[test]
    fn test_builder_shares_cache() {
        let cache = Arc::new(ChunkCache::new(64));
        let evaluator = Evaluator::builder()
            .cache(Arc::clone(&cache))
            .max_threads(2)
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(evaluator.cache(), &cache));
    }

    #[test]
    fn test_empty_request() {
        let evaluator = Evaluator::new(Arc::new(ChunkCache::new(64)));
        let (values, stats) = evaluator.evaluate(&[]).unwrap();
        assert!(values.is_empty());
        assert_eq!(stats, EvaluationStats::default());
    }
}
