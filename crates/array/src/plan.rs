//! Expansion of node graphs into chunk tasks
//!
//! Every node chunk that has to be produced becomes one [`ChunkTask`] keyed
//! by a fingerprint derived from the node and the chunk index. Expansion
//! runs top-down and stops at the first chunk found in the cache, so cached
//! results prune their whole subgraph. Slices covering whole source chunks
//! and row concatenations resolve to the source chunk itself.

use crate::data::ArrayData;
use crate::evaluator::ChunkCache;
use crate::layout::ChunkPiece;
use crate::node::{Axis, NodeRef, OperationKind};
use crate::{Error, Result};
use lazycat_task_graph::{Fingerprint, TaskNodeData};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use tracing::trace;

/// What a chunk task does with its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Read file rows of the node's column
    Read { rows: Range<usize> },
    /// Elementwise operation over row-aligned input chunks
    Map,
    /// Reduce one input chunk ahead of a cross-chunk combine
    Partial,
    /// Merge every partial, in chunk order
    Combine { count: usize },
    /// Rows `start..end` of one input chunk
    Slice { start: usize, end: usize },
    /// Chunk-local operation: select, reshape, trailing-axis concat or
    /// trailing-axis reduction
    Local,
}

/// One unit of work in an evaluation.
#[derive(Debug, Clone)]
pub(crate) struct ChunkTask {
    pub(crate) key: Fingerprint,
    pub(crate) node: NodeRef,
    pub(crate) chunk: usize,
    pub(crate) step: Step,
    /// Keys of every input, in operand order
    pub(crate) inputs: Vec<Fingerprint>,
    /// Inputs that still have to be computed in this evaluation
    pending: Vec<Fingerprint>,
}

impl TaskNodeData for ChunkTask {
    type Key = Fingerprint;

    fn dependencies(&self) -> &[Fingerprint] {
        &self.pending
    }
}

/// Result of expanding the requested nodes.
#[derive(Debug)]
pub(crate) struct Plan {
    /// Tasks to run, every task after its inputs
    pub(crate) tasks: Vec<ChunkTask>,
    /// Chunks already available from the cache
    pub(crate) ready: HashMap<Fingerprint, Arc<ArrayData>>,
    /// Chunk keys of each requested node, in chunk order
    pub(crate) roots: Vec<Vec<Fingerprint>>,
}

/// Expand `nodes` into the chunk tasks that are not already cached.
pub(crate) fn plan(nodes: &[NodeRef], cache: &ChunkCache) -> Result<Plan> {
    let mut planner = Planner {
        cache,
        tasks: Vec::new(),
        known: HashSet::new(),
        ready: HashMap::new(),
    };
    let roots = nodes
        .iter()
        .map(|node| {
            (0..node.layout().num_chunks())
                .map(|index| planner.chunk(node, index))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    trace!(
        tasks = planner.tasks.len(),
        cached = planner.ready.len(),
        "expanded chunk tasks"
    );
    Ok(Plan {
        tasks: planner.tasks,
        ready: planner.ready,
        roots,
    })
}

struct Planner<'a> {
    cache: &'a ChunkCache,
    tasks: Vec<ChunkTask>,
    known: HashSet<Fingerprint>,
    ready: HashMap<Fingerprint, Arc<ArrayData>>,
}

impl Planner<'_> {
    fn chunk(&mut self, node: &NodeRef, index: usize) -> Result<Fingerprint> {
        match node.operation() {
            OperationKind::Concat { axis: 0 } => {
                let (input, local) = concat_source(node, index)?;
                return self.chunk(&input, local);
            }
            OperationKind::Slice { pieces, .. } => {
                let piece = piece_at(node, pieces, index)?;
                if piece.whole {
                    return self.chunk(first_input(node)?, piece.source);
                }
            }
            _ => {}
        }

        let key = node.fingerprint().derive("chunk", index);
        if self.resolved(node, key) {
            return Ok(key);
        }

        let (step, inputs) = match node.operation() {
            OperationKind::Read(spec) => {
                let chunk = node
                    .layout()
                    .chunk(index)
                    .ok_or_else(|| missing_chunk(node, index))?;
                let rows = spec.rows.start + chunk.start..spec.rows.start + chunk.end;
                (Step::Read { rows }, Vec::new())
            }
            OperationKind::Map(_) => {
                let inputs = node
                    .inputs()
                    .iter()
                    .map(|input| self.chunk(input, index))
                    .collect::<Result<Vec<_>>>()?;
                (Step::Map, inputs)
            }
            OperationKind::Reduce {
                axis: Axis::Index(k),
                ..
            } if *k > 0 => (Step::Local, vec![self.chunk(first_input(node)?, index)?]),
            OperationKind::Reduce { axis, .. } => {
                let input = first_input(node)?;
                let count = match axis {
                    Axis::All => input.shape().iter().product(),
                    Axis::Index(_) => input.shape().first().copied().unwrap_or(1),
                };
                let partials = (0..input.layout().num_chunks())
                    .map(|source| self.partial(node, input, source))
                    .collect::<Result<Vec<_>>>()?;
                (Step::Combine { count }, partials)
            }
            OperationKind::Slice { pieces, .. } => {
                let piece = piece_at(node, pieces, index)?;
                let source = self.chunk(first_input(node)?, piece.source)?;
                let step = Step::Slice {
                    start: piece.local_start,
                    end: piece.local_end,
                };
                (step, vec![source])
            }
            OperationKind::Select { .. } | OperationKind::Reshape { .. } => {
                (Step::Local, vec![self.chunk(first_input(node)?, index)?])
            }
            OperationKind::Concat { .. } => {
                let inputs = node
                    .inputs()
                    .iter()
                    .map(|input| self.chunk(input, index))
                    .collect::<Result<Vec<_>>>()?;
                (Step::Local, inputs)
            }
        };
        self.push(key, node, index, step, inputs);
        Ok(key)
    }

    fn partial(&mut self, node: &NodeRef, input: &NodeRef, index: usize) -> Result<Fingerprint> {
        let key = node.fingerprint().derive("partial", index);
        if self.resolved(node, key) {
            return Ok(key);
        }
        let source = self.chunk(input, index)?;
        self.push(key, node, index, Step::Partial, vec![source]);
        Ok(key)
    }

    /// `true` if `key` is already planned or was found in the cache.
    fn resolved(&mut self, node: &NodeRef, key: Fingerprint) -> bool {
        if self.known.contains(&key) || self.ready.contains_key(&key) {
            return true;
        }
        if node.is_cacheable() {
            if let Some(value) = self.cache.get(&key) {
                self.ready.insert(key, value);
                return true;
            }
        }
        false
    }

    fn push(
        &mut self,
        key: Fingerprint,
        node: &NodeRef,
        chunk: usize,
        step: Step,
        inputs: Vec<Fingerprint>,
    ) {
        let pending = inputs
            .iter()
            .filter(|input| !self.ready.contains_key(*input))
            .copied()
            .collect();
        self.known.insert(key);
        self.tasks.push(ChunkTask {
            key,
            node: Arc::clone(node),
            chunk,
            step,
            inputs,
            pending,
        });
    }
}

fn first_input(node: &NodeRef) -> Result<&NodeRef> {
    node.inputs().first().ok_or_else(|| {
        Error::computation(
            node.operation().to_string(),
            node.fingerprint(),
            "operation has no input",
        )
    })
}

fn missing_chunk(node: &NodeRef, index: usize) -> Error {
    Error::computation(
        node.operation().to_string(),
        node.fingerprint(),
        format!(
            "chunk {index} outside layout of {} chunks",
            node.layout().num_chunks()
        ),
    )
}

fn piece_at(
    node: &NodeRef,
    pieces: &[ChunkPiece],
    index: usize,
) -> Result<ChunkPiece> {
    pieces
        .get(index)
        .copied()
        .ok_or_else(|| missing_chunk(node, index))
}

fn concat_source(node: &NodeRef, index: usize) -> Result<(NodeRef, usize)> {
    let mut local = index;
    for input in node.inputs() {
        let chunks = input.layout().num_chunks();
        if local < chunks {
            return Ok((Arc::clone(input), local));
        }
        local -= chunks;
    }
    Err(missing_chunk(node, index))
}
