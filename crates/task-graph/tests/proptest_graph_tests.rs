//! Property-based tests for the ordering guarantees the evaluator needs
//!
//! Graphs are generated as chunk DAGs keyed by fingerprints: task `i` may
//! only depend on tasks with a lower index, which keeps them acyclic.

#![allow(clippy::unwrap_used)]

use lazycat_task_graph::{Error, Fingerprint, TaskGraph, TaskNodeData};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
struct ChunkStep {
    inputs: Vec<Fingerprint>,
}

impl TaskNodeData for ChunkStep {
    type Key = Fingerprint;

    fn dependencies(&self) -> &[Fingerprint] {
        &self.inputs
    }
}

// =============================================================================
// Strategies
// =============================================================================

fn key(index: usize) -> Fingerprint {
    Fingerprint::builder("step").usize(index).finish()
}

/// Input indices per task, each strictly below the task's own index.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|count| {
        (0..count)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::btree_set(0..i, 0..=i.min(3))
                        .prop_map(|set| set.into_iter().collect())
                        .boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn build(inputs: &[Vec<usize>]) -> Result<TaskGraph<ChunkStep>, Error> {
    let mut graph = TaskGraph::new();
    for (i, deps) in inputs.iter().enumerate() {
        let step = ChunkStep {
            inputs: deps.iter().map(|d| key(*d)).collect(),
        };
        graph.add_task(key(i), step)?;
    }
    graph.add_dependency_edges()?;
    Ok(graph)
}

// =============================================================================
// Ordering
// =============================================================================

proptest! {
    #[test]
    fn topological_order_puts_inputs_first(inputs in dag_strategy(24)) {
        let graph = build(&inputs).unwrap();
        prop_assert!(!graph.has_cycles());

        let sorted = graph.topological_sort().unwrap();
        prop_assert_eq!(sorted.len(), inputs.len());
        let position: HashMap<Fingerprint, usize> =
            sorted.iter().enumerate().map(|(i, n)| (n.key, i)).collect();

        for (i, deps) in inputs.iter().enumerate() {
            for d in deps {
                prop_assert!(position[&key(*d)] < position[&key(i)]);
            }
        }
    }

    #[test]
    fn levels_hold_independent_tasks(inputs in dag_strategy(24)) {
        let graph = build(&inputs).unwrap();
        let levels = graph.get_parallel_groups().unwrap();

        let mut level_of: HashMap<Fingerprint, usize> = HashMap::new();
        for (depth, level) in levels.iter().enumerate() {
            prop_assert!(!level.is_empty());
            for node in level {
                prop_assert!(level_of.insert(node.key, depth).is_none(), "task scheduled twice");
            }
        }
        prop_assert_eq!(level_of.len(), inputs.len());

        for (i, deps) in inputs.iter().enumerate() {
            let depth = level_of[&key(i)];
            let expected = deps.iter().map(|d| level_of[&key(*d)] + 1).max().unwrap_or(0);
            prop_assert_eq!(depth, expected, "task sits one level above its deepest input");
        }
    }

    #[test]
    fn shared_inputs_are_planned_once(inputs in dag_strategy(16), extra in 0usize..16) {
        let mut graph = build(&inputs).unwrap();
        let before = graph.task_count();
        // re-adding an existing key is a no-op
        let existing = extra % inputs.len();
        graph.add_task(key(existing), ChunkStep { inputs: vec![] }).unwrap();
        prop_assert_eq!(graph.task_count(), before);
        prop_assert_eq!(
            graph.get_node(&key(existing)).unwrap().task.inputs.len(),
            inputs[existing].len()
        );
    }
}

// =============================================================================
// Failure modes
// =============================================================================

proptest! {
    #[test]
    fn rings_are_reported_as_cycles(len in 1usize..8) {
        let mut graph = TaskGraph::new();
        for i in 0..len {
            let prev = (i + len - 1) % len;
            graph.add_task(key(i), ChunkStep { inputs: vec![key(prev)] }).unwrap();
        }
        graph.add_dependency_edges().unwrap();

        prop_assert!(graph.has_cycles());
        let is_cycle = matches!(graph.get_parallel_groups(), Err(Error::CycleDetected { .. }));
        prop_assert!(is_cycle);
    }

    #[test]
    fn unknown_inputs_are_rejected(inputs in dag_strategy(10), ghost in 1000usize..2000) {
        let mut graph = build(&inputs).unwrap();
        let last = inputs.len();
        graph.add_task(key(last), ChunkStep { inputs: vec![key(ghost)] }).unwrap();

        match graph.add_dependency_edges() {
            Err(Error::MissingDependencies { missing }) => {
                prop_assert_eq!(missing.len(), 1);
                prop_assert_eq!(&missing[0].1, &key(ghost).to_string());
            }
            other => prop_assert!(false, "expected missing dependency, got {:?}", other),
        }
    }
}

// =============================================================================
// Fingerprints
// =============================================================================

proptest! {
    #[test]
    fn chunk_keys_are_distinct(count in 1usize..200) {
        let node = Fingerprint::builder("read").str("Position").finish();
        let keys: HashSet<Fingerprint> = (0..count)
            .flat_map(|i| [node.derive("chunk", i), node.derive("partial", i)])
            .collect();
        prop_assert_eq!(keys.len(), count * 2);
    }

    #[test]
    fn scalar_parameters_change_identity(a in any::<f64>(), b in any::<f64>()) {
        let input = Fingerprint::builder("read").finish();
        let scale = |factor: f64| {
            Fingerprint::builder("mul").fingerprint(&input).f64(factor).finish()
        };
        prop_assert_eq!(scale(a) == scale(b), a.to_bits() == b.to_bits());
    }
}
