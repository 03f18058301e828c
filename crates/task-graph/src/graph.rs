//! Task graph builder using petgraph.
//!
//! This module builds directed acyclic graphs (DAGs) from task definitions
//! to handle dependencies and determine execution order.

use crate::{Error, Result, TaskNodeData};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use std::collections::HashMap;
use tracing::{debug, trace};

/// A node in the task graph.
#[derive(Debug, Clone)]
pub struct GraphNode<K, T> {
    /// Key of the task.
    pub key: K,
    /// The task data.
    pub task: T,
}

/// Task graph for dependency resolution and execution ordering.
///
/// This is a generic graph that can hold any task type implementing [`TaskNodeData`].
/// It provides methods for building the graph, resolving dependencies, and
/// computing execution order.
pub struct TaskGraph<T: TaskNodeData> {
    /// The directed graph of tasks.
    graph: DiGraph<GraphNode<T::Key, T>, ()>,
    /// Map from task keys to node indices.
    key_to_node: HashMap<T::Key, NodeIndex>,
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Create a new empty task graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            key_to_node: HashMap::new(),
        }
    }

    /// Add a single task to the graph.
    ///
    /// If a task with the same key already exists, returns the existing node index.
    ///
    /// # Errors
    ///
    /// Currently infallible, but returns `Result` for API consistency.
    pub fn add_task(&mut self, key: T::Key, task: T) -> Result<NodeIndex> {
        if let Some(&node) = self.key_to_node.get(&key) {
            return Ok(node);
        }

        let node_index = self.graph.add_node(GraphNode {
            key: key.clone(),
            task,
        });
        trace!(%key, "added task node");
        self.key_to_node.insert(key, node_index);

        Ok(node_index)
    }

    /// Get a reference to a task node by key.
    #[must_use]
    pub fn get_node(&self, key: &T::Key) -> Option<&GraphNode<T::Key, T>> {
        self.key_to_node
            .get(key)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Add dependency edges after all tasks have been added.
    ///
    /// This ensures proper cycle detection and missing dependency validation.
    ///
    /// # Errors
    ///
    /// Returns an error if any task depends on a task that is not in the graph.
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        let mut missing_deps = Vec::new();
        let mut edges_to_add = Vec::new();

        for (node_index, node) in self.graph.node_references() {
            for dep in node.task.dependencies() {
                if let Some(&dep_node_index) = self.key_to_node.get(dep) {
                    edges_to_add.push((dep_node_index, node_index));
                } else {
                    missing_deps.push((node.key.to_string(), dep.to_string()));
                }
            }
        }

        if !missing_deps.is_empty() {
            return Err(Error::MissingDependencies {
                missing: missing_deps,
            });
        }

        for (from, to) in edges_to_add {
            self.graph.update_edge(from, to, ());
        }

        Ok(())
    }

    /// Check if the graph has cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Get topologically sorted list of tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn topological_sort(&self) -> Result<Vec<GraphNode<T::Key, T>>> {
        match toposort(&self.graph, None) {
            Ok(sorted_indices) => Ok(sorted_indices
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => Err(Error::CycleDetected {
                message: format!(
                    "task '{}' is part of a dependency cycle",
                    self.graph[cycle.node_id()].key
                ),
            }),
        }
    }

    /// Get all tasks that can run in parallel (no dependencies between them).
    ///
    /// Returns a vector of parallel groups, where each group contains tasks
    /// that can execute concurrently. Groups are ordered by dependency level,
    /// and tasks keep their topological order inside a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn get_parallel_groups(&self) -> Result<Vec<Vec<GraphNode<T::Key, T>>>> {
        let sorted = self.topological_sort()?;

        if sorted.is_empty() {
            return Ok(vec![]);
        }

        let mut groups: Vec<Vec<GraphNode<T::Key, T>>> = vec![];
        let mut processed: HashMap<T::Key, usize> = HashMap::new();

        for node in sorted {
            // One level above the deepest dependency
            let level = node
                .task
                .dependencies()
                .iter()
                .filter_map(|dep| processed.get(dep))
                .map(|dep_level| dep_level + 1)
                .max()
                .unwrap_or(0);

            if level >= groups.len() {
                groups.resize_with(level + 1, Vec::new);
            }
            processed.insert(node.key.clone(), level);
            groups[level].push(node);
        }

        debug!(
            tasks = processed.len(),
            levels = groups.len(),
            "grouped tasks into parallel levels"
        );
        Ok(groups)
    }

    /// Get the number of tasks in the graph.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a task exists in the graph.
    #[must_use]
    pub fn contains_task(&self, key: &T::Key) -> bool {
        self.key_to_node.contains_key(key)
    }
}

impl<T: TaskNodeData> Default for TaskGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simple test task implementation
    #[derive(Clone, Debug, Default)]
    struct TestTask {
        deps: Vec<String>,
    }

    impl TestTask {
        fn new(deps: &[&str]) -> Self {
            Self {
                deps: deps.iter().map(|s| (*s).to_string()).collect(),
            }
        }
    }

    impl TaskNodeData for TestTask {
        type Key = String;

        fn dependencies(&self) -> &[String] {
            &self.deps
        }
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn test_task_graph_new() {
        let graph: TaskGraph<TestTask> = TaskGraph::new();
        assert_eq!(graph.task_count(), 0);
    }

    #[test]
    fn test_add_single_task() {
        let mut graph = TaskGraph::new();

        let node = graph.add_task(key("read"), TestTask::new(&[])).unwrap();
        assert!(graph.contains_task(&key("read")));
        assert_eq!(graph.task_count(), 1);

        // Adding same key again should return same node
        let node2 = graph.add_task(key("read"), TestTask::new(&[])).unwrap();
        assert_eq!(node, node2);
        assert_eq!(graph.task_count(), 1);
    }

    #[test]
    fn test_task_dependencies() {
        let mut graph = TaskGraph::new();

        graph.add_task(key("read"), TestTask::new(&[])).unwrap();
        graph.add_task(key("scale"), TestTask::new(&["read"])).unwrap();
        graph
            .add_task(key("sum"), TestTask::new(&["read", "scale"]))
            .unwrap();
        graph.add_dependency_edges().unwrap();

        assert_eq!(graph.task_count(), 3);
        assert!(!graph.has_cycles());

        let sorted = graph.topological_sort().unwrap();
        let positions: HashMap<String, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, node)| (node.key.clone(), i))
            .collect();

        assert!(positions["read"] < positions["scale"]);
        assert!(positions["read"] < positions["sum"]);
        assert!(positions["scale"] < positions["sum"]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = TaskGraph::new();

        graph.add_task(key("a"), TestTask::new(&["c"])).unwrap();
        graph.add_task(key("b"), TestTask::new(&["a"])).unwrap();
        graph.add_task(key("c"), TestTask::new(&["b"])).unwrap();
        graph.add_dependency_edges().unwrap();

        assert!(graph.has_cycles());
        let err = graph.topological_sort().unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn test_parallel_groups() {
        let mut graph = TaskGraph::new();

        // Level 0: a, b
        // Level 1: c (a), d (b)
        // Level 2: e (c, d)
        graph.add_task(key("a"), TestTask::new(&[])).unwrap();
        graph.add_task(key("b"), TestTask::new(&[])).unwrap();
        graph.add_task(key("c"), TestTask::new(&["a"])).unwrap();
        graph.add_task(key("d"), TestTask::new(&["b"])).unwrap();
        graph.add_task(key("e"), TestTask::new(&["c", "d"])).unwrap();
        graph.add_dependency_edges().unwrap();

        let groups = graph.get_parallel_groups().unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[2].len(), 1);
        assert_eq!(groups[2][0].key, "e");
    }

    #[test]
    fn test_missing_dependency() {
        let mut graph = TaskGraph::new();
        graph.add_task(key("a"), TestTask::new(&["ghost"])).unwrap();

        let err = graph.add_dependency_edges().unwrap_err();
        match err {
            Error::MissingDependencies { missing } => {
                assert_eq!(missing, vec![(key("a"), key("ghost"))]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_graph() {
        let graph: TaskGraph<TestTask> = TaskGraph::new();
        assert!(!graph.has_cycles());
        assert!(graph.topological_sort().unwrap().is_empty());
        assert!(graph.get_parallel_groups().unwrap().is_empty());
    }

    #[test]
    fn test_diamond_dependency() {
        let mut graph = TaskGraph::new();

        graph.add_task(key("leaf"), TestTask::new(&[])).unwrap();
        graph.add_task(key("left"), TestTask::new(&["leaf"])).unwrap();
        graph.add_task(key("right"), TestTask::new(&["leaf"])).unwrap();
        graph
            .add_task(key("root"), TestTask::new(&["left", "right"]))
            .unwrap();
        graph.add_dependency_edges().unwrap();

        let groups = graph.get_parallel_groups().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0][0].key, "leaf");
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[2][0].key, "root");
    }

    #[test]
    fn test_duplicate_dependency_adds_single_edge() {
        let mut graph = TaskGraph::new();
        graph.add_task(key("x"), TestTask::new(&[])).unwrap();
        graph
            .add_task(key("square"), TestTask::new(&["x", "x"]))
            .unwrap();
        graph.add_dependency_edges().unwrap();

        assert_eq!(graph.graph.edge_count(), 1);
        assert_eq!(graph.topological_sort().unwrap().len(), 2);
    }

    #[test]
    fn test_self_dependency_cycle() {
        let mut graph = TaskGraph::new();
        graph.add_task(key("loop"), TestTask::new(&["loop"])).unwrap();
        graph.add_dependency_edges().unwrap();

        assert!(graph.has_cycles());
    }
}
