// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::dag::node::TaskNode;
use crate::dag::run_state::{NodeStatus, RunState};
use crate::engine::TaskId;
use crate::errors::{PoddagError, Result};

/// Directed acyclic graph of task nodes.
///
/// Edge direction is predecessor -> successor: for `add_edge("pi", "passing")`
/// the node `passing` only starts once `pi` has succeeded.
///
/// Every query that returns several nodes returns them in lexical id order
/// so that dispatch order is reproducible across runs.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    dag_id: String,
    graph: DiGraph<TaskNode, ()>,
    index: BTreeMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new(dag_id: impl Into<String>) -> Self {
        Self {
            dag_id: dag_id.into(),
            graph: DiGraph::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    /// Add a node. Fails with `DuplicateNode` if the id is already taken.
    pub fn add_node(&mut self, node: TaskNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(PoddagError::DuplicateNode(node.id));
        }

        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        Ok(())
    }

    /// Declare that `to` may only start after `from` succeeded.
    ///
    /// Fails with `UnknownNode` if either endpoint is missing and with
    /// `Cycle` if the edge would close a cycle. The graph is left untouched
    /// on error. Adding an existing edge again is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to)?;

        if self.graph.find_edge(from_idx, to_idx).is_some() {
            return Ok(());
        }

        // The new edge closes a cycle iff `from` is already reachable from `to`.
        if from_idx == to_idx || has_path_connecting(&self.graph, to_idx, from_idx, None) {
            return Err(PoddagError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.graph.add_edge(from_idx, to_idx, ());
        debug!(from, to, dag_id = %self.dag_id, "added dependency edge");
        Ok(())
    }

    /// Add `from -> to` for every `to`, stopping at the first error.
    pub fn add_edges(&mut self, from: &str, to: &[&str]) -> Result<()> {
        for succ in to {
            self.add_edge(from, succ)?;
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All node ids, lexically ordered.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(|s| s.as_str())
    }

    /// All nodes, lexically ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.index.values().map(|&idx| &self.graph[idx])
    }

    /// Immediate predecessors of `id`.
    pub fn predecessors_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, Direction::Incoming)
    }

    /// Immediate successors of `id`.
    pub fn successors_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, Direction::Outgoing)
    }

    /// Every node reachable from `id` (excluding `id` itself).
    pub fn descendants_of(&self, id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut stack = vec![start];

        while let Some(idx) = stack.pop() {
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(self.graph[succ].id.as_str()) {
                    stack.push(succ);
                }
            }
        }

        seen.into_iter().collect()
    }

    /// Nodes without predecessors.
    pub fn roots(&self) -> Vec<&str> {
        self.index
            .iter()
            .filter(|&(_, &idx)| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Kahn's algorithm with lexical tie-breaking.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .index
            .iter()
            .map(|(id, &idx)| {
                let deg = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count();
                (id.as_str(), deg)
            })
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for succ in self.successors_of(id) {
                if let Some(deg) = in_degree.get_mut(succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(succ);
                    }
                }
            }
        }

        order
    }

    /// Nodes that are `Pending` in `run` and whose predecessors have all
    /// `Succeeded`, in lexical id order.
    pub fn ready_nodes(&self, run: &RunState) -> Vec<&TaskNode> {
        self.nodes()
            .filter(|node| run.status_of(&node.id) == Some(NodeStatus::Pending))
            .filter(|node| {
                self.predecessors_of(&node.id)
                    .into_iter()
                    .all(|pred| run.status_of(pred) == Some(NodeStatus::Succeeded))
            })
            .collect()
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| PoddagError::UnknownNode(id.to_string()))
    }

    fn neighbours(&self, id: &str, dir: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };

        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].id.as_str())
            .collect();
        out.sort_unstable();
        out
    }
}
