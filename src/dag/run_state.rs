// src/dag/run_state.rs

//! Per-run execution record.
//!
//! A [`RunState`] maps every node of a graph to its status for one run.
//! Only the scheduler mutates it; everyone else works on cloned snapshots.

use std::collections::BTreeMap;

use crate::dag::graph::DependencyGraph;
use crate::engine::TaskId;
use crate::errors::{PoddagError, Result};
use crate::exec::PodHandle;

/// Status of a node within one run.
///
/// Allowed transitions:
/// `Pending -> Running -> {Succeeded | Failed}` and `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never started: an upstream node failed or the run was cancelled.
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Running)
                | (NodeStatus::Pending, NodeStatus::Skipped)
                | (NodeStatus::Running, NodeStatus::Succeeded)
                | (NodeStatus::Running, NodeStatus::Failed)
        )
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Some node is still pending or running.
    Running,
    Succeeded,
    /// At least one node failed permanently.
    Failed,
    Cancelled,
}

/// What the scheduler knows about one node in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub status: NodeStatus,
    /// Attempts started so far (first launch included).
    pub attempts: u32,
    /// Handle of the current (or last) pod, once the adapter returned one.
    pub handle: Option<PodHandle>,
    /// Most recent failure detail.
    pub failure: Option<String>,
}

impl NodeRecord {
    fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempts: 0,
            handle: None,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    run_id: u64,
    dag_id: String,
    records: BTreeMap<TaskId, NodeRecord>,
    cancelled: bool,
}

impl RunState {
    /// Fresh run with every node of `graph` pending.
    pub fn new(run_id: u64, graph: &DependencyGraph) -> Self {
        let records = graph
            .node_ids()
            .map(|id| (id.to_string(), NodeRecord::pending()))
            .collect();

        Self {
            run_id,
            dag_id: graph.dag_id().to_string(),
            records,
            cancelled: false,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    pub fn status_of(&self, task: &str) -> Option<NodeStatus> {
        self.records.get(task).map(|r| r.status)
    }

    pub fn record(&self, task: &str) -> Option<&NodeRecord> {
        self.records.get(task)
    }

    /// All records, lexically ordered by node id.
    pub fn records(&self) -> impl Iterator<Item = (&str, &NodeRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == NodeStatus::Running)
            .count()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// No node is pending or running.
    pub fn is_finished(&self) -> bool {
        self.records.values().all(|r| r.status.is_terminal())
    }

    pub fn overall_status(&self) -> RunStatus {
        if !self.is_finished() {
            return RunStatus::Running;
        }
        if self.cancelled {
            return RunStatus::Cancelled;
        }
        if self
            .records
            .values()
            .all(|r| r.status == NodeStatus::Succeeded)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }

    /// Move `task` to `next`, enforcing the node state machine.
    pub(crate) fn transition(&mut self, task: &str, next: NodeStatus) -> Result<()> {
        let record = self
            .records
            .get_mut(task)
            .ok_or_else(|| PoddagError::UnknownNode(task.to_string()))?;

        if !record.status.can_transition_to(next) {
            return Err(PoddagError::InvalidTransition {
                task: task.to_string(),
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        Ok(())
    }

    /// Count a new attempt for `task` and return the attempt number.
    pub(crate) fn begin_attempt(&mut self, task: &str) -> u32 {
        match self.records.get_mut(task) {
            Some(record) => {
                record.attempts += 1;
                record.handle = None;
                record.attempts
            }
            None => 0,
        }
    }

    pub(crate) fn set_handle(&mut self, task: &str, handle: Option<PodHandle>) {
        if let Some(record) = self.records.get_mut(task) {
            record.handle = handle;
        }
    }

    pub(crate) fn set_failure(&mut self, task: &str, reason: impl Into<String>) {
        if let Some(record) = self.records.get_mut(task) {
            record.failure = Some(reason.into());
        }
    }

    pub(crate) fn clear_failure(&mut self, task: &str) {
        if let Some(record) = self.records.get_mut(task) {
            record.failure = None;
        }
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskNode;

    fn graph() -> DependencyGraph {
        let mut g = DependencyGraph::new("d");
        g.add_node(TaskNode::builder("a", "img").build().unwrap()).unwrap();
        g.add_node(TaskNode::builder("b", "img").build().unwrap()).unwrap();
        g.add_edge("a", "b").unwrap();
        g
    }

    #[test]
    fn only_state_machine_transitions_are_allowed() {
        let mut run = RunState::new(1, &graph());

        assert!(matches!(
            run.transition("a", NodeStatus::Succeeded),
            Err(PoddagError::InvalidTransition { .. })
        ));
        run.transition("a", NodeStatus::Running).unwrap();
        assert!(run.transition("a", NodeStatus::Pending).is_err());
        assert!(run.transition("a", NodeStatus::Skipped).is_err());
        run.transition("a", NodeStatus::Failed).unwrap();
        assert!(run.transition("a", NodeStatus::Running).is_err());

        run.transition("b", NodeStatus::Skipped).unwrap();
        assert!(run.is_finished());
        assert_eq!(run.overall_status(), RunStatus::Failed);
    }

    #[test]
    fn overall_status_tracks_progress() {
        let mut run = RunState::new(7, &graph());
        assert_eq!(run.run_id(), 7);
        assert_eq!(run.overall_status(), RunStatus::Running);

        for task in ["a", "b"] {
            run.transition(task, NodeStatus::Running).unwrap();
            run.transition(task, NodeStatus::Succeeded).unwrap();
        }
        assert_eq!(run.overall_status(), RunStatus::Succeeded);
    }

    #[test]
    fn attempts_reset_handle() {
        let mut run = RunState::new(1, &graph());
        assert_eq!(run.begin_attempt("a"), 1);
        run.set_handle("a", Some(PodHandle::new("pod-1")));
        assert_eq!(run.begin_attempt("a"), 2);
        assert_eq!(run.record("a").unwrap().handle, None);
        assert_eq!(run.begin_attempt("ghost"), 0);
    }
}
