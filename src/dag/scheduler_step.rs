// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::time::Duration;

use crate::engine::TaskId;
use crate::exec::PodSpec;

/// A launch attempt the scheduler wants the executor to perform now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task: TaskId,
    /// All attempts that belong to the same run share the same `run_id`.
    pub run_id: u64,
    /// 1 for the first launch, incremented on every retry.
    pub attempt: u32,
    /// Fully resolved pod description handed to the adapter.
    pub spec: PodSpec,
}

/// A failed attempt that should be retried after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    pub task: TaskId,
    pub run_id: u64,
    /// The attempt that failed.
    pub attempt: u32,
    pub delay: Duration,
}

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the DAG and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Attempts that should be submitted to the adapter, in dispatch order.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Failed attempts waiting for their backoff to elapse.
    pub retries: Vec<PendingRetry>,
    /// Nodes that reached `Failed` in this step.
    pub newly_failed: Vec<TaskId>,
    /// Nodes that reached `Skipped` in this step.
    pub newly_skipped: Vec<TaskId>,
    /// Running nodes whose worker must stop and tear its pod down.
    pub to_stop: Vec<TaskId>,
    /// Whether this step caused the current run to finish.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    /// Ids of the newly scheduled tasks, in dispatch order.
    pub fn scheduled_ids(&self) -> Vec<&str> {
        self.newly_scheduled.iter().map(|t| t.task.as_str()).collect()
    }
}
