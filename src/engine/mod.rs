// src/engine/mod.rs

//! Orchestration engine for poddag.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the per-attempt pod workers
//! - the main runtime event loop that reacts to:
//!   - pod launch reports
//!   - attempt completions
//!   - elapsed retry backoffs
//!   - cancellation requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`schedule`] computes periodic fire times for
//! callers that re-run a graph on an interval.

use std::time::Duration;

use crate::exec::{PodHandle, WorkerOptions};

/// Canonical node id type used throughout the engine.
pub type TaskId = String;

/// Terminal outcome of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// The attempt failed; the string is a human-readable reason.
    Failed(String),
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Maximum number of nodes in `Running` at the same time.
    pub concurrency_limit: usize,
    /// Delay between two status polls of the same pod.
    pub poll_interval: Duration,
    /// Upper bound for every single adapter call.
    pub adapter_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let worker = WorkerOptions::default();
        Self {
            concurrency_limit: 4,
            poll_interval: worker.poll_interval,
            adapter_timeout: worker.adapter_timeout,
        }
    }
}

impl RuntimeOptions {
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            poll_interval: self.poll_interval,
            adapter_timeout: self.adapter_timeout,
        }
    }
}

/// Events flowing into the runtime from workers, timers and run handles.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The adapter accepted a pod for this attempt.
    TaskLaunched {
        task: TaskId,
        run_id: u64,
        attempt: u32,
        handle: PodHandle,
    },
    /// An attempt reached a terminal outcome.
    TaskCompleted {
        task: TaskId,
        run_id: u64,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// The retry backoff after failed attempt `attempt` elapsed.
    RetryDue {
        task: TaskId,
        run_id: u64,
        attempt: u32,
    },
    /// Cancel the active run.
    CancelRequested,
}

pub mod core;
pub mod runtime;
pub mod schedule;

pub mod event_handlers;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::{RunHandle, Runtime};
pub use schedule::{Schedule, parse_duration};
