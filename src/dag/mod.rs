// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`node`] holds the immutable task node model and retry policy.
//! - [`graph`] holds the directed acyclic graph of task nodes.
//! - [`run_state`] records per-run node status.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which nodes are dispatched, retried, failed or skipped.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod graph;
pub mod node;
pub mod run_state;
pub mod scheduler;
pub mod scheduler_step;

pub use graph::DependencyGraph;
pub use node::{RetryPolicy, TaskNode, TaskNodeBuilder};
pub use run_state::{NodeRecord, NodeStatus, RunState, RunStatus};
pub use scheduler::Scheduler;
pub use scheduler_step::{PendingRetry, ScheduledTask, SchedulerStep};
