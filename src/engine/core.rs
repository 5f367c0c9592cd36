// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated run state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - spawning one worker per submitted attempt
//! - arming retry timers and forwarding cancellation
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, adapters, or processes.

use std::sync::Arc;

use crate::dag::{DependencyGraph, RunState, Scheduler};
use crate::engine::event_handlers::{
    CoreStep, handle_cancel, handle_retry_due, handle_run_start, handle_task_completion,
    handle_task_launched,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn from_graph(graph: Arc<DependencyGraph>, options: &RuntimeOptions) -> Self {
        Self::new(Scheduler::new(graph, options.concurrency_limit))
    }

    pub fn graph(&self) -> &DependencyGraph {
        self.scheduler.graph()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.scheduler.concurrency_limit()
    }

    /// Expose whether the scheduler is idle (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn current_run_id(&self) -> Option<u64> {
        self.scheduler.current_run_id()
    }

    /// Current (or last finished) run.
    pub fn run_state(&self) -> Option<&RunState> {
        self.scheduler.run_state()
    }

    pub fn take_run(&mut self) -> Option<RunState> {
        self.scheduler.take_run()
    }

    /// Begin a new run.
    pub fn start(&mut self) -> CoreStep {
        handle_run_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskLaunched {
                task,
                run_id,
                attempt,
                handle,
            } => handle_task_launched(&mut self.scheduler, task, run_id, attempt, handle),
            RuntimeEvent::TaskCompleted {
                task,
                run_id,
                attempt,
                outcome,
            } => handle_task_completion(&mut self.scheduler, task, run_id, attempt, outcome),
            RuntimeEvent::RetryDue {
                task,
                run_id,
                attempt,
            } => handle_retry_due(&mut self.scheduler, task, run_id, attempt),
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dag::{NodeStatus, RetryPolicy, RunStatus, TaskNode};
    use crate::engine::{CoreCommand, TaskOutcome};
    use crate::exec::PodHandle;

    fn core_for(graph: DependencyGraph, limit: usize) -> CoreRuntime {
        let options = RuntimeOptions {
            concurrency_limit: limit,
            ..RuntimeOptions::default()
        };
        CoreRuntime::from_graph(Arc::new(graph), &options)
    }

    fn chain() -> DependencyGraph {
        let mut g = DependencyGraph::new("chain");
        g.add_node(
            TaskNode::builder("a", "busybox")
                .retry(
                    RetryPolicy::retries(1)
                        .with_backoff(Duration::from_millis(10), Duration::from_millis(10)),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        g.add_node(TaskNode::builder("b", "busybox").build().unwrap())
            .unwrap();
        g.add_edge("a", "b").unwrap();
        g
    }

    fn completed(task: &str, attempt: u32, outcome: TaskOutcome) -> RuntimeEvent {
        RuntimeEvent::TaskCompleted {
            task: task.to_string(),
            run_id: 1,
            attempt,
            outcome,
        }
    }

    #[test]
    fn start_submits_roots_and_keeps_running() {
        let mut core = core_for(chain(), 4);
        let step = core.start();

        assert_eq!(step.submitted(), vec!["a"]);
        assert!(step.keep_running);
        assert_eq!(core.current_run_id(), Some(1));
    }

    #[test]
    fn retry_then_success_finishes_the_run() {
        let mut core = core_for(chain(), 4);
        core.start();

        let step = core.step(completed("a", 1, TaskOutcome::Failed("boom".into())));
        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::RetryAfter(r)] if r.task == "a" && r.delay == Duration::from_millis(10)
        ));

        let step = core.step(RuntimeEvent::RetryDue {
            task: "a".into(),
            run_id: 1,
            attempt: 1,
        });
        assert_eq!(step.submitted(), vec!["a"]);

        let step = core.step(completed("a", 2, TaskOutcome::Success));
        assert_eq!(step.submitted(), vec!["b"]);

        let step = core.step(completed("b", 1, TaskOutcome::Success));
        assert_eq!(step.finished(), Some(RunStatus::Succeeded));
        assert!(!step.keep_running);
        assert!(core.is_idle());
    }

    #[test]
    fn cancel_stops_running_worker_and_finishes() {
        let mut core = core_for(chain(), 4);
        core.start();
        core.step(RuntimeEvent::TaskLaunched {
            task: "a".into(),
            run_id: 1,
            attempt: 1,
            handle: PodHandle::new("a-1"),
        });

        let step = core.step(RuntimeEvent::CancelRequested);
        assert!(matches!(
            step.commands.first(),
            Some(CoreCommand::StopWorker { task }) if task == "a"
        ));
        assert_eq!(step.finished(), Some(RunStatus::Cancelled));

        let run = core.run_state().unwrap();
        assert_eq!(run.status_of("a"), Some(NodeStatus::Failed));
        assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));

        // A late completion from the stopped worker changes nothing.
        let late = core.step(completed("a", 1, TaskOutcome::Success));
        assert!(late.commands.is_empty());
        assert_eq!(
            core.run_state().unwrap().status_of("a"),
            Some(NodeStatus::Failed)
        );
    }

    #[test]
    fn retry_due_after_cancel_is_ignored() {
        let mut core = core_for(chain(), 4);
        core.start();
        core.step(completed("a", 1, TaskOutcome::Failed("boom".into())));
        core.step(RuntimeEvent::CancelRequested);

        let step = core.step(RuntimeEvent::RetryDue {
            task: "a".into(),
            run_id: 1,
            attempt: 1,
        });
        assert!(step.commands.is_empty());
    }
}
