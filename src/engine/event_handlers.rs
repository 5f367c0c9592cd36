// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::dag::{PendingRetry, RunStatus, ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::{TaskId, TaskOutcome};
use crate::exec::PodHandle;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Spawn a worker that submits and watches this attempt.
    Submit(ScheduledTask),
    /// Feed `RetryDue` back into the core once the backoff elapsed.
    RetryAfter(PendingRetry),
    /// Tell the worker of this node to tear its pod down and exit quietly.
    StopWorker { task: TaskId },
    /// The run reached a terminal state.
    RunFinished(RunStatus),
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep waiting for events.
    pub keep_running: bool,
}

impl CoreStep {
    /// Tasks submitted by this step, in dispatch order.
    pub fn submitted(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Submit(t) => Some(t.task.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Terminal status, if this step finished the run.
    pub fn finished(&self) -> Option<RunStatus> {
        self.commands.iter().find_map(|c| match c {
            CoreCommand::RunFinished(status) => Some(*status),
            _ => None,
        })
    }
}

/// Start a run and dispatch its roots.
pub fn handle_run_start(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.start_new_run();
    into_core_step(scheduler, step)
}

/// Record the pod handle of a launched attempt.
pub fn handle_task_launched(
    scheduler: &mut Scheduler,
    task: TaskId,
    run_id: u64,
    attempt: u32,
    handle: PodHandle,
) -> CoreStep {
    let step = scheduler.step_launched(&task, run_id, attempt, handle);
    into_core_step(scheduler, step)
}

/// Handle the terminal outcome of an attempt.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    task: TaskId,
    run_id: u64,
    attempt: u32,
    outcome: TaskOutcome,
) -> CoreStep {
    match &outcome {
        TaskOutcome::Success => debug!(task = %task, run_id, attempt, "attempt succeeded"),
        TaskOutcome::Failed(reason) => {
            debug!(task = %task, run_id, attempt, reason = %reason, "attempt failed")
        }
    }

    let step = scheduler.step_completion(&task, run_id, attempt, outcome);
    into_core_step(scheduler, step)
}

/// Launch the next attempt once a retry backoff elapsed.
pub fn handle_retry_due(
    scheduler: &mut Scheduler,
    task: TaskId,
    run_id: u64,
    attempt: u32,
) -> CoreStep {
    let step = scheduler.step_retry_due(&task, run_id, attempt);
    into_core_step(scheduler, step)
}

/// Cancel the active run.
pub fn handle_cancel(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.step_cancel();
    into_core_step(scheduler, step)
}

/// Translate a scheduler step into shell commands.
///
/// Order matters: workers are stopped before anything new is submitted, and
/// `RunFinished` is always last.
fn into_core_step(scheduler: &Scheduler, step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    commands.extend(
        step.to_stop
            .into_iter()
            .map(|task| CoreCommand::StopWorker { task }),
    );
    commands.extend(step.newly_scheduled.into_iter().map(CoreCommand::Submit));
    commands.extend(step.retries.into_iter().map(CoreCommand::RetryAfter));

    if step.run_just_finished {
        let status = scheduler
            .run_state()
            .map_or(RunStatus::Succeeded, |run| run.overall_status());
        info!(?status, "run finished");
        commands.push(CoreCommand::RunFinished(status));
    }

    CoreStep {
        commands,
        keep_running: !scheduler.is_idle(),
    }
}
