// src/exec/worker.rs

//! Per-attempt worker: submit one pod, poll it to a terminal phase, report
//! back to the runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::errors::LaunchError;
use crate::exec::{ClusterLaunchAdapter, PodHandle, PodStatus};

/// Timing knobs shared by all workers of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Delay between two status polls of the same pod.
    pub poll_interval: Duration,
    /// Upper bound for every single adapter call.
    pub adapter_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            adapter_timeout: Duration::from_secs(30),
        }
    }
}

/// Run one launch attempt to completion.
///
/// Emits `TaskLaunched` once the adapter returned a handle, then exactly one
/// `TaskCompleted`. If the cancel channel fires (or its sender is dropped)
/// the worker tears the pod down itself and emits nothing further. A worker
/// cancelled before it submits never reaches the adapter; a pod that is
/// still being submitted when cancellation arrives is torn down as soon as
/// its handle is known.
pub async fn run_attempt<A>(
    adapter: Arc<A>,
    task: ScheduledTask,
    options: WorkerOptions,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) where
    A: ClusterLaunchAdapter + ?Sized,
{
    let ScheduledTask {
        task: name,
        run_id,
        attempt,
        spec,
    } = task;
    let startup_timeout = spec.startup_timeout;

    if cancel_requested(&mut cancel_rx) {
        debug!(task = %name, run_id, attempt, "run cancelled before submission; nothing to launch");
        return;
    }

    info!(
        task = %name,
        run_id,
        attempt,
        image = %spec.image,
        namespace = %spec.namespace,
        "submitting pod"
    );

    let handle = match call_with_timeout(options.adapter_timeout, adapter.submit(spec)).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(task = %name, run_id, attempt, error = %e, "pod launch failed");
            report(
                &runtime_tx,
                completed(&name, run_id, attempt, TaskOutcome::Failed(e.to_string())),
            )
            .await;
            return;
        }
    };

    if cancel_requested(&mut cancel_rx) {
        info!(task = %name, run_id, handle = %handle, "run cancelled during submission");
        terminate_best_effort(adapter.as_ref(), &handle, options.adapter_timeout).await;
        return;
    }

    report(
        &runtime_tx,
        RuntimeEvent::TaskLaunched {
            task: name.clone(),
            run_id,
            attempt,
            handle: handle.clone(),
        },
    )
    .await;

    let submitted_at = Instant::now();
    let mut seen_running = false;

    loop {
        let polled = tokio::select! {
            _ = &mut cancel_rx => {
                info!(task = %name, run_id, handle = %handle, "cancellation requested; tearing pod down");
                terminate_best_effort(adapter.as_ref(), &handle, options.adapter_timeout).await;
                return;
            }
            res = call_with_timeout(options.adapter_timeout, adapter.status(&handle)) => res,
        };

        let outcome = match polled {
            Ok(PodStatus::Succeeded) => Some(TaskOutcome::Success),
            Ok(PodStatus::Failed(reason)) => Some(TaskOutcome::Failed(reason)),
            Ok(PodStatus::Running) => {
                if !seen_running {
                    debug!(task = %name, run_id, handle = %handle, "pod running");
                    seen_running = true;
                }
                None
            }
            Ok(PodStatus::Pending) => {
                if !seen_running && submitted_at.elapsed() >= startup_timeout {
                    warn!(
                        task = %name,
                        run_id,
                        handle = %handle,
                        timeout_s = startup_timeout.as_secs(),
                        "pod did not start in time"
                    );
                    terminate_best_effort(adapter.as_ref(), &handle, options.adapter_timeout)
                        .await;
                    Some(TaskOutcome::Failed(format!(
                        "pod did not start within {startup_timeout:?}"
                    )))
                } else {
                    None
                }
            }
            Err(e) => {
                warn!(
                    task = %name,
                    run_id,
                    handle = %handle,
                    error = %e,
                    "status poll failed; treating attempt as failed"
                );
                terminate_best_effort(adapter.as_ref(), &handle, options.adapter_timeout).await;
                Some(TaskOutcome::Failed(format!("status poll failed: {e}")))
            }
        };

        if let Some(outcome) = outcome {
            info!(task = %name, run_id, attempt, handle = %handle, ?outcome, "pod finished");
            report(&runtime_tx, completed(&name, run_id, attempt, outcome)).await;
            return;
        }

        tokio::select! {
            _ = &mut cancel_rx => {
                info!(task = %name, run_id, handle = %handle, "cancellation requested; tearing pod down");
                terminate_best_effort(adapter.as_ref(), &handle, options.adapter_timeout).await;
                return;
            }
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

/// Ask the adapter to tear `handle` down; failures are logged, not returned.
pub async fn terminate_best_effort<A>(adapter: &A, handle: &PodHandle, limit: Duration)
where
    A: ClusterLaunchAdapter + ?Sized,
{
    match call_with_timeout(limit, adapter.terminate(handle)).await {
        Ok(()) => debug!(handle = %handle, "pod teardown requested"),
        Err(e) => warn!(handle = %handle, error = %e, "pod teardown failed; continuing"),
    }
}

async fn call_with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, LaunchError>
where
    F: Future<Output = Result<T, LaunchError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_elapsed) => Err(LaunchError::Timeout(limit)),
    }
}

fn cancel_requested(cancel_rx: &mut oneshot::Receiver<()>) -> bool {
    match cancel_rx.try_recv() {
        Ok(()) | Err(TryRecvError::Closed) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn completed(task: &str, run_id: u64, attempt: u32, outcome: TaskOutcome) -> RuntimeEvent {
    RuntimeEvent::TaskCompleted {
        task: task.to_string(),
        run_id,
        attempt,
        outcome,
    }
}

async fn report(runtime_tx: &mpsc::Sender<RuntimeEvent>, event: RuntimeEvent) {
    if runtime_tx.send(event).await.is_err() {
        debug!("runtime event channel closed; dropping worker report");
    }
}
