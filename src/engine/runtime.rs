// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::dag::{DependencyGraph, PendingRetry, RunState, ScheduledTask};
use crate::exec::{ClusterLaunchAdapter, run_attempt};

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent, RuntimeOptions, TaskId};

/// Control requests only ever carry cancellation, so a short queue is enough.
const CONTROL_CAPACITY: usize = 4;

/// Internal handle for a worker driving one attempt.
///
/// - `cancel` asks the worker to tear its pod down and exit without
///   reporting a completion.
/// - `handle` is the Tokio task that is actually running the worker.
struct ActiveTask {
    attempt: u32,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ActiveTask {
    fn request_stop(&mut self, task: &str) {
        match self.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(task, "worker already finished while stopping");
                }
            }
            None => debug!(task, "no cancel sender present; worker already stopping"),
        }
    }
}

/// Handle for observing and cancelling runs of a [`Runtime`] from other
/// tasks.
#[derive(Debug, Clone)]
pub struct RunHandle {
    control_tx: mpsc::Sender<RuntimeEvent>,
    snapshot_rx: watch::Receiver<Option<RunState>>,
}

impl RunHandle {
    /// Request cancellation of the active run.
    ///
    /// Pending nodes are skipped and running pods are torn down. Has no
    /// effect when no run is active. Never blocks: when the control queue is
    /// full a cancel request is already waiting, so this one is dropped.
    pub fn cancel(&self) {
        match self.control_tx.try_send(RuntimeEvent::CancelRequested) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("cancel already queued; request dropped"),
            Err(TrySendError::Closed(_)) => debug!("runtime dropped; cancel request ignored"),
        }
    }

    /// Latest published state of the current (or last) run.
    pub fn snapshot(&self) -> Option<RunState> {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Option<RunState>> {
        self.snapshot_rx.clone()
    }
}

/// Drives the DAG scheduler in response to `RuntimeEvent`s and delegates
/// pod handling to workers talking to a `ClusterLaunchAdapter`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// run semantics. This struct handles async IO: spawning workers, arming
/// retry timers, forwarding cancellation and publishing snapshots.
pub struct Runtime<A: ClusterLaunchAdapter + ?Sized + 'static> {
    core: CoreRuntime,
    adapter: Arc<A>,
    options: RuntimeOptions,
    permits: Arc<Semaphore>,
    control_tx: mpsc::Sender<RuntimeEvent>,
    control_rx: mpsc::Receiver<RuntimeEvent>,
    snapshot_tx: watch::Sender<Option<RunState>>,
}

impl<A: ClusterLaunchAdapter + ?Sized + 'static> fmt::Debug for Runtime<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<A: ClusterLaunchAdapter + ?Sized + 'static> Runtime<A> {
    pub fn new(graph: Arc<DependencyGraph>, adapter: Arc<A>, options: RuntimeOptions) -> Self {
        let core = CoreRuntime::from_graph(graph, &options);
        Self::with_core(core, adapter, options)
    }

    /// Wrap an existing core. Worker permits follow the core's concurrency
    /// limit; `options.concurrency_limit` is not consulted here.
    pub fn with_core(core: CoreRuntime, adapter: Arc<A>, options: RuntimeOptions) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (snapshot_tx, _) = watch::channel(None);
        let limit = core.concurrency_limit().min(Semaphore::MAX_PERMITS);
        let permits = Arc::new(Semaphore::new(limit));

        Self {
            core,
            adapter,
            permits,
            options,
            control_tx,
            control_rx,
            snapshot_tx,
        }
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            control_tx: self.control_tx.clone(),
            snapshot_rx: self.snapshot_tx.subscribe(),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        self.core.graph()
    }

    /// Execute one full run of the graph and return its final state.
    ///
    /// Node failures never surface as errors here; they are recorded in the
    /// returned `RunState`.
    pub async fn run(&mut self) -> RunState {
        while let Ok(stale) = self.control_rx.try_recv() {
            debug!(?stale, "dropping control request received before the run started");
        }

        // Fresh per-run channel: reports from a previous run can never leak
        // into this one.
        let (event_tx, mut event_rx) = mpsc::channel::<RuntimeEvent>(64);
        let mut workers: HashMap<TaskId, ActiveTask> = HashMap::new();
        let mut stopping: Vec<(TaskId, JoinHandle<()>)> = Vec::new();
        let mut timers = JoinSet::new();

        let step = self.core.start();
        info!(
            run_id = self.core.current_run_id(),
            dag_id = %self.core.graph().dag_id(),
            "runtime started run"
        );
        let mut keep_running =
            self.apply(step, &event_tx, &mut workers, &mut stopping, &mut timers);

        while keep_running {
            let event = tokio::select! {
                Some(event) = event_rx.recv() => event,
                Some(event) = self.control_rx.recv() => event,
                else => {
                    warn!("runtime channels closed before the run finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            if let RuntimeEvent::TaskCompleted { task, attempt, .. } = &event {
                if workers.get(task).is_some_and(|w| w.attempt == *attempt) {
                    workers.remove(task);
                }
            }

            let step = self.core.step(event);
            keep_running = self.apply(step, &event_tx, &mut workers, &mut stopping, &mut timers);
        }

        for (task, mut active) in workers.drain() {
            active.request_stop(&task);
            stopping.push((task, active.handle));
        }
        timers.abort_all();
        self.wait_for_stopped(stopping).await;

        let final_state = match self.core.take_run() {
            Some(run) => run,
            None => RunState::new(0, self.core.graph()),
        };
        self.snapshot_tx.send_replace(Some(final_state.clone()));

        info!(
            run_id = final_state.run_id(),
            status = ?final_state.overall_status(),
            "runtime finished run"
        );
        final_state
    }

    /// Execute the commands of one core step. Returns `keep_running`.
    fn apply(
        &self,
        step: CoreStep,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        workers: &mut HashMap<TaskId, ActiveTask>,
        stopping: &mut Vec<(TaskId, JoinHandle<()>)>,
        timers: &mut JoinSet<()>,
    ) -> bool {
        for command in step.commands {
            match command {
                CoreCommand::Submit(task) => self.spawn_worker(task, event_tx, workers),
                CoreCommand::RetryAfter(retry) => arm_retry(retry, event_tx, timers),
                CoreCommand::StopWorker { task } => {
                    if let Some(mut active) = workers.remove(&task) {
                        active.request_stop(&task);
                        stopping.push((task, active.handle));
                    } else {
                        debug!(task = %task, "no live worker to stop");
                    }
                }
                CoreCommand::RunFinished(status) => {
                    info!(?status, "core reported run finished");
                }
            }
        }

        self.snapshot_tx.send_replace(self.core.run_state().cloned());
        step.keep_running
    }

    fn spawn_worker(
        &self,
        task: ScheduledTask,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        workers: &mut HashMap<TaskId, ActiveTask>,
    ) {
        let name = task.task.clone();
        let attempt = task.attempt;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let adapter = Arc::clone(&self.adapter);
        let permits = Arc::clone(&self.permits);
        let worker_options = self.options.worker_options();
        let tx = event_tx.clone();
        let spawn_name = name.clone();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit,
                _ = &mut cancel_rx => {
                    debug!(task = %spawn_name, attempt, "worker stopped while waiting for a permit");
                    return;
                }
            };
            let Ok(_permit) = permit else {
                warn!(task = %spawn_name, "worker permits closed; dropping attempt");
                return;
            };
            run_attempt(adapter, task, worker_options, tx, cancel_rx).await;
            debug!(task = %spawn_name, attempt, "worker future finished");
        });

        let previous = workers.insert(
            name.clone(),
            ActiveTask {
                attempt,
                cancel: Some(cancel_tx),
                handle,
            },
        );
        if previous.is_some() {
            // Dropping the old cancel sender makes that worker stand down.
            warn!(task = %name, attempt, "replaced a worker that was still registered");
        }
    }

    /// Wait (bounded) for stopped workers to finish tearing their pods down.
    async fn wait_for_stopped(&self, stopping: Vec<(TaskId, JoinHandle<()>)>) {
        let limit = self.options.adapter_timeout + self.options.poll_interval;

        for (task, mut handle) in stopping {
            match tokio::time::timeout(limit, &mut handle).await {
                Ok(Ok(())) => debug!(task = %task, "worker stopped"),
                Ok(Err(e)) => warn!(task = %task, error = %e, "worker ended abnormally"),
                Err(_) => {
                    warn!(task = %task, "worker did not stop in time; aborting it");
                    handle.abort();
                }
            }
        }
    }
}

fn arm_retry(retry: PendingRetry, event_tx: &mpsc::Sender<RuntimeEvent>, timers: &mut JoinSet<()>) {
    let tx = event_tx.clone();
    debug!(
        task = %retry.task,
        run_id = retry.run_id,
        attempt = retry.attempt,
        delay_ms = retry.delay.as_millis() as u64,
        "arming retry timer"
    );

    timers.spawn(async move {
        tokio::time::sleep(retry.delay).await;
        let _ = tx
            .send(RuntimeEvent::RetryDue {
                task: retry.task,
                run_id: retry.run_id,
                attempt: retry.attempt,
            })
            .await;
    });
}
