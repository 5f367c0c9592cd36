use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use poddag::errors::LaunchError;
use poddag::exec::{AdapterFuture, ClusterLaunchAdapter, PodHandle, PodSpec, PodStatus};
use tracing::debug;

/// What the fake cluster does with pods of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Report `Running` once, then `Succeeded`.
    Succeed,
    /// Report `Running` once, then `Failed(reason)`.
    Fail(String),
    /// The first `n` attempts fail, later ones succeed.
    FailTimes(u32),
    /// `submit` itself fails.
    RejectLaunch,
    /// Stay `Running` until [`FakeAdapter::release`] is called.
    Hold,
    /// Stay `Pending` forever.
    StayPending,
    /// Every `status` call fails.
    BrokenStatus,
}

#[derive(Debug)]
struct FakePod {
    task: String,
    attempt: u32,
    polls: u32,
    live: bool,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, Script>,
    submit_delays: HashMap<String, Duration>,
    released: HashMap<String, bool>,
    attempts: HashMap<String, u32>,
    pods: HashMap<PodHandle, FakePod>,
    submitted: Vec<PodSpec>,
    terminated: Vec<PodHandle>,
    live: usize,
    max_live: usize,
}

/// A fake cluster adapter that:
/// - follows a per-task [`Script`] (default: [`Script::Succeed`])
/// - records every submitted `PodSpec` and every terminated handle
/// - tracks the highest number of pods alive at the same time.
#[derive(Debug, Clone, Default)]
pub struct FakeAdapter {
    state: Arc<Mutex<State>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, task: &str, script: Script) -> Self {
        self.lock().scripts.insert(task.to_string(), script);
        self
    }

    /// Make `submit` for `task` take `delay` before returning a handle.
    pub fn with_submit_delay(self, task: &str, delay: Duration) -> Self {
        self.lock().submit_delays.insert(task.to_string(), delay);
        self
    }

    /// Let a [`Script::Hold`] pod of `task` succeed on its next poll.
    pub fn release(&self, task: &str) {
        self.lock().released.insert(task.to_string(), true);
    }

    /// Task ids in submission order (one entry per attempt).
    pub fn submitted(&self) -> Vec<String> {
        self.lock()
            .submitted
            .iter()
            .map(|s| s.task_id.clone())
            .collect()
    }

    pub fn submitted_specs(&self) -> Vec<PodSpec> {
        self.lock().submitted.clone()
    }

    pub fn submit_count(&self, task: &str) -> usize {
        self.lock()
            .submitted
            .iter()
            .filter(|s| s.task_id == task)
            .count()
    }

    pub fn terminated(&self) -> Vec<PodHandle> {
        self.lock().terminated.clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.lock().max_live
    }

    /// Wait until a pod for `task` was submitted.
    pub async fn wait_until_submitted(&self, task: &str) {
        while self.submit_count(task) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake adapter state poisoned")
    }

    fn script_for(state: &State, task: &str) -> Script {
        state.scripts.get(task).cloned().unwrap_or(Script::Succeed)
    }
}

impl State {
    fn finish(&mut self, handle: &PodHandle) {
        if let Some(pod) = self.pods.get_mut(handle) {
            if pod.live {
                pod.live = false;
                self.live -= 1;
            }
        }
    }
}

impl ClusterLaunchAdapter for FakeAdapter {
    fn submit(&self, spec: PodSpec) -> AdapterFuture<'_, PodHandle> {
        Box::pin(async move {
            let delay = self.lock().submit_delays.get(&spec.task_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.lock();
            let task = spec.task_id.clone();
            state.submitted.push(spec);

            if Self::script_for(&state, &task) == Script::RejectLaunch {
                debug!(task = %task, "fake adapter rejecting launch");
                return Err(LaunchError::Rejected(format!("fake rejection of {task}")));
            }

            let attempt = {
                let n = state.attempts.entry(task.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let handle = PodHandle::new(format!("{task}-{attempt}"));

            state.pods.insert(
                handle.clone(),
                FakePod {
                    task,
                    attempt,
                    polls: 0,
                    live: true,
                },
            );
            state.live += 1;
            state.max_live = state.max_live.max(state.live);
            debug!(handle = %handle, live = state.live, "fake pod submitted");

            Ok(handle)
        })
    }

    fn status<'a>(&'a self, handle: &'a PodHandle) -> AdapterFuture<'a, PodStatus> {
        Box::pin(async move {
            let mut state = self.lock();
            let (task, attempt, polls) = {
                let pod = state
                    .pods
                    .get_mut(handle)
                    .ok_or_else(|| LaunchError::NotFound(handle.to_string()))?;
                pod.polls += 1;
                (pod.task.clone(), pod.attempt, pod.polls)
            };

            let status = match Self::script_for(&state, &task) {
                Script::Succeed if polls > 1 => PodStatus::Succeeded,
                Script::Fail(reason) if polls > 1 => PodStatus::Failed(reason),
                Script::FailTimes(n) if polls > 1 => {
                    if attempt <= n {
                        PodStatus::Failed(format!("scripted failure {attempt}/{n}"))
                    } else {
                        PodStatus::Succeeded
                    }
                }
                Script::Hold if state.released.get(&task).copied().unwrap_or(false) => {
                    PodStatus::Succeeded
                }
                Script::StayPending => PodStatus::Pending,
                Script::BrokenStatus => {
                    return Err(LaunchError::Backend("fake status failure".to_string()));
                }
                _ => PodStatus::Running,
            };

            if status.is_terminal() {
                state.finish(handle);
            }
            Ok(status)
        })
    }

    fn terminate<'a>(&'a self, handle: &'a PodHandle) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            debug!(handle = %handle, "fake pod terminated");
            let mut state = self.lock();
            state.terminated.push(handle.clone());
            state.finish(handle);
            Ok(())
        })
    }
}
