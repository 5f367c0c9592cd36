// src/exec/local.rs

//! Adapter that runs pod commands as local processes.
//!
//! Useful for running a graph on a developer machine without a cluster:
//! the pod's `command + args` is executed directly (the image is only
//! logged). Environment secrets are read from
//! `<secrets_dir>/<secret_name>/<key>` at launch time, the same layout a
//! mounted cluster secret has; the value goes straight into the child's
//! environment and is never handed back to the scheduler.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::LaunchError;
use crate::exec::{AdapterFuture, ClusterLaunchAdapter, PodHandle, PodSpec, PodStatus};
use crate::secrets::InjectionInstruction;

/// Bookkeeping for one local "pod".
struct LocalPod {
    status: Arc<Mutex<PodStatus>>,
    cancel: Option<oneshot::Sender<()>>,
}

pub struct LocalProcessAdapter {
    secrets_dir: PathBuf,
    pods: Mutex<HashMap<PodHandle, LocalPod>>,
    next_id: AtomicU64,
}

impl LocalProcessAdapter {
    pub fn new(secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            secrets_dir: secrets_dir.into(),
            pods: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of pods the adapter still tracks. Finished and torn-down pods
    /// are forgotten.
    pub fn pod_count(&self) -> usize {
        self.pods.lock().map(|pods| pods.len()).unwrap_or(0)
    }

    fn pods(&self) -> Result<MutexGuard<'_, HashMap<PodHandle, LocalPod>>, LaunchError> {
        self.pods
            .lock()
            .map_err(|_| LaunchError::Backend("local pod table lock poisoned".to_string()))
    }

    async fn launch(&self, spec: PodSpec) -> Result<PodHandle> {
        let Some((program, entry_args)) = spec.command.split_first() else {
            bail!(
                "pod '{}' has no command; the local adapter cannot run image '{}' directly",
                spec.name,
                spec.image
            );
        };

        let mut cmd = Command::new(program);
        cmd.args(entry_args).args(&spec.args);

        for injection in &spec.injections {
            match injection {
                InjectionInstruction::EnvFromSecret {
                    var,
                    secret_name,
                    key,
                } => {
                    let path = self.secrets_dir.join(secret_name).join(key);
                    let value = tokio::fs::read_to_string(&path).await.with_context(|| {
                        format!("reading key '{key}' of secret '{secret_name}' from {path:?}")
                    })?;
                    cmd.env(var, value.trim_end_matches('\n'));
                }
                InjectionInstruction::MountSecret {
                    secret_name,
                    mount_path,
                    ..
                } => {
                    bail!(
                        "secret volume '{secret_name}' at {mount_path}: volume mounts are not supported by the local adapter"
                    );
                }
            }
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for pod '{}'", spec.name))?;

        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = PodHandle::new(format!("{}-{n}", spec.name));

        info!(
            task = %spec.task_id,
            handle = %handle,
            image = %spec.image,
            pull_policy = %spec.image_pull_policy,
            cmd = %program,
            "started local pod process"
        );

        forward_output(&mut child, &handle, spec.get_logs);

        let status = Arc::new(Mutex::new(PodStatus::Running));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(supervise(child, Arc::clone(&status), cancel_rx, handle.clone()));

        self.pods()?.insert(
            handle.clone(),
            LocalPod {
                status,
                cancel: Some(cancel_tx),
            },
        );

        Ok(handle)
    }
}

impl ClusterLaunchAdapter for LocalProcessAdapter {
    fn submit(&self, spec: PodSpec) -> AdapterFuture<'_, PodHandle> {
        Box::pin(async move {
            self.launch(spec)
                .await
                .map_err(|e| LaunchError::Rejected(format!("{e:#}")))
        })
    }

    fn status<'a>(&'a self, handle: &'a PodHandle) -> AdapterFuture<'a, PodStatus> {
        Box::pin(async move {
            let mut pods = self.pods()?;
            let status = {
                let pod = pods
                    .get(handle)
                    .ok_or_else(|| LaunchError::NotFound(handle.to_string()))?;
                let guard = pod
                    .status
                    .lock()
                    .map_err(|_| LaunchError::Backend("pod status lock poisoned".to_string()))?;
                guard.clone()
            };

            if status.is_terminal() {
                pods.remove(handle);
                debug!(handle = %handle, "local pod reported its final phase; forgetting it");
            }
            Ok(status)
        })
    }

    fn terminate<'a>(&'a self, handle: &'a PodHandle) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            let mut pod = self
                .pods()?
                .remove(handle)
                .ok_or_else(|| LaunchError::NotFound(handle.to_string()))?;

            match pod.cancel.take() {
                Some(cancel) => {
                    if cancel.send(()).is_err() {
                        debug!(handle = %handle, "process already exited before teardown");
                    }
                }
                None => debug!(handle = %handle, "teardown already requested"),
            }
            Ok(())
        })
    }
}

/// Consume stdout/stderr so pipes never fill up.
///
/// Stdout lines are logged at `info` when `get_logs` is set; stderr is
/// always logged at `debug`.
fn forward_output(child: &mut Child, handle: &PodHandle, get_logs: bool) {
    if let Some(stdout) = child.stdout.take() {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if get_logs {
                    info!(handle = %handle, "stdout: {}", line);
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(handle = %handle, "stderr: {}", line);
            }
        });
    }
}

/// Wait for the process to exit or for a teardown request, and publish the
/// resulting phase.
async fn supervise(
    mut child: Child,
    status: Arc<Mutex<PodStatus>>,
    cancel_rx: oneshot::Receiver<()>,
    handle: PodHandle,
) {
    let phase = tokio::select! {
        exit = child.wait() => match exit {
            Ok(exit) if exit.success() => PodStatus::Succeeded,
            Ok(exit) => PodStatus::Failed(format!("exit code {}", exit.code().unwrap_or(-1))),
            Err(e) => PodStatus::Failed(format!("waiting for process: {e}")),
        },
        cancel = cancel_rx => {
            if cancel.is_ok() {
                info!(handle = %handle, "teardown requested; killing process");
            }
            if let Err(e) = child.kill().await {
                warn!(handle = %handle, error = %e, "failed to kill process on teardown");
            }
            PodStatus::Failed("terminated".to_string())
        }
    };

    debug!(handle = %handle, ?phase, "local pod finished");
    if let Ok(mut guard) = status.lock() {
        *guard = phase;
    }
}
