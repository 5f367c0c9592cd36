// src/dag/node.rs

//! Task node model: one pod launch plus its retry policy.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::TaskId;
use crate::errors::{PoddagError, Result};
use crate::secrets::SecretRef;
use crate::types::PullPolicy;

/// Default time a pod may stay `Pending` before the attempt is failed.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// How often, and how patiently, a failed node is re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the exponential backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` retries and the default backoff window.
    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    /// Backoff before retry number `retry_index` (0 for the first retry).
    ///
    /// `initial * 2^retry_index`, capped at `max_backoff`. No jitter, so a
    /// rerun with the same inputs waits the same amounts.
    pub fn backoff_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// One unit of work: a pod launch.
///
/// Created at graph-build time and never mutated afterwards; the
/// [`DependencyGraph`](crate::dag::DependencyGraph) only hands out shared
/// references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    /// Unique name within the graph.
    pub id: TaskId,
    /// Name given to the pod (defaults to `id`).
    pub pod_name: String,
    pub namespace: String,
    pub image: String,
    /// Container entrypoint.
    pub cmds: Vec<String>,
    pub arguments: Vec<String>,
    /// Discovery labels; not used for scheduling.
    pub labels: BTreeMap<String, String>,
    pub startup_timeout: Duration,
    /// Stream container stdout into the scheduler's log.
    pub get_logs: bool,
    pub secrets: Vec<SecretRef>,
    pub retry: RetryPolicy,
    pub image_pull_policy: PullPolicy,
}

impl TaskNode {
    pub fn builder(id: impl Into<TaskId>, image: impl Into<String>) -> TaskNodeBuilder {
        TaskNodeBuilder::new(id, image)
    }
}

/// Builder for [`TaskNode`].
#[derive(Debug, Clone)]
pub struct TaskNodeBuilder {
    node: TaskNode,
}

impl TaskNodeBuilder {
    pub fn new(id: impl Into<TaskId>, image: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            node: TaskNode {
                pod_name: id.clone(),
                id,
                namespace: "default".to_string(),
                image: image.into(),
                cmds: Vec::new(),
                arguments: Vec::new(),
                labels: BTreeMap::new(),
                startup_timeout: DEFAULT_STARTUP_TIMEOUT,
                get_logs: true,
                secrets: Vec::new(),
                retry: RetryPolicy::default(),
                image_pull_policy: PullPolicy::default(),
            },
        }
    }

    pub fn pod_name(mut self, name: impl Into<String>) -> Self {
        self.node.pod_name = name.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.node.namespace = namespace.into();
        self
    }

    pub fn cmds<I, S>(mut self, cmds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.cmds = cmds.into_iter().map(Into::into).collect();
        self
    }

    pub fn arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node.labels.insert(key.into(), value.into());
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.node.startup_timeout = timeout;
        self
    }

    pub fn get_logs(mut self, get_logs: bool) -> Self {
        self.node.get_logs = get_logs;
        self
    }

    pub fn secret(mut self, secret: SecretRef) -> Self {
        self.node.secrets.push(secret);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.node.retry = retry;
        self
    }

    pub fn image_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.node.image_pull_policy = policy;
        self
    }

    /// Finish the node, rejecting definitions no adapter could launch.
    pub fn build(self) -> Result<TaskNode> {
        let node = self.node;

        if node.id.trim().is_empty() {
            return Err(PoddagError::InvalidNode("node id must not be empty".to_string()));
        }
        if node.image.trim().is_empty() {
            return Err(PoddagError::InvalidNode(format!(
                "node '{}' has no image",
                node.id
            )));
        }
        if node.pod_name.trim().is_empty() {
            return Err(PoddagError::InvalidNode(format!(
                "node '{}' has an empty pod name",
                node.id
            )));
        }
        if node.startup_timeout.is_zero() {
            return Err(PoddagError::InvalidNode(format!(
                "node '{}' has a zero startup timeout",
                node.id
            )));
        }

        Ok(node)
    }
}
