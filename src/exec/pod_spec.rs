// src/exec/pod_spec.rs

//! Launch request handed to the cluster adapter.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::dag::TaskNode;
use crate::engine::TaskId;
use crate::errors::Result;
use crate::secrets::{self, InjectionInstruction};
use crate::types::PullPolicy;

/// Everything an adapter needs to create one pod for one attempt.
///
/// Secrets appear only as [`InjectionInstruction`]s; the adapter looks the
/// values up itself when the pod is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    pub task_id: TaskId,
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    /// Node labels plus the `dag_id`, `task_id`, `run_id` and `try_number`
    /// bookkeeping labels.
    pub labels: BTreeMap<String, String>,
    pub injections: Vec<InjectionInstruction>,
    pub image_pull_policy: PullPolicy,
    pub startup_timeout: Duration,
    pub get_logs: bool,
}

impl PodSpec {
    /// Build the spec for `attempt` of `node`, resolving its secrets.
    ///
    /// Fails with `UnresolvedSecret` if any secret reference is malformed.
    pub fn from_node(node: &TaskNode, dag_id: &str, run_id: u64, attempt: u32) -> Result<Self> {
        let injections = secrets::resolve_all(&node.secrets)?;

        let mut labels = node.labels.clone();
        labels.insert("dag_id".to_string(), dag_id.to_string());
        labels.insert("task_id".to_string(), node.id.clone());
        labels.insert("run_id".to_string(), run_id.to_string());
        labels.insert("try_number".to_string(), attempt.to_string());

        Ok(Self {
            task_id: node.id.clone(),
            name: node.pod_name.clone(),
            namespace: node.namespace.clone(),
            image: node.image.clone(),
            command: node.cmds.clone(),
            args: node.arguments.clone(),
            labels,
            injections,
            image_pull_policy: node.image_pull_policy,
            startup_timeout: node.startup_timeout,
            get_logs: node.get_logs,
        })
    }
}
