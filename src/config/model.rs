// src/config/model.rs

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::Deserialize;

use crate::logging::LogLevel;
use crate::types::{DeployType, PullPolicy};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// dag_id = "composer_sample_kubernetes_pod"
/// schedule_interval = "1d"
///
/// [scheduler]
/// concurrency_limit = 4
///
/// [default]
/// retries = 1
///
/// [task.pi]
/// image = "perl"
/// cmds = ["perl"]
/// arguments = ["-Mbignum=bpi", "-wle", "print bpi(2000)"]
///
/// [task.passing-task]
/// image = "python:3.6"
/// after = ["pi"]
/// ```
///
/// Unknown keys are rejected at every level.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    pub dag_id: String,

    /// Optional run interval such as `"1d"` or `"30m"`.
    #[serde(default)]
    pub schedule_interval: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[task.<id>]`, keyed by node id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// holding one means every `after` reference exists, the graph is acyclic
/// and every secret binding resolves.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    inner: RawConfigFile,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(inner: RawConfigFile) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> RawConfigFile {
        self.inner
    }
}

impl Deref for ConfigFile {
    type Target = RawConfigFile;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,

    /// Overrides `PODDAG_LOG` when set.
    #[serde(default)]
    pub log_level: Option<LogLevel>,
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_adapter_timeout_ms() -> u64 {
    30_000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            adapter_timeout_ms: default_adapter_timeout_ms(),
            log_level: None,
        }
    }
}

/// `[default]` section: retry settings for tasks that do not override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultSection {
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_max_retry_delay_ms() -> u64 {
    300_000
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Pod name; defaults to the task id.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub image: String,

    /// Container entrypoint.
    #[serde(default)]
    pub cmds: Vec<String>,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default)]
    pub secrets: Vec<SecretConfig>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,

    #[serde(default = "default_get_logs")]
    pub get_logs: bool,

    #[serde(default)]
    pub image_pull_policy: PullPolicy,

    /// Overrides `[default].retries`.
    #[serde(default)]
    pub retries: Option<u32>,

    /// This task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_startup_timeout_seconds() -> u64 {
    120
}

fn default_get_logs() -> bool {
    true
}

/// One secret binding of a task.
///
/// ```toml
/// [[task.pi.secrets]]
/// deploy_type = "env"
/// deploy_target = "SQL_CONN"
/// secret = "airflow-secrets"
/// key = "sql_alchemy_conn"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    pub deploy_type: DeployType,
    /// Env var name, or mount path for volumes.
    pub deploy_target: String,
    pub secret: String,
    /// Required for `env`; optional for `volume`.
    #[serde(default)]
    pub key: Option<String>,
}

impl TaskConfig {
    /// Effective retry count given the `[default]` section.
    pub fn effective_retries(&self, defaults: &DefaultSection) -> u32 {
        self.retries.unwrap_or(defaults.retries)
    }
}
