// src/config/build.rs

//! Turning a validated [`ConfigFile`] into runtime objects.

use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::config::model::{ConfigFile, TaskConfig};
use crate::config::validate::secret_ref_from_config;
use crate::dag::{DependencyGraph, RetryPolicy, TaskNode};
use crate::engine::{RuntimeOptions, Schedule, parse_duration};
use crate::errors::Result;
use crate::logging::LogLevel;

impl ConfigFile {
    /// Build the dependency graph described by the `[task.*]` sections.
    pub fn build_graph(&self) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new(&self.dag_id);

        for (id, task) in self.task.iter() {
            graph.add_node(self.task_node(id, task)?)?;
        }

        for (id, task) in self.task.iter() {
            for dep in task.after.iter() {
                graph.add_edge(dep, id)?;
            }
        }

        debug!(
            dag_id = %graph.dag_id(),
            nodes = graph.len(),
            edges = graph.edge_count(),
            "built dependency graph from config"
        );
        Ok(graph)
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            concurrency_limit: self.scheduler.concurrency_limit,
            poll_interval: Duration::from_millis(self.scheduler.poll_interval_ms),
            adapter_timeout: Duration::from_millis(self.scheduler.adapter_timeout_ms),
        }
    }

    /// Level for [`init_logging`](crate::logging::init_logging); `None`
    /// defers to `PODDAG_LOG`.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.scheduler.log_level
    }

    /// Schedule starting at `start_at`, if `schedule_interval` is set.
    pub fn schedule(&self, start_at: SystemTime) -> Option<Schedule> {
        let interval = self.schedule_interval.as_deref()?;
        parse_duration(interval)
            .ok()
            .map(|interval| Schedule::new(interval, start_at))
    }

    fn task_node(&self, id: &str, task: &TaskConfig) -> Result<TaskNode> {
        let retry = RetryPolicy::retries(task.effective_retries(&self.default)).with_backoff(
            Duration::from_millis(self.default.retry_delay_ms),
            Duration::from_millis(self.default.max_retry_delay_ms),
        );

        let mut builder = TaskNode::builder(id, &task.image)
            .pod_name(task.name.as_deref().unwrap_or(id))
            .namespace(&task.namespace)
            .cmds(task.cmds.iter())
            .arguments(task.arguments.iter())
            .startup_timeout(Duration::from_secs(task.startup_timeout_seconds))
            .get_logs(task.get_logs)
            .image_pull_policy(task.image_pull_policy)
            .retry(retry);

        for (k, v) in task.labels.iter() {
            builder = builder.label(k, v);
        }
        for secret in task.secrets.iter() {
            builder = builder.secret(secret_ref_from_config(secret)?);
        }

        builder.build()
    }
}
