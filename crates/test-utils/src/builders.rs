#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use poddag::config::{
    ConfigFile, DefaultSection, RawConfigFile, SchedulerSection, SecretConfig, TaskConfig,
};
use poddag::dag::{DependencyGraph, RetryPolicy, TaskNode};
use poddag::types::{DeployType, PullPolicy};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(dag_id: &str) -> Self {
        Self {
            config: RawConfigFile {
                dag_id: dag_id.to_string(),
                schedule_interval: None,
                scheduler: SchedulerSection::default(),
                default: DefaultSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, id: &str, task: TaskConfig) -> Self {
        self.config.task.insert(id.to_string(), task);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.config.scheduler.concurrency_limit = limit;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.scheduler.poll_interval_ms = ms;
        self
    }

    pub fn with_default_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.config.default.retries = retries;
        self.config.default.retry_delay_ms = delay_ms;
        self.config.default.max_retry_delay_ms = self.config.default.max_retry_delay_ms.max(delay_ms);
        self
    }

    pub fn with_schedule_interval(mut self, interval: &str) -> Self {
        self.config.schedule_interval = Some(interval.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(image: &str) -> Self {
        Self {
            task: TaskConfig {
                name: None,
                namespace: "default".to_string(),
                image: image.to_string(),
                cmds: vec![],
                arguments: vec![],
                secrets: vec![],
                labels: BTreeMap::new(),
                startup_timeout_seconds: 120,
                get_logs: true,
                image_pull_policy: PullPolicy::default(),
                retries: None,
                after: vec![],
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn cmds(mut self, cmds: &[&str]) -> Self {
        self.task.cmds = cmds.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn arguments(mut self, args: &[&str]) -> Self {
        self.task.arguments = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.task.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.task.retries = Some(retries);
        self
    }

    pub fn env_secret(mut self, var: &str, secret: &str, key: &str) -> Self {
        self.task.secrets.push(SecretConfig {
            deploy_type: DeployType::Env,
            deploy_target: var.to_string(),
            secret: secret.to_string(),
            key: Some(key.to_string()),
        });
        self
    }

    pub fn volume_secret(mut self, mount_path: &str, secret: &str, key: Option<&str>) -> Self {
        self.task.secrets.push(SecretConfig {
            deploy_type: DeployType::Volume,
            deploy_target: mount_path.to_string(),
            secret: secret.to_string(),
            key: key.map(str::to_string),
        });
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Builder for a `DependencyGraph` of placeholder nodes.
pub struct GraphBuilder {
    graph: DependencyGraph,
}

impl GraphBuilder {
    pub fn new(dag_id: &str) -> Self {
        Self {
            graph: DependencyGraph::new(dag_id),
        }
    }

    /// Add a `busybox` node with default settings.
    pub fn task(self, id: &str) -> Self {
        self.node(TaskNode::builder(id, "busybox").build().expect("valid node"))
    }

    /// Add a `busybox` node with `retries` retries and a fixed backoff.
    pub fn retrying_task(self, id: &str, retries: u32, backoff: Duration) -> Self {
        self.node(
            TaskNode::builder(id, "busybox")
                .retry(RetryPolicy::retries(retries).with_backoff(backoff, backoff))
                .build()
                .expect("valid node"),
        )
    }

    pub fn node(mut self, node: TaskNode) -> Self {
        self.graph.add_node(node).expect("unique node id");
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.graph.add_edge(from, to).expect("valid edge");
        self
    }

    pub fn build(self) -> DependencyGraph {
        self.graph
    }
}

/// The three-node sample DAG: `pi` fans out to `passing-task` and
/// `failing-task`.
pub fn composer_sample_graph() -> DependencyGraph {
    let pi = TaskNode::builder("pi", "perl")
        .cmds(["perl"])
        .arguments(["-Mbignum=bpi", "-wle", "print bpi(2000)"])
        .label("app", "airflow-example")
        .build()
        .expect("valid node");
    let passing = TaskNode::builder("passing-task", "python:3.6")
        .pod_name("passing-test")
        .cmds(["python", "-c"])
        .arguments(["print('hello world')"])
        .label("foo", "bar")
        .build()
        .expect("valid node");
    let failing = TaskNode::builder("failing-task", "ubuntu")
        .pod_name("fail")
        .cmds(["python", "-c"])
        .arguments(["print('hello world')"])
        .label("foo", "bar")
        .build()
        .expect("valid node");

    GraphBuilder::new("composer_sample_kubernetes_pod")
        .node(pi)
        .node(passing)
        .node(failing)
        .edge("pi", "passing-task")
        .edge("pi", "failing-task")
        .build()
}
