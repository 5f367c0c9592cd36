// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, SecretConfig};
use crate::engine::parse_duration;
use crate::errors::{PoddagError, Result};
use crate::secrets::{self, SecretRef};
use crate::types::DeployType;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PoddagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_tasks(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PoddagError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.dag_id.trim().is_empty() {
        return Err(PoddagError::ConfigError("dag_id must not be empty".to_string()));
    }

    if let Some(interval) = &cfg.schedule_interval {
        let parsed = parse_duration(interval).map_err(|e| {
            PoddagError::ConfigError(format!("invalid schedule_interval '{interval}': {e}"))
        })?;
        if parsed.is_zero() {
            return Err(PoddagError::ConfigError(
                "schedule_interval must be greater than zero".to_string(),
            ));
        }
    }

    let sched = &cfg.scheduler;
    if sched.concurrency_limit == 0 {
        return Err(PoddagError::ConfigError(
            "[scheduler].concurrency_limit must be >= 1 (got 0)".to_string(),
        ));
    }
    if sched.poll_interval_ms == 0 || sched.adapter_timeout_ms == 0 {
        return Err(PoddagError::ConfigError(
            "[scheduler].poll_interval_ms and adapter_timeout_ms must be >= 1".to_string(),
        ));
    }

    let defaults = &cfg.default;
    if defaults.max_retry_delay_ms < defaults.retry_delay_ms {
        return Err(PoddagError::ConfigError(format!(
            "[default].max_retry_delay_ms ({}) is smaller than retry_delay_ms ({})",
            defaults.max_retry_delay_ms, defaults.retry_delay_ms
        )));
    }

    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (id, task) in cfg.task.iter() {
        if task.image.trim().is_empty() {
            return Err(PoddagError::ConfigError(format!(
                "task '{id}' has an empty image"
            )));
        }
        if task.startup_timeout_seconds == 0 {
            return Err(PoddagError::ConfigError(format!(
                "task '{id}' has startup_timeout_seconds = 0"
            )));
        }

        for secret in task.secrets.iter() {
            let secret_ref = secret_ref_from_config(secret).map_err(|e| {
                PoddagError::ConfigError(format!("task '{id}': {e}"))
            })?;
            secrets::resolve(&secret_ref)
                .map_err(|e| PoddagError::ConfigError(format!("task '{id}': {e}")))?;
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (id, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == id {
                return Err(PoddagError::ConfigError(format!(
                    "task '{id}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(PoddagError::ConfigError(format!(
                    "task '{id}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task. For
    //   [task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in cfg.task.keys() {
        graph.add_node(id.as_str());
    }

    for (id, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(PoddagError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}

/// Map a `[[task.<id>.secrets]]` entry onto a [`SecretRef`].
pub(crate) fn secret_ref_from_config(secret: &SecretConfig) -> Result<SecretRef> {
    match secret.deploy_type {
        DeployType::Env => {
            let key = secret.key.clone().ok_or_else(|| {
                PoddagError::UnresolvedSecret(format!(
                    "env secret '{}' for {} needs a key",
                    secret.secret, secret.deploy_target
                ))
            })?;
            Ok(SecretRef::env(&secret.deploy_target, &secret.secret, key))
        }
        DeployType::Volume => Ok(SecretRef::volume(
            &secret.deploy_target,
            &secret.secret,
            secret.key.clone(),
        )),
    }
}
