// src/lib.rs

//! poddag: run a DAG of pod-launching tasks in dependency order.
//!
//! Build a [`DependencyGraph`](dag::DependencyGraph) (directly or from a TOML
//! file via [`config`]), pick a [`ClusterLaunchAdapter`](exec::ClusterLaunchAdapter)
//! and hand both to an [`engine::Runtime`].

pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod secrets;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::load_and_validate;
use crate::dag::{DependencyGraph, RunState};
use crate::engine::{Runtime, RuntimeOptions};
use crate::errors::Result;
use crate::exec::ClusterLaunchAdapter;

/// Execute one run of `graph` against `adapter` and return its final state.
pub async fn run_graph<A>(
    graph: DependencyGraph,
    adapter: Arc<A>,
    options: RuntimeOptions,
) -> RunState
where
    A: ClusterLaunchAdapter + ?Sized + 'static,
{
    let mut runtime = Runtime::new(Arc::new(graph), adapter, options);
    runtime.run().await
}

/// Load and validate a TOML config, then execute one run of the graph it
/// describes.
///
/// Subscriber setup is left to the caller; pass
/// [`ConfigFile::log_level`](config::ConfigFile::log_level) to
/// [`logging::init_logging`] to honour `[scheduler].log_level`.
///
/// Only configuration problems are returned as errors; node failures are
/// recorded in the returned `RunState`.
pub async fn run_config<A>(path: impl AsRef<Path>, adapter: Arc<A>) -> Result<RunState>
where
    A: ClusterLaunchAdapter + ?Sized + 'static,
{
    let cfg = load_and_validate(&path)?;
    let graph = cfg.build_graph()?;

    info!(
        path = %path.as_ref().display(),
        dag_id = %graph.dag_id(),
        tasks = graph.len(),
        "loaded DAG from config"
    );

    Ok(run_graph(graph, adapter, cfg.runtime_options()).await)
}
