// src/errors.rs

//! Crate-wide error types.
//!
//! Graph-construction errors (`DuplicateNode`, `UnknownNode`, `Cycle`) are
//! returned straight to the caller. Per-node errors (`Launch`,
//! `UnresolvedSecret`) are recorded in the run state by the scheduler and
//! never escape the control loop.

use std::time::Duration;

use thiserror::Error;

use crate::dag::NodeStatus;

#[derive(Error, Debug)]
pub enum PoddagError {
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Adding edge {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Invalid node definition: {0}")]
    InvalidNode(String),

    #[error("Unresolved secret reference: {0}")]
    UnresolvedSecret(String),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Illegal transition for node '{task}': {from:?} -> {to:?}")]
    InvalidTransition {
        task: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by a [`ClusterLaunchAdapter`](crate::exec::ClusterLaunchAdapter).
///
/// All variants are per-attempt failures: the scheduler feeds them into the
/// node's retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("pod rejected: {0}")]
    Rejected(String),

    #[error("adapter call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown pod handle: {0}")]
    NotFound(String),

    #[error("adapter backend error: {0}")]
    Backend(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PoddagError>;
