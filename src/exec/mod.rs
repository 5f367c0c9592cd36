// src/exec/mod.rs

//! Pod execution layer.
//!
//! This module turns scheduled attempts into pods and reports their
//! outcomes back to the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`pod_spec`] builds the adapter-facing pod description from a node.
//! - [`adapter`] defines the `ClusterLaunchAdapter` trait the runtime talks to.
//! - [`worker`] drives one attempt: submit, poll, tear down on cancel.
//! - [`local`] provides `LocalProcessAdapter`, which runs pod commands as
//!   local processes.

pub mod adapter;
pub mod local;
pub mod pod_spec;
pub mod worker;

pub use adapter::{AdapterFuture, ClusterLaunchAdapter, PodHandle, PodStatus};
pub use local::LocalProcessAdapter;
pub use pod_spec::PodSpec;
pub use worker::{WorkerOptions, run_attempt, terminate_best_effort};
