// src/exec/adapter.rs

//! Cluster launch adapter abstraction.
//!
//! The runtime talks to a `ClusterLaunchAdapter` instead of a concrete
//! cluster client. This makes it easy to swap in a fake adapter in tests.
//!
//! - [`LocalProcessAdapter`](crate::exec::LocalProcessAdapter) runs pod
//!   commands as local processes.
//! - Tests provide their own adapter that scripts pod outcomes and records
//!   which pods were submitted and torn down.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::errors::LaunchError;
use crate::exec::PodSpec;

/// Opaque identifier an adapter returns for a submitted pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodHandle(String);

impl PodHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pod phase as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl PodStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodStatus::Succeeded | PodStatus::Failed(_))
    }
}

/// Boxed future returned by adapter calls.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LaunchError>> + Send + 'a>>;

/// Trait abstracting how pods are created, observed and torn down.
///
/// Implementations must be shareable across worker tasks; every call may
/// be issued concurrently for distinct handles.
pub trait ClusterLaunchAdapter: Send + Sync {
    /// Create a pod for `spec` and return its handle.
    fn submit(&self, spec: PodSpec) -> AdapterFuture<'_, PodHandle>;

    /// Current phase of the pod behind `handle`.
    fn status<'a>(&'a self, handle: &'a PodHandle) -> AdapterFuture<'a, PodStatus>;

    /// Request teardown. Best-effort: callers log failures and move on.
    fn terminate<'a>(&'a self, handle: &'a PodHandle) -> AdapterFuture<'a, ()>;
}
