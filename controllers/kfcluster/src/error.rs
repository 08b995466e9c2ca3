//! Controller-specific error types.
//!
//! Errors returned from a reconcile pass abort the pass and are handed to the
//! watcher's error policy, which owns requeue scheduling.

use gce_client::ProvisionError;
use kube::Error as KubeError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur in the KfCluster Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error outside the object store
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store read or write failed
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// GCE instance could not be created or deleted
    #[error("Instance provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error is a lost race with another writer.
    ///
    /// These are requeued quickly; everything else goes through the per-key
    /// Fibonacci backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::Store(StoreError::Conflict { .. } | StoreError::AlreadyExists { .. })
        )
    }
}
