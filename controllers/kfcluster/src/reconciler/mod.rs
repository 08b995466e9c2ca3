//! Reconciliation logic for KfCluster resources.
//!
//! One call to [`Reconciler::reconcile`] is one pass: load the cluster,
//! converge its infrastructure for its platform, fold the workload's progress
//! into the condition history, then run the install hook.
//!
//! Passes for the same key must not overlap. The kube-runtime controller
//! driving this type serializes them per object; nothing here locks.
//!
//! - `gcp`: instance, storage claim and bootstrap workload
//! - `deletion`: finalizer handling for clusters with a GCE instance
//! - `install`: Kubeflow install hook dispatch

mod deletion;
mod gcp;
mod install;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crds::{GceProvider, Platform};
use gce_client::{ComputeClientTrait, InstanceDriver, InstanceTarget};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::kubeflow::KubeflowInstaller;
use crate::lifecycle::{derive_phase, ChildSnapshot, ClusterPhase};
use crate::store::{optional, ObjectKey, ObjectStore};

/// Requeue delay after losing a write race
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles KfCluster resources.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ObjectStore>,
    /// Absent when no Compute Engine credentials are configured
    pub(crate) driver: Option<InstanceDriver<dyn ComputeClientTrait>>,
    pub(crate) installer: Box<dyn KubeflowInstaller>,
    pub(crate) default_project: Option<String>,
    pub(crate) default_zone: Option<String>,
    /// Aborts in-flight instance waits on shutdown
    pub(crate) shutdown: CancellationToken,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a reconciler without Compute Engine access
    pub fn new(store: Arc<dyn ObjectStore>, installer: Box<dyn KubeflowInstaller>, shutdown: CancellationToken) -> Self {
        Self {
            store,
            driver: None,
            installer,
            default_project: None,
            default_zone: None,
            shutdown,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_driver(mut self, driver: InstanceDriver<dyn ComputeClientTrait>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Project and zone used when a cluster's GCE provider omits them
    pub fn with_gce_defaults(mut self, project: Option<String>, zone: Option<String>) -> Self {
        self.default_project = project;
        self.default_zone = zone;
        self
    }

    /// Runs one reconcile pass.
    ///
    /// Returns `None` when the cluster no longer exists, otherwise the phase
    /// observed at the end of the pass.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Option<ClusterPhase>, ControllerError> {
        let Some(cluster) = optional(self.store.get_cluster(key).await)? else {
            debug!("KfCluster no longer exists, nothing to do");
            self.forget(&key.to_string());
            return Ok(None);
        };

        if cluster.is_deleting() {
            if cluster.has_finalizer() {
                self.finalize(key, &cluster).await?;
            }
            return Ok(Some(ClusterPhase::Deleting));
        }

        let (cluster, snapshot) = match cluster.spec.platform {
            Platform::Gcp => self.reconcile_gcp(key, cluster).await?,
            Platform::Generic => {
                info!("Infrastructure is managed externally, using existing kubeconfig");
                let snapshot = ChildSnapshot {
                    externally_managed: true,
                    ..Default::default()
                };
                (cluster, snapshot)
            }
        };

        self.run_install_hook(key, cluster).await?;

        let phase = derive_phase(&snapshot);
        debug!(%phase, "Reconcile pass complete");
        Ok(Some(phase))
    }

    /// Target of a cluster's VM, with project and zone falling back to the configured defaults
    pub(crate) fn instance_target(&self, gce: &GceProvider) -> Result<InstanceTarget, ControllerError> {
        let project = gce
            .project
            .clone()
            .or_else(|| self.default_project.clone())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "no GCE project: set spec.provider.gce.project or PROJECT".to_string(),
                )
            })?;
        let zone = gce
            .zone
            .clone()
            .or_else(|| self.default_zone.clone())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("no GCE zone: set spec.provider.gce.zone or ZONE".to_string())
            })?;
        Ok(InstanceTarget::new(project, zone, gce.instance_name_or_default()))
    }

    pub(crate) fn driver(&self) -> Result<&InstanceDriver<dyn ComputeClientTrait>, ControllerError> {
        self.driver.as_ref().ok_or_else(|| {
            ControllerError::InvalidConfig(
                "cluster declares a GCE provider but GCE_ACCESS_TOKEN is not set".to_string(),
            )
        })
    }

    /// Requeue delay after a failed pass.
    ///
    /// Lost write races are retried quickly; anything else advances the
    /// resource's Fibonacci backoff. Returns the delay and the error count.
    pub fn requeue_after_error(&self, resource_key: &str, error: &ControllerError) -> (Duration, u32) {
        if error.is_retryable() {
            return (CONFLICT_REQUEUE, 0);
        }
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Drops the backoff state of a resource that no longer exists
    fn forget(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_backoffs(&self) -> usize {
        self.backoff_states.lock().map(|states| states.len()).unwrap_or_default()
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
