//! Derived lifecycle phase of a KfCluster.
//!
//! The phase is never stored. Each pass recomputes it from what the object
//! store reports about the cluster and its children.

use std::fmt;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;

/// How often a converged cluster is reconciled without a triggering event
pub const READY_RESYNC: Duration = Duration::from_secs(10 * 60);

/// How often a cluster still converging is re-checked
pub const PROVISIONING_RECHECK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    /// No children exist yet
    Unprovisioned,
    /// Children exist but the workload is not available
    Provisioning,
    /// The workload reports `Available`
    Ready,
    /// The cluster has a deletion timestamp
    Deleting,
}

impl ClusterPhase {
    /// Delay before the next unsolicited reconcile, `None` to wait for an event
    pub fn requeue_after(self) -> Option<Duration> {
        match self {
            ClusterPhase::Provisioning => Some(PROVISIONING_RECHECK),
            ClusterPhase::Ready => Some(READY_RESYNC),
            ClusterPhase::Unprovisioned | ClusterPhase::Deleting => None,
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterPhase::Unprovisioned => "Unprovisioned",
            ClusterPhase::Provisioning => "Provisioning",
            ClusterPhase::Ready => "Ready",
            ClusterPhase::Deleting => "Deleting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadObservation {
    pub available: bool,
}

impl WorkloadObservation {
    pub fn of(deployment: &Deployment) -> Self {
        let available = deployment
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Available" && c.status == "True")
            });
        Self { available }
    }
}

/// What one pass observed about a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildSnapshot {
    pub deleting: bool,
    /// Infrastructure is managed outside this controller (`generic`)
    pub externally_managed: bool,
    pub workload: Option<WorkloadObservation>,
    pub storage_present: bool,
}

pub fn derive_phase(snapshot: &ChildSnapshot) -> ClusterPhase {
    if snapshot.deleting {
        return ClusterPhase::Deleting;
    }
    if snapshot.externally_managed {
        return ClusterPhase::Ready;
    }
    match (snapshot.workload, snapshot.storage_present) {
        (Some(workload), true) if workload.available => ClusterPhase::Ready,
        (None, false) => ClusterPhase::Unprovisioned,
        _ => ClusterPhase::Provisioning,
    }
}
