//! Finalizer handling.
//!
//! Owner references let the API server collect the workload and claim, but
//! not the GCE instance. A cluster with a GCE provider or a recorded instance
//! keeps its finalizer until the instance is gone.

use crds::{KfCluster, KF_CLUSTER_FINALIZER};
use tracing::{info, warn};

use super::gcp::recorded_target;
use super::Reconciler;
use crate::error::ControllerError;
use crate::store::ObjectKey;

impl Reconciler {
    pub(crate) async fn finalize(&self, key: &ObjectKey, cluster: &KfCluster) -> Result<(), ControllerError> {
        // The recorded VM is the one actually provisioned; the spec may have moved on since
        let mut targets: Vec<_> = cluster.provisioned_instance().map(recorded_target).into_iter().collect();
        if let Some(gce) = cluster.gce_provider() {
            let declared = self.instance_target(gce)?;
            if !targets.contains(&declared) {
                targets.push(declared);
            }
        }
        for target in &targets {
            self.driver()?.ensure_deleted(target, &self.shutdown).await?;
        }

        if let Err(e) = self.installer.uninstall(cluster).await {
            warn!(error = %e, "Kubeflow uninstall hook failed, removing finalizer anyway");
        }

        let remaining: Vec<String> = cluster
            .metadata
            .finalizers
            .iter()
            .flatten()
            .filter(|name| name.as_str() != KF_CLUSTER_FINALIZER)
            .cloned()
            .collect();
        self.store
            .set_cluster_finalizers(key, cluster.metadata.resource_version.as_deref(), &remaining)
            .await?;
        info!("Released external resources, finalizer removed");
        Ok(())
    }
}
