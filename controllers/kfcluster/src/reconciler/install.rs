//! Kubeflow install hook dispatch.

use crds::KfCluster;
use tracing::{info, warn};

use super::Reconciler;
use crate::error::ControllerError;
use crate::kubeflow::InstallAction;
use crate::store::ObjectKey;

impl Reconciler {
    /// Calls exactly one of `install` or `upgrade`.
    ///
    /// A hook failure is logged and otherwise ignored. On success the desired
    /// version is recorded as installed.
    pub(crate) async fn run_install_hook(&self, key: &ObjectKey, cluster: KfCluster) -> Result<(), ControllerError> {
        let installed = cluster.status.as_ref().and_then(|s| s.installed_version.as_deref());
        let desired = cluster.spec.kf_version.as_deref();
        let action = InstallAction::for_versions(installed, desired);

        let result = match action {
            InstallAction::Install => self.installer.install(&cluster).await,
            InstallAction::Upgrade => self.installer.upgrade(&cluster).await,
        };
        if let Err(e) = result {
            warn!(error = %e, action = action.as_str(), "Kubeflow install hook failed, infrastructure is unaffected");
            return Ok(());
        }

        let Some(desired) = desired else {
            return Ok(());
        };
        if installed == Some(desired) {
            return Ok(());
        }

        let mut status = cluster.status.clone().unwrap_or_default();
        status.installed_version = Some(desired.to_string());
        self.store
            .patch_cluster_status(key, cluster.metadata.resource_version.as_deref(), &status)
            .await?;
        info!(version = desired, action = action.as_str(), "Kubeflow version recorded");
        Ok(())
    }
}
