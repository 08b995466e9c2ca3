//! Kubeflow install hook.
//!
//! Called once per reconcile pass after the cluster's infrastructure has been
//! reconciled. Failures are reported to the caller, which logs them and
//! carries on; they never fail the pass.

use crds::KfCluster;
use kube::ResourceExt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Kubeflow {operation} failed for {cluster}: {message}")]
    Failed {
        operation: &'static str,
        cluster: String,
        message: String,
    },
}

/// Installs, upgrades and removes Kubeflow on a provisioned cluster
#[async_trait::async_trait]
pub trait KubeflowInstaller: Send + Sync {
    async fn install(&self, cluster: &KfCluster) -> Result<(), InstallError>;
    async fn uninstall(&self, cluster: &KfCluster) -> Result<(), InstallError>;
    async fn upgrade(&self, cluster: &KfCluster) -> Result<(), InstallError>;
}

/// Installer that does nothing; the bootstrap workload performs the install
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstaller;

#[async_trait::async_trait]
impl KubeflowInstaller for NoopInstaller {
    async fn install(&self, cluster: &KfCluster) -> Result<(), InstallError> {
        debug!(kfcluster = %cluster.name_any(), version = ?cluster.spec.kf_version, "Install hook (no-op)");
        Ok(())
    }

    async fn uninstall(&self, cluster: &KfCluster) -> Result<(), InstallError> {
        debug!(kfcluster = %cluster.name_any(), "Uninstall hook (no-op)");
        Ok(())
    }

    async fn upgrade(&self, cluster: &KfCluster) -> Result<(), InstallError> {
        debug!(kfcluster = %cluster.name_any(), version = ?cluster.spec.kf_version, "Upgrade hook (no-op)");
        Ok(())
    }
}

/// Which hook a pass calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    Install,
    Upgrade,
}

impl InstallAction {
    /// `Upgrade` when a different version than the desired one was installed, otherwise `Install`
    pub fn for_versions(installed: Option<&str>, desired: Option<&str>) -> Self {
        match (installed, desired) {
            (Some(installed), Some(desired)) if installed != desired => InstallAction::Upgrade,
            _ => InstallAction::Install,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallAction::Install => "install",
            InstallAction::Upgrade => "upgrade",
        }
    }
}
