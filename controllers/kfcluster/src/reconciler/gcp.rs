//! `gcp` platform: instance, storage claim and bootstrap workload.

use crds::{KfCluster, KfClusterCondition, ProvisionedInstance, KF_CLUSTER_FINALIZER};
use gce_client::InstanceTarget;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::Resource;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::builder::{build_workload_and_storage, kubeconfig_path_for, stamp_owner};
use crate::drift::{reconcile_claim, reconcile_workload};
use crate::error::ControllerError;
use crate::lifecycle::{ChildSnapshot, WorkloadObservation};
use crate::store::{optional, ObjectKey, StoreError};

/// Result of converging the workload
#[derive(Debug)]
pub(crate) enum WorkloadOutcome {
    /// This pass created it
    Created(Deployment),
    /// It already existed; updated if managed fields had drifted
    Existing(Deployment),
    /// A concurrent creator won; the next pass compares it
    Contended,
}

impl WorkloadOutcome {
    fn deployment(&self) -> Option<&Deployment> {
        match self {
            WorkloadOutcome::Created(d) | WorkloadOutcome::Existing(d) => Some(d),
            WorkloadOutcome::Contended => None,
        }
    }
}

impl Reconciler {
    pub(crate) async fn reconcile_gcp(
        &self,
        key: &ObjectKey,
        mut cluster: KfCluster,
    ) -> Result<(KfCluster, ChildSnapshot), ControllerError> {
        if cluster.requires_finalizer() && !cluster.has_finalizer() {
            let mut finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
            finalizers.push(KF_CLUSTER_FINALIZER.to_string());
            cluster = self
                .store
                .set_cluster_finalizers(key, cluster.metadata.resource_version.as_deref(), &finalizers)
                .await?;
            debug!("Added finalizer");
        }

        cluster = self.converge_instance(key, cluster).await?;

        let mut manifests = build_workload_and_storage(&cluster.spec, &key.name, &key.namespace);
        let owner = cluster
            .controller_owner_ref(&())
            .ok_or_else(|| ControllerError::InvalidConfig(format!("KfCluster {} has no uid", key)))?;
        stamp_owner(&mut manifests.storage.metadata, owner.clone());
        stamp_owner(&mut manifests.workload.metadata, owner);

        self.ensure_claim(key, &manifests.storage).await?;
        let outcome = self.ensure_workload(key, &manifests.workload).await?;

        let mut status = cluster.status.clone().unwrap_or_default();
        if matches!(outcome, WorkloadOutcome::Created(_)) || status.kubeconfig_path.is_none() {
            status.kubeconfig_path = Some(kubeconfig_path_for(&key.name));
        }
        if let Some(condition) = outcome.deployment().and_then(latest_workload_condition) {
            if status.push_condition(condition) {
                debug!(state = ?status.latest_condition().and_then(|c| c.state.as_deref()), "Recorded new condition");
            }
        }

        if cluster.status.as_ref() != Some(&status) {
            cluster = self
                .store
                .patch_cluster_status(key, cluster.metadata.resource_version.as_deref(), &status)
                .await?;
        }

        let snapshot = ChildSnapshot {
            deleting: false,
            externally_managed: false,
            workload: outcome.deployment().map(WorkloadObservation::of),
            storage_present: true,
        };
        Ok((cluster, snapshot))
    }

    /// Releases a recorded VM the provider no longer names, then ensures the named one exists.
    async fn converge_instance(&self, key: &ObjectKey, mut cluster: KfCluster) -> Result<KfCluster, ControllerError> {
        let desired = cluster
            .gce_provider()
            .map(|gce| self.instance_target(gce))
            .transpose()?;
        let recorded = cluster.provisioned_instance().map(recorded_target);

        if let Some(previous) = recorded.filter(|previous| desired.as_ref() != Some(previous)) {
            info!(instance = %previous, "Provider no longer names this instance, releasing it");
            self.driver()?.ensure_deleted(&previous, &self.shutdown).await?;
            cluster = self.record_instance(key, cluster, None).await?;
        }

        if let Some(target) = desired {
            let instance = self.driver()?.ensure_created(&target, &self.shutdown).await?;
            debug!(instance = %target, status = ?instance.status, "Instance present");
            cluster = self.record_instance(key, cluster, Some(&target)).await?;
        }
        Ok(cluster)
    }

    async fn record_instance(
        &self,
        key: &ObjectKey,
        cluster: KfCluster,
        target: Option<&InstanceTarget>,
    ) -> Result<KfCluster, ControllerError> {
        let instance = target.map(|t| ProvisionedInstance {
            project: t.project.clone(),
            zone: t.zone.clone(),
            name: t.name.clone(),
        });
        if cluster.provisioned_instance() == instance.as_ref() {
            return Ok(cluster);
        }
        let mut status = cluster.status.clone().unwrap_or_default();
        status.instance = instance;
        Ok(self
            .store
            .patch_cluster_status(key, cluster.metadata.resource_version.as_deref(), &status)
            .await?)
    }

    async fn ensure_claim(&self, key: &ObjectKey, desired: &PersistentVolumeClaim) -> Result<(), ControllerError> {
        match optional(self.store.get_claim(key).await)? {
            None => match self.store.create_claim(&key.namespace, desired).await {
                Ok(_) => info!("Created storage claim"),
                Err(StoreError::AlreadyExists { .. }) => {
                    warn!("Storage claim was created concurrently, comparing on next pass");
                }
                Err(e) => return Err(e.into()),
            },
            Some(observed) => {
                if let Some(merged) = reconcile_claim(&observed, desired) {
                    self.store.update_claim(&key.namespace, &merged).await?;
                    info!("Updated storage claim");
                }
            }
        }
        Ok(())
    }

    async fn ensure_workload(&self, key: &ObjectKey, desired: &Deployment) -> Result<WorkloadOutcome, ControllerError> {
        match optional(self.store.get_deployment(key).await)? {
            None => match self.store.create_deployment(&key.namespace, desired).await {
                Ok(created) => {
                    info!("Created bootstrap workload");
                    Ok(WorkloadOutcome::Created(created))
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    warn!("Bootstrap workload was created concurrently, comparing on next pass");
                    Ok(WorkloadOutcome::Contended)
                }
                Err(e) => Err(e.into()),
            },
            Some(observed) => match reconcile_workload(&observed, desired) {
                Some(merged) => {
                    let updated = self.store.update_deployment(&key.namespace, &merged).await?;
                    info!("Updated bootstrap workload");
                    Ok(WorkloadOutcome::Existing(updated))
                }
                None => Ok(WorkloadOutcome::Existing(observed)),
            },
        }
    }
}

pub(crate) fn recorded_target(instance: &ProvisionedInstance) -> InstanceTarget {
    InstanceTarget::new(&instance.project, &instance.zone, &instance.name)
}

/// The workload's most recent condition as a KfCluster condition
fn latest_workload_condition(deployment: &Deployment) -> Option<KfClusterCondition> {
    let condition = deployment.status.as_ref()?.conditions.as_ref()?.last()?;
    Some(KfClusterCondition::new(condition.type_.clone(), condition.status == "True"))
}
