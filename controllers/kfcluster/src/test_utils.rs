//! Test utilities for unit testing the reconciler
//!
//! `MockStore` is an in-memory `ObjectStore` with resource versions, uids and
//! create-conflict semantics. `RecordingInstaller` records hook calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crds::{GceProvider, KfCluster, KfClusterSpec, KfClusterStatus, Platform, ProviderSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use crate::kubeflow::{InstallError, KubeflowInstaller};
use crate::reconciler::Reconciler;
use crate::store::{ObjectKey, ObjectStore, StoreError};
use gce_client::{ComputeClientTrait, DriverConfig, InstanceDriver, MockComputeClient, PollConfig};

/// Helper to create a test KfCluster
pub fn create_test_kf_cluster(name: &str, namespace: &str, platform: Platform) -> KfCluster {
    KfCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: KfClusterSpec {
            platform,
            kf_version: None,
            config_map_name: Some("cfg".to_string()),
            apps: vec![],
            secrets: vec!["db-cred".to_string()],
            provider: None,
        },
        status: None,
    }
}

/// Helper to create a gcp KfCluster backed by a GCE instance
pub fn create_test_gce_cluster(name: &str, namespace: &str) -> KfCluster {
    let mut cluster = create_test_kf_cluster(name, namespace, Platform::Gcp);
    cluster.spec.provider = Some(ProviderSpec {
        gce: Some(GceProvider {
            project: Some("test-project".to_string()),
            zone: Some("us-west1-b".to_string()),
            instance_name: Some("kf-test".to_string()),
        }),
        ..Default::default()
    });
    cluster
}

/// Timestamp usable as a deletion timestamp
pub fn test_time() -> Time {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap()
}

pub fn deployment_status(conditions: &[(&str, &str)]) -> DeploymentStatus {
    DeploymentStatus {
        conditions: Some(
            conditions
                .iter()
                .map(|(type_, status)| DeploymentCondition {
                    type_: type_.to_string(),
                    status: status.to_string(),
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    }
}

/// Driver polling immediately with no jitter
pub fn fast_driver(client: Arc<MockComputeClient>) -> InstanceDriver<dyn ComputeClientTrait> {
    let poll = PollConfig {
        initial_interval: Duration::from_millis(10),
        randomization_factor: 0.0,
        ..Default::default()
    };
    let config = DriverConfig {
        create_poll: poll.clone(),
        delete_poll: poll,
    };
    let client: Arc<dyn ComputeClientTrait> = client;
    InstanceDriver::new(client, config)
}

#[derive(Default)]
struct StoreState {
    clusters: HashMap<ObjectKey, KfCluster>,
    deployments: HashMap<ObjectKey, Deployment>,
    claims: HashMap<ObjectKey, PersistentVolumeClaim>,
    next_version: u64,
}

impl StoreState {
    fn bump(&mut self, meta: &mut ObjectMeta) {
        self.next_version += 1;
        meta.resource_version = Some(self.next_version.to_string());
    }

    fn assign_uid(&mut self, meta: &mut ObjectMeta) {
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", self.next_version + 1));
        }
    }
}

fn check_version(kind: &'static str, key: &ObjectKey, stored: &ObjectMeta, expected: Option<&str>) -> Result<(), StoreError> {
    match expected {
        Some(expected) if stored.resource_version.as_deref() != Some(expected) => Err(StoreError::Conflict {
            kind,
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}

fn not_found(kind: &'static str, key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind,
        key: key.to_string(),
    }
}

/// In-memory `ObjectStore`
#[derive(Default)]
pub struct MockStore {
    state: Mutex<StoreState>,
    hide_next_deployment_get: AtomicBool,
    stale_next_cluster_get: AtomicBool,
    deployment_creates: AtomicUsize,
    deployment_updates: AtomicUsize,
    claim_creates: AtomicUsize,
    claim_updates: AtomicUsize,
    status_patches: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a cluster, assigning a uid and resource version
    pub fn insert_cluster(&self, mut cluster: KfCluster) -> ObjectKey {
        let key = ObjectKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any());
        let mut state = self.state.lock().unwrap();
        state.assign_uid(&mut cluster.metadata);
        state.bump(&mut cluster.metadata);
        state.clusters.insert(key.clone(), cluster);
        key
    }

    pub fn cluster(&self, key: &ObjectKey) -> Option<KfCluster> {
        self.state.lock().unwrap().clusters.get(key).cloned()
    }

    pub fn status(&self, key: &ObjectKey) -> Option<KfClusterStatus> {
        self.cluster(key).and_then(|c| c.status)
    }

    /// Writes a concurrent change to the cluster, invalidating earlier resource versions
    pub fn touch_cluster(&self, key: &ObjectKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut cluster) = state.clusters.remove(key) {
            state.bump(&mut cluster.metadata);
            state.clusters.insert(key.clone(), cluster);
        }
    }

    /// Applies a user edit to the stored cluster
    pub fn edit_cluster(&self, key: &ObjectKey, edit: impl FnOnce(&mut KfCluster)) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut cluster) = state.clusters.remove(key) {
            edit(&mut cluster);
            state.bump(&mut cluster.metadata);
            state.clusters.insert(key.clone(), cluster);
        }
    }

    pub fn mark_deleting(&self, key: &ObjectKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut cluster) = state.clusters.remove(key) {
            cluster.metadata.deletion_timestamp = Some(test_time());
            state.bump(&mut cluster.metadata);
            state.clusters.insert(key.clone(), cluster);
        }
    }

    pub fn deployment(&self, key: &ObjectKey) -> Option<Deployment> {
        self.state.lock().unwrap().deployments.get(key).cloned()
    }

    pub fn claim(&self, key: &ObjectKey) -> Option<PersistentVolumeClaim> {
        self.state.lock().unwrap().claims.get(key).cloned()
    }

    /// Stores a deployment as if another actor had created it
    pub fn insert_deployment(&self, key: &ObjectKey, mut deployment: Deployment) {
        let mut state = self.state.lock().unwrap();
        state.bump(&mut deployment.metadata);
        state.deployments.insert(key.clone(), deployment);
    }

    /// Simulates the deployment controller reporting progress
    pub fn set_deployment_status(&self, key: &ObjectKey, status: DeploymentStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(deployment) = state.deployments.get_mut(key) {
            deployment.status = Some(status);
        }
    }

    /// The next deployment lookup reports NotFound even if it exists
    pub fn hide_next_deployment_get(&self) {
        self.hide_next_deployment_get.store(true, Ordering::SeqCst);
    }

    /// The next cluster lookup returns a version that a concurrent writer then replaces
    pub fn stale_next_cluster_get(&self) {
        self.stale_next_cluster_get.store(true, Ordering::SeqCst);
    }

    pub fn deployment_creates(&self) -> usize {
        self.deployment_creates.load(Ordering::SeqCst)
    }

    pub fn deployment_updates(&self) -> usize {
        self.deployment_updates.load(Ordering::SeqCst)
    }

    pub fn claim_creates(&self) -> usize {
        self.claim_creates.load(Ordering::SeqCst)
    }

    pub fn claim_updates(&self) -> usize {
        self.claim_updates.load(Ordering::SeqCst)
    }

    pub fn status_patches(&self) -> usize {
        self.status_patches.load(Ordering::SeqCst)
    }

    /// Total writes to child objects
    pub fn child_writes(&self) -> usize {
        self.deployment_creates() + self.deployment_updates() + self.claim_creates() + self.claim_updates()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockStore {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<KfCluster, StoreError> {
        let cluster = self.cluster(key).ok_or_else(|| not_found("KfCluster", key))?;
        if self.stale_next_cluster_get.swap(false, Ordering::SeqCst) {
            self.touch_cluster(key);
        }
        Ok(cluster)
    }

    async fn patch_cluster_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        status: &KfClusterStatus,
    ) -> Result<KfCluster, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut cluster = state.clusters.get(key).cloned().ok_or_else(|| not_found("KfCluster", key))?;
        check_version("KfCluster", key, &cluster.metadata, resource_version)?;
        cluster.status = Some(status.clone());
        state.bump(&mut cluster.metadata);
        state.clusters.insert(key.clone(), cluster.clone());
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(cluster)
    }

    async fn set_cluster_finalizers(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<KfCluster, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut cluster = state.clusters.get(key).cloned().ok_or_else(|| not_found("KfCluster", key))?;
        check_version("KfCluster", key, &cluster.metadata, resource_version)?;
        cluster.metadata.finalizers = Some(finalizers.to_vec());
        state.bump(&mut cluster.metadata);
        if cluster.is_deleting() && finalizers.is_empty() {
            state.clusters.remove(key);
        } else {
            state.clusters.insert(key.clone(), cluster.clone());
        }
        Ok(cluster)
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, StoreError> {
        if self.hide_next_deployment_get.swap(false, Ordering::SeqCst) {
            return Err(not_found("Deployment", key));
        }
        self.deployment(key).ok_or_else(|| not_found("Deployment", key))
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = ObjectKey::new(namespace, deployment.name_any());
        let mut state = self.state.lock().unwrap();
        if state.deployments.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Deployment",
                key: key.to_string(),
            });
        }
        let mut created = deployment.clone();
        state.assign_uid(&mut created.metadata);
        state.bump(&mut created.metadata);
        state.deployments.insert(key, created.clone());
        self.deployment_creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = ObjectKey::new(namespace, deployment.name_any());
        let mut state = self.state.lock().unwrap();
        let stored = state.deployments.get(&key).ok_or_else(|| not_found("Deployment", &key))?;
        check_version("Deployment", &key, &stored.metadata, deployment.metadata.resource_version.as_deref())?;
        let mut updated = deployment.clone();
        state.bump(&mut updated.metadata);
        state.deployments.insert(key, updated.clone());
        self.deployment_updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn get_claim(&self, key: &ObjectKey) -> Result<PersistentVolumeClaim, StoreError> {
        self.claim(key).ok_or_else(|| not_found("PersistentVolumeClaim", key))
    }

    async fn create_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError> {
        let key = ObjectKey::new(namespace, claim.name_any());
        let mut state = self.state.lock().unwrap();
        if state.claims.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "PersistentVolumeClaim",
                key: key.to_string(),
            });
        }
        let mut created = claim.clone();
        state.assign_uid(&mut created.metadata);
        state.bump(&mut created.metadata);
        state.claims.insert(key, created.clone());
        self.claim_creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError> {
        let key = ObjectKey::new(namespace, claim.name_any());
        let mut state = self.state.lock().unwrap();
        let stored = state.claims.get(&key).ok_or_else(|| not_found("PersistentVolumeClaim", &key))?;
        check_version("PersistentVolumeClaim", &key, &stored.metadata, claim.metadata.resource_version.as_deref())?;
        let mut updated = claim.clone();
        state.bump(&mut updated.metadata);
        state.claims.insert(key, updated.clone());
        self.claim_updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

/// Installer that records every hook call
#[derive(Default)]
pub struct RecordingInstaller {
    calls: Mutex<Vec<&'static str>>,
    fail: AtomicBool,
}

impl RecordingInstaller {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, cluster: &KfCluster) -> Result<(), InstallError> {
        self.calls.lock().unwrap().push(operation);
        if self.fail.load(Ordering::SeqCst) {
            return Err(InstallError::Failed {
                operation,
                cluster: cluster.name_any(),
                message: "kfctl exited with status 1".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KubeflowInstaller for Arc<RecordingInstaller> {
    async fn install(&self, cluster: &KfCluster) -> Result<(), InstallError> {
        self.record("install", cluster)
    }

    async fn uninstall(&self, cluster: &KfCluster) -> Result<(), InstallError> {
        self.record("uninstall", cluster)
    }

    async fn upgrade(&self, cluster: &KfCluster) -> Result<(), InstallError> {
        self.record("upgrade", cluster)
    }
}

/// Everything a reconciler test needs
pub struct Harness {
    pub store: Arc<MockStore>,
    pub compute: Arc<MockComputeClient>,
    pub installer: Arc<RecordingInstaller>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_installer(RecordingInstaller::default())
    }

    pub fn with_installer(installer: RecordingInstaller) -> Self {
        let store = Arc::new(MockStore::new());
        let compute = Arc::new(MockComputeClient::default());
        let installer = Arc::new(installer);
        let reconciler = Reconciler::new(store.clone(), Box::new(installer.clone()), CancellationToken::new())
            .with_driver(fast_driver(compute.clone()));
        Self {
            store,
            compute,
            installer,
            reconciler,
        }
    }

    /// Harness whose reconciler has no Compute Engine access
    pub fn without_driver() -> Self {
        let store = Arc::new(MockStore::new());
        let compute = Arc::new(MockComputeClient::default());
        let installer = Arc::new(RecordingInstaller::default());
        let reconciler = Reconciler::new(store.clone(), Box::new(installer.clone()), CancellationToken::new());
        Self {
            store,
            compute,
            installer,
            reconciler,
        }
    }
}
