//! Object store seam.
//!
//! The reconciler reads and writes KfClusters and their children only through
//! `ObjectStore`, so "not found", "already exists" and "conflict" arrive as
//! distinct error kinds regardless of the backing client. `KubeStore` is the
//! API-server implementation; tests use the in-memory store in `test_utils`.

use std::fmt;

use crds::{KfCluster, KfClusterStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use thiserror::Error;

/// Namespaced object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// Optimistic concurrency check failed
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: &'static str, key: String },

    #[error("Kubernetes error on {kind} {key}: {source}")]
    Kube {
        kind: &'static str,
        key: String,
        #[source]
        source: kube::Error,
    },
}

impl StoreError {
    /// Classifies an API error
    pub fn from_kube(source: kube::Error, kind: &'static str, key: &ObjectKey) -> Self {
        let key = key.to_string();
        let (code, already_exists) = match &source {
            kube::Error::Api(ae) => (Some(ae.code), ae.reason == "AlreadyExists"),
            _ => (None, false),
        };
        match code {
            Some(404) => StoreError::NotFound { kind, key },
            Some(409) if already_exists => StoreError::AlreadyExists { kind, key },
            Some(409) => StoreError::Conflict { kind, key },
            _ => StoreError::Kube { kind, key, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Turns `NotFound` into `None`
pub fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads and writes for KfClusters and the children the controller owns.
///
/// `create_*` must fail with `AlreadyExists` rather than succeed twice, and
/// writes carrying a resource version must fail with `Conflict` when it is stale.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<KfCluster, StoreError>;

    /// Merge-patches the status subresource. With `resource_version` set the
    /// write only succeeds against that exact version.
    async fn patch_cluster_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        status: &KfClusterStatus,
    ) -> Result<KfCluster, StoreError>;

    /// Replaces the finalizer list, guarded by `resource_version`
    async fn set_cluster_finalizers(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<KfCluster, StoreError>;

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, StoreError>;
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError>;
    async fn update_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError>;

    async fn get_claim(&self, key: &ObjectKey) -> Result<PersistentVolumeClaim, StoreError>;
    async fn create_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError>;
    async fn update_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError>;
}

/// `ObjectStore` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn clusters(&self, namespace: &str) -> Api<KfCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn key_of<K: ResourceExt>(namespace: &str, object: &K) -> ObjectKey {
    ObjectKey::new(namespace, object.name_any())
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<KfCluster, StoreError> {
        self.clusters(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(e, "KfCluster", key))
    }

    async fn patch_cluster_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        status: &KfClusterStatus,
    ) -> Result<KfCluster, StoreError> {
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        self.clusters(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, "KfCluster", key))
    }

    async fn set_cluster_finalizers(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<KfCluster, StoreError> {
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": resource_version,
                "finalizers": finalizers,
            },
        });
        self.clusters(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, "KfCluster", key))
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, StoreError> {
        self.deployments(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Deployment", key))
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError> {
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| StoreError::from_kube(e, "Deployment", &key_of(namespace, deployment)))
    }

    async fn update_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = key_of(namespace, deployment);
        self.deployments(namespace)
            .replace(&key.name, &PostParams::default(), deployment)
            .await
            .map_err(|e| StoreError::from_kube(e, "Deployment", &key))
    }

    async fn get_claim(&self, key: &ObjectKey) -> Result<PersistentVolumeClaim, StoreError> {
        self.claims(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(e, "PersistentVolumeClaim", key))
    }

    async fn create_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError> {
        self.claims(namespace)
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| StoreError::from_kube(e, "PersistentVolumeClaim", &key_of(namespace, claim)))
    }

    async fn update_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, StoreError> {
        let key = key_of(namespace, claim);
        self.claims(namespace)
            .replace(&key.name, &PostParams::default(), claim)
            .await
            .map_err(|e| StoreError::from_kube(e, "PersistentVolumeClaim", &key))
    }
}
