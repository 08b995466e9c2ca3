//! Provider sub-specs
//!
//! Optional per-provider settings attached to a KfCluster spec.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default name of the VM provisioned for a gcp cluster
pub const DEFAULT_INSTANCE_NAME: &str = "kf-github-action";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Google Compute Engine VM backing the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gce: Option<GceProvider>,

    /// Existing Kubernetes cluster on which Kubeflow is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_k8s: Option<ExistingK8s>,

    /// Kubernetes-in-Docker cluster on which Kubeflow is bootstrapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
}

/// Google Compute Engine settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GceProvider {
    /// GCP project (falls back to the `PROJECT` environment variable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Compute zone (falls back to the `ZONE` environment variable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// VM instance name (defaults to `kf-github-action`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

impl GceProvider {
    /// Instance name, falling back to the default
    pub fn instance_name_or_default(&self) -> &str {
        self.instance_name.as_deref().unwrap_or(DEFAULT_INSTANCE_NAME)
    }

    /// Whether both settings address the same VM
    pub fn same_instance(&self, other: &GceProvider) -> bool {
        self.project == other.project
            && self.zone == other.zone
            && self.instance_name_or_default() == other.instance_name_or_default()
    }
}

/// A VM the operator provisioned, as recorded in status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedInstance {
    /// GCP project the VM lives in
    pub project: String,
    /// Compute zone of the VM
    pub zone: String,
    /// VM instance name
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingK8s {
    /// Path to the kubeconfig of the existing cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Kind {
    /// Path to the kubeconfig of the kind cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}
