//! KfCluster CRD
//!
//! Declares a Kubeflow cluster target: which platform provides the
//! infrastructure, which secrets and config the bootstrap workload receives,
//! and the observed progress of that bootstrap.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provider::{GceProvider, ProviderSpec, ProvisionedInstance};

/// API group of the KfCluster CRD
pub const API_GROUP: &str = "cluster.kubeflow.org";

/// Finalizer guarding external resources created for a KfCluster
pub const KF_CLUSTER_FINALIZER: &str = "kfcluster.kubeflow.org";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.kubeflow.org",
    version = "v1alpha1",
    kind = "KfCluster",
    namespaced,
    status = "KfClusterStatus",
    shortname = "kfc",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Platform","type":"string","jsonPath":".spec.platform"}"#,
    printcolumn = r#"{"name":"Kubeconfig","type":"string","jsonPath":".status.kubeconfigPath"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KfClusterSpec {
    /// Platform providing the cluster infrastructure
    pub platform: Platform,

    /// Kubeflow version to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kf_version: Option<String>,

    /// ConfigMap whose keys are exported as environment to the bootstrap workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// Kubeflow applications to install
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<String>,

    /// Secrets mounted read-only into the bootstrap workload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// Provider-specific settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSpec>,
}

/// Platform on which a KfCluster is bootstrapped.
///
/// `metal` was accepted by an earlier schema revision and has been folded
/// into `generic`; it is rejected at admission with a migration hint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Google Cloud: infrastructure is provisioned by this operator
    Gcp,

    /// Existing cluster managed by its operator: nothing is provisioned
    Generic,
}

impl Platform {
    /// All supported platforms, in schema order
    pub const ALL: [Platform; 2] = [Platform::Gcp, Platform::Generic];

    /// Wire name of the platform
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Gcp => "gcp",
            Platform::Generic => "generic",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KfClusterStatus {
    /// Condition history, oldest first. Consecutive duplicate states are never recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<KfClusterCondition>,

    /// Path of the kubeconfig written by the bootstrap workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<String>,

    /// Kubeflow version the install hook last completed with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,

    /// VM provisioned for this cluster; released on deletion even if the provider spec changed since
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<ProvisionedInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KfClusterCondition {
    /// Observed state, taken from the bootstrap workload's latest condition type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Whether that state reported ready
    #[serde(default)]
    pub ready: bool,

    /// When the condition was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl KfClusterCondition {
    /// Creates a condition stamped with the current time
    pub fn new(state: impl Into<String>, ready: bool) -> Self {
        Self {
            state: Some(state.into()),
            ready,
            last_transition_time: Some(Utc::now()),
        }
    }
}

impl KfClusterStatus {
    /// Appends `condition` unless its state equals the most recent one.
    ///
    /// Returns `true` when the history grew.
    pub fn push_condition(&mut self, condition: KfClusterCondition) -> bool {
        if self
            .conditions
            .last()
            .is_some_and(|last| last.state == condition.state)
        {
            return false;
        }
        self.conditions.push(condition);
        true
    }

    /// Most recently recorded condition
    pub fn latest_condition(&self) -> Option<&KfClusterCondition> {
        self.conditions.last()
    }
}

impl KfCluster {
    /// GCE provider settings, if the spec declares them
    pub fn gce_provider(&self) -> Option<&GceProvider> {
        self.spec.provider.as_ref().and_then(|p| p.gce.as_ref())
    }

    /// VM recorded as provisioned for this cluster
    pub fn provisioned_instance(&self) -> Option<&ProvisionedInstance> {
        self.status.as_ref().and_then(|s| s.instance.as_ref())
    }

    /// Whether deleting this cluster requires releasing external resources first
    pub fn requires_finalizer(&self) -> bool {
        self.spec.platform == Platform::Gcp
            && (self.gce_provider().is_some() || self.provisioned_instance().is_some())
    }

    /// Whether the finalizer is currently attached
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == KF_CLUSTER_FINALIZER))
    }

    /// Whether the object is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
