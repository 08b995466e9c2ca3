//! Compute Engine API models
//!
//! Only the fields this crate reads or writes are modelled; unknown fields are
//! ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a VM instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Resources are being allocated
    #[default]
    Provisioning,
    /// Resources acquired, instance is preparing for first boot
    Staging,
    /// Instance is booting or running
    Running,
    /// Instance is being stopped
    Stopping,
    /// Instance stopped successfully
    Stopped,
    /// Instance is being suspended
    Suspending,
    /// Instance is suspended
    Suspended,
    /// Instance is being repaired
    Repairing,
    /// Instance was shut down or encountered a failure
    Terminated,
    /// Status not known to this client
    #[serde(other)]
    Unknown,
}

/// A Compute Engine VM instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance name, unique within the zone
    pub name: String,

    /// Server-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Machine type URL or partial path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,

    /// Current status (output only)
    #[serde(default, skip_serializing)]
    pub status: InstanceStatus,

    /// Attached disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,

    /// Network interfaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,

    /// Service accounts available to the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,

    /// Instance metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Server-defined URL of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Disk type, `PERSISTENT` or `SCRATCH`
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub disk_type: String,

    /// Whether this is the boot disk
    #[serde(default)]
    pub boot: bool,

    /// Whether the disk is deleted with the instance
    #[serde(default)]
    pub auto_delete: bool,

    /// Device name exposed to the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Parameters for creating a new disk alongside the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<AttachedDiskInitializeParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskInitializeParams {
    /// Disk size in GB, encoded as a string by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<String>,

    /// Source image to initialise the disk from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Network URL or partial path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// External access configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Access config name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Access config type, only `ONE_TO_ONE_NAT` is supported by the API
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,

    /// Network tier, `PREMIUM` or `STANDARD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_tier: Option<String>,

    /// Assigned external IP (output only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// Service account email, `default` for the project default account
    pub email: String,

    /// OAuth scopes granted to the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Key/value metadata entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MetadataItem {
    /// Metadata key
    pub key: String,
    /// Metadata value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Status of a long-running zonal operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Queued
    #[default]
    Pending,
    /// In progress
    Running,
    /// Finished, successfully or not
    Done,
}

/// A long-running operation returned by mutating calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation name
    #[serde(default)]
    pub name: String,

    /// Operation type, e.g. `insert`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,

    /// Current operation status
    #[serde(default)]
    pub status: OperationStatus,

    /// Errors reported by the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrors>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OperationErrors {
    /// Individual errors
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OperationErrorItem {
    /// Error type identifier
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl Operation {
    /// Concatenated error messages, if the operation reported any
    pub fn error_message(&self) -> Option<String> {
        let errors = &self.error.as_ref()?.errors;
        if errors.is_empty() {
            return None;
        }
        Some(
            errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// One page of an instance listing
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceList {
    /// Instances on this page
    #[serde(default)]
    pub items: Vec<Instance>,
    /// Token for the next page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Error envelope returned by the API
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
