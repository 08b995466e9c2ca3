//! VM instance lifecycle driver
//!
//! Idempotent create and delete of a single Compute Engine instance, each
//! followed by a bounded wait for the instance to reach its target state.
//! Instances are identified by `(project, zone, name)` alone; nothing about
//! them is cached between calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compute_trait::ComputeClientTrait;
use crate::error::ComputeError;
use crate::models::*;
use crate::poll::{CheckOutcome, PollConfig, PollError, poll_until};

const MACHINE_TYPE: &str = "n2-standard-8";
const BOOT_DISK_SIZE_GB: &str = "20";
const SOURCE_IMAGE: &str = "projects/cpsg-ai-kubeflow/global/images/github-action-image-from-snapshot";
const NETWORK: &str = "global/networks/default";
const SERVICE_ACCOUNT_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/logging.write",
];

/// Identity of a VM instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceTarget {
    /// GCP project id
    pub project: String,
    /// Compute zone, e.g. `us-west1-b`
    pub zone: String,
    /// Instance name, unique within the zone
    pub name: String,
}

impl InstanceTarget {
    /// Target for `name` in `project`/`zone`
    pub fn new(project: impl Into<String>, zone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

/// Errors from `ensure_created` / `ensure_deleted`
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The Compute API refused the credentials
    #[error("Compute API authentication failed: {0}")]
    Authentication(String),

    /// The Compute API rejected the create or delete request
    #[error("Request for instance {target} rejected: {source}")]
    Rejected {
        target: String,
        #[source]
        source: ComputeError,
    },

    /// The instance could not be looked up
    #[error("Lookup of instance {target} failed: {source}")]
    Lookup {
        target: String,
        #[source]
        source: ComputeError,
    },

    /// The instance did not reach the target state in time
    #[error("Instance {target} did not reach {awaited} within {elapsed:?}")]
    DeadlineExceeded {
        target: String,
        awaited: &'static str,
        elapsed: Duration,
    },

    /// The caller cancelled the wait
    #[error("Wait for instance {0} cancelled")]
    Cancelled(String),
}

impl ProvisionError {
    fn from_poll(err: PollError<ComputeError>, target: &InstanceTarget, awaited: &'static str) -> Self {
        match err {
            PollError::DeadlineExceeded { elapsed, .. } => ProvisionError::DeadlineExceeded {
                target: target.to_string(),
                awaited,
                elapsed,
            },
            PollError::Cancelled => ProvisionError::Cancelled(target.to_string()),
            // The insert operation itself failed; the instance will never appear
            PollError::Lookup(source @ ComputeError::Operation { .. }) => Self::rejected(source, target),
            PollError::Lookup(source) => Self::lookup(source, target),
        }
    }

    fn lookup(source: ComputeError, target: &InstanceTarget) -> Self {
        match source {
            ComputeError::Authentication(message) => ProvisionError::Authentication(message),
            source => ProvisionError::Lookup {
                target: target.to_string(),
                source,
            },
        }
    }

    fn rejected(source: ComputeError, target: &InstanceTarget) -> Self {
        match source {
            ComputeError::Authentication(message) => ProvisionError::Authentication(message),
            source => ProvisionError::Rejected {
                target: target.to_string(),
                source,
            },
        }
    }

    /// Whether a later attempt might succeed without operator intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProvisionError::Lookup { .. } | ProvisionError::DeadlineExceeded { .. }
        )
    }
}

/// Poll settings for the two waits
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Wait for `RUNNING` after an insert
    pub create_poll: PollConfig,
    /// Wait for `TERMINATED` or not-found after a delete
    pub delete_poll: PollConfig,
}

impl DriverConfig {
    /// Same budget for both waits
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.create_poll.max_elapsed = timeout;
        self.delete_poll.max_elapsed = timeout;
        self
    }
}

/// Builds the instance shape used for every cluster VM
pub fn standard_instance(name: &str, zone: &str) -> Instance {
    Instance {
        name: name.to_string(),
        machine_type: format!("zones/{}/machineTypes/{}", zone, MACHINE_TYPE),
        disks: vec![AttachedDisk {
            disk_type: "PERSISTENT".to_string(),
            boot: true,
            auto_delete: true,
            device_name: Some(format!("persistent-{}", name)),
            initialize_params: Some(AttachedDiskInitializeParams {
                disk_size_gb: Some(BOOT_DISK_SIZE_GB.to_string()),
                source_image: Some(SOURCE_IMAGE.to_string()),
            }),
        }],
        network_interfaces: vec![NetworkInterface {
            network: Some(NETWORK.to_string()),
            access_configs: vec![AccessConfig {
                name: Some("External NAT".to_string()),
                access_type: Some("ONE_TO_ONE_NAT".to_string()),
                network_tier: Some("PREMIUM".to_string()),
                nat_ip: None,
            }],
        }],
        service_accounts: vec![ServiceAccount {
            email: "default".to_string(),
            scopes: SERVICE_ACCOUNT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }],
        metadata: Some(Metadata {
            items: vec![
                MetadataItem {
                    key: "ci-instance".to_string(),
                    value: Some("github-action".to_string()),
                },
                MetadataItem {
                    key: "startup-script".to_string(),
                    value: Some(String::new()),
                },
            ],
        }),
        ..Default::default()
    }
}

/// Drives a single instance to existence or non-existence
pub struct InstanceDriver<C: ComputeClientTrait + ?Sized> {
    client: Arc<C>,
    config: DriverConfig,
}

impl<C: ComputeClientTrait + ?Sized> fmt::Debug for InstanceDriver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDriver").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<C: ComputeClientTrait + ?Sized> InstanceDriver<C> {
    /// Driver over `client` with the given wait settings
    pub fn new(client: Arc<C>, config: DriverConfig) -> Self {
        Self { client, config }
    }

    /// The underlying Compute client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Ensures the instance exists and, if this call created it, is `RUNNING`.
    ///
    /// An instance found on the first lookup is returned as-is without an
    /// insert. An `AlreadyExists` reply to the insert means a concurrent
    /// creator won; the wait proceeds as if this call had inserted it. While
    /// the instance is not visible yet, the insert operation is consulted so
    /// an asynchronous failure (quota, bad image) ends the wait as `Rejected`.
    pub async fn ensure_created(
        &self,
        target: &InstanceTarget,
        cancel: &CancellationToken,
    ) -> Result<Instance, ProvisionError> {
        match self.client.get_instance(&target.project, &target.zone, &target.name).await {
            Ok(instance) => {
                debug!(instance = %target, status = ?instance.status, "Instance already exists");
                return Ok(instance);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(ProvisionError::lookup(e, target)),
        }

        info!(instance = %target, "Creating instance");
        let instance = standard_instance(&target.name, &target.zone);
        let operation = match self.client.insert_instance(&target.project, &target.zone, &instance).await {
            Ok(operation) => {
                if let Some(message) = operation.error_message() {
                    return Err(ProvisionError::rejected(
                        ComputeError::Operation {
                            operation: operation.name,
                            message,
                        },
                        target,
                    ));
                }
                Some(operation.name).filter(|name| !name.is_empty())
            }
            Err(ComputeError::AlreadyExists(_)) => {
                warn!(instance = %target, "Instance created concurrently, waiting for it");
                None
            }
            Err(e) => return Err(ProvisionError::rejected(e, target)),
        };

        let client = &self.client;
        let operation = operation.as_deref();
        let created = poll_until(&self.config.create_poll, cancel, move || async move {
            match client.get_instance(&target.project, &target.zone, &target.name).await {
                Ok(instance) if instance.status == InstanceStatus::Running => CheckOutcome::Done(instance),
                Ok(instance) => {
                    debug!(instance = %target, status = ?instance.status, "Waiting for instance to run");
                    CheckOutcome::Pending
                }
                // Inserts are not always visible to reads straight away
                Err(e) if e.is_not_found() => match failed_operation(&**client, target, operation).await {
                    Some(e) => CheckOutcome::Fatal(e),
                    None => CheckOutcome::Pending,
                },
                Err(e @ ComputeError::Authentication(_)) => CheckOutcome::Fatal(e),
                Err(e) => CheckOutcome::LookupFailed(e),
            }
        })
        .await
        .map_err(|e| ProvisionError::from_poll(e, target, "RUNNING"))?;

        info!(instance = %target, "Instance is running");
        Ok(created)
    }

    /// Ensures the instance does not exist, waiting until it is `TERMINATED` or gone.
    pub async fn ensure_deleted(
        &self,
        target: &InstanceTarget,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        match self.client.delete_instance(&target.project, &target.zone, &target.name).await {
            Ok(operation) => {
                if let Some(message) = operation.error_message() {
                    return Err(ProvisionError::rejected(
                        ComputeError::Operation {
                            operation: operation.name,
                            message,
                        },
                        target,
                    ));
                }
                info!(instance = %target, "Deleting instance");
            }
            Err(e) if e.is_not_found() => {
                debug!(instance = %target, "Instance already gone");
                return Ok(());
            }
            Err(e) => return Err(ProvisionError::rejected(e, target)),
        }

        let client = &self.client;
        poll_until(&self.config.delete_poll, cancel, move || async move {
            match client.get_instance(&target.project, &target.zone, &target.name).await {
                Err(e) if e.is_not_found() => CheckOutcome::Done(()),
                Ok(instance) if instance.status == InstanceStatus::Terminated => CheckOutcome::Done(()),
                Ok(instance) => {
                    debug!(instance = %target, status = ?instance.status, "Waiting for instance to go away");
                    CheckOutcome::Pending
                }
                Err(e @ ComputeError::Authentication(_)) => CheckOutcome::Fatal(e),
                Err(e) => CheckOutcome::LookupFailed(e),
            }
        })
        .await
        .map_err(|e| ProvisionError::from_poll(e, target, "TERMINATED"))?;

        info!(instance = %target, "Instance deleted");
        Ok(())
    }

    /// Lists the instances in a zone
    pub async fn list(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError> {
        self.client.list_instances(project, zone).await
    }
}

/// The operation's error, once it has finished with one
async fn failed_operation<C: ComputeClientTrait + ?Sized>(
    client: &C,
    target: &InstanceTarget,
    operation: Option<&str>,
) -> Option<ComputeError> {
    let name = operation?;
    match client.get_zone_operation(&target.project, &target.zone, name).await {
        Ok(operation) if operation.status == OperationStatus::Done => {
            operation.error_message().map(|message| ComputeError::Operation {
                operation: operation.name,
                message,
            })
        }
        Ok(_) => None,
        Err(e) => {
            debug!(instance = %target, operation = name, error = %e, "Could not read insert operation");
            None
        }
    }
}
