//! ComputeClient trait for mocking
//!
//! The concrete `GceClient` implements this trait; the instance driver and the
//! controller only ever see the trait, so tests can substitute the in-memory mock.

use crate::error::ComputeError;
use crate::models::{Instance, Operation};

/// Trait for Compute Engine instance operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ComputeClientTrait: Send + Sync {
    /// Get an instance by name. Returns `ComputeError::NotFound` when it does not exist.
    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance, ComputeError>;

    /// List all instances in a zone, following pagination
    async fn list_instances(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError>;

    /// Submit an instance insert. Returns as soon as the operation is accepted.
    async fn insert_instance(&self, project: &str, zone: &str, instance: &Instance) -> Result<Operation, ComputeError>;

    /// Submit an instance delete. Returns as soon as the operation is accepted.
    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;

    /// Get a zonal operation by name
    async fn get_zone_operation(&self, project: &str, zone: &str, operation: &str) -> Result<Operation, ComputeError>;
}
