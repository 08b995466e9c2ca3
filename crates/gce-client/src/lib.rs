//! Google Compute Engine instance client
//!
//! A small client for the Compute Engine v1 instance API, plus the pieces
//! needed to drive a VM through its lifecycle: a bounded exponential-backoff
//! poller and an idempotent create/delete driver.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gce_client::{DriverConfig, GceClient, InstanceDriver, InstanceTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GceClient::new(
//!     "https://compute.googleapis.com".to_string(),
//!     "ya29.access-token".to_string(),
//! )?;
//! let driver = InstanceDriver::new(Arc::new(client), DriverConfig::default());
//!
//! let target = InstanceTarget::new("my-project", "us-west1-b", "kf-github-action");
//! let cancel = CancellationToken::new();
//! driver.ensure_created(&target, &cancel).await?;
//! driver.ensure_deleted(&target, &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
#[path = "trait.rs"]
pub mod compute_trait;
pub mod error;
pub mod instance;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
pub mod poll;

pub use client::{DEFAULT_BASE_URL, GceClient};
pub use compute_trait::ComputeClientTrait;
pub use error::ComputeError;
pub use instance::{DriverConfig, InstanceDriver, InstanceTarget, ProvisionError, standard_instance};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockComputeClient;
pub use models::*;
pub use poll::{CheckOutcome, LookupErrorPolicy, MIN_INTERVAL, PollConfig, PollError, poll_until};
