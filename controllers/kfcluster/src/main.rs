//! KfCluster Controller
//!
//! Drives KfCluster resources toward their declared state:
//! - gcp: provisions the GCE instance, the data volume claim and the
//!   bootstrap workload, and records the workload's progress as conditions
//! - generic: uses the existing cluster's kubeconfig, provisions nothing
//!
//! The Kubeflow install hook runs after every pass.

mod backoff;
mod builder;
mod config;
mod controller;
mod drift;
mod error;
mod kubeflow;
mod lifecycle;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use controller::Controller;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting KfCluster Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Compute API: {}", config.gce_api_url);
    info!("  Provision timeout: {:?}", config.provision_timeout);
    info!("  Reconcile concurrency: {}", config.reconcile_concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    info!("KfCluster Controller stopped");
    Ok(())
}
