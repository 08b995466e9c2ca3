//! Main controller implementation.
//!
//! Wires the object store, the Compute Engine driver and the install hook
//! into a reconciler, starts the watcher, and turns SIGINT/SIGTERM into a
//! cancellation that stops the watcher and aborts in-flight instance waits.

use std::sync::Arc;

use gce_client::{ComputeClientTrait, GceClient, InstanceDriver};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kubeflow::NoopInstaller;
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::Watcher;

/// Main controller for KfCluster resources.
pub struct Controller {
    kf_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    signal_listener: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing KfCluster Controller");

        let kube_client = Client::try_default().await?;
        let shutdown = CancellationToken::new();

        let store = Arc::new(KubeStore::new(kube_client.clone()));
        let mut reconciler = Reconciler::new(store, Box::new(NoopInstaller), shutdown.clone())
            .with_gce_defaults(config.default_project.clone(), config.default_zone.clone());

        match config.gce_access_token.as_ref() {
            Some(token) => {
                let client = GceClient::new(config.gce_api_url.clone(), token.clone())
                    .map_err(|e| ControllerError::InvalidConfig(format!("Compute client: {}", e)))?;
                let client: Arc<dyn ComputeClientTrait> = Arc::new(client);
                reconciler = reconciler.with_driver(InstanceDriver::new(client, config.driver_config()));
                info!(url = %config.gce_api_url, "Compute Engine provisioning enabled");
            }
            None => warn!("GCE_ACCESS_TOKEN is not set, clusters with a GCE provider will fail to reconcile"),
        }

        let (clusters, deployments, claims) = match config.namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client, ns),
            ),
            None => (
                Api::all(kube_client.clone()),
                Api::all(kube_client.clone()),
                Api::all(kube_client),
            ),
        };

        let watcher = Watcher::new(
            Arc::new(reconciler),
            clusters,
            deployments,
            claims,
            config.reconcile_concurrency,
            shutdown.clone(),
        );
        let kf_cluster_watcher = tokio::spawn(async move { watcher.watch_kf_clusters().await });
        let signal_listener = tokio::spawn(cancel_on_signal(shutdown));

        Ok(Self {
            kf_cluster_watcher,
            signal_listener,
        })
    }

    /// Runs until the watcher stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("KfCluster Controller running");
        let result = self
            .kf_cluster_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("KfCluster watcher panicked: {}", e)))?;
        self.signal_listener.abort();
        result
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
