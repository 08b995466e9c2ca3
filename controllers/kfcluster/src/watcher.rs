//! Kubernetes resource watcher.
//!
//! Runs a `kube_runtime::Controller` over KfClusters and the workloads and
//! claims they own. The runtime queues one reconcile per object key at a
//! time, which is the serialization the reconciler relies on.

use std::sync::Arc;
use std::time::Duration;

use crds::KfCluster;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{watcher, Controller};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::builder::CLUSTER_LABEL;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::ObjectKey;

/// Debounce window: events arriving within it are folded into one reconcile
const DEBOUNCE: Duration = Duration::from_secs(5);

fn object_key(cluster: &KfCluster) -> ObjectKey {
    ObjectKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any())
}

fn action_for(requeue_after: Option<Duration>) -> Action {
    match requeue_after {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

async fn reconcile(cluster: Arc<KfCluster>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let key = object_key(&cluster);
    let span = info_span!("reconcile", kfcluster = %key);
    async move {
        let phase = reconciler.reconcile(&key).await?;
        reconciler.reset_error(&key.to_string());
        Ok(action_for(phase.and_then(|p| p.requeue_after())))
    }
    .instrument(span)
    .await
}

fn error_policy(cluster: Arc<KfCluster>, err: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = object_key(&cluster).to_string();
    let (delay, error_count) = reconciler.requeue_after_error(&key, err);
    if err.is_retryable() {
        warn!(kfcluster = %key, error = %err, "Lost a write race, retrying");
    } else {
        error!(
            kfcluster = %key,
            error = %err,
            error_count,
            requeue_secs = delay.as_secs(),
            "Reconciliation failed"
        );
    }
    Action::requeue(delay)
}

/// Watches KfClusters and their children.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    clusters: Api<KfCluster>,
    deployments: Api<Deployment>,
    claims: Api<PersistentVolumeClaim>,
    concurrency: u16,
    shutdown: CancellationToken,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        clusters: Api<KfCluster>,
        deployments: Api<Deployment>,
        claims: Api<PersistentVolumeClaim>,
        concurrency: u16,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            clusters,
            deployments,
            claims,
            concurrency,
            shutdown,
        }
    }

    /// Runs until the shutdown token fires and in-flight reconciles finish.
    pub async fn watch_kf_clusters(&self) -> Result<(), ControllerError> {
        info!(concurrency = self.concurrency, "Starting KfCluster watcher");

        // Only children carrying the cluster label can be ours
        let children = watcher::Config::default().labels(CLUSTER_LABEL);
        let runtime_config = RuntimeConfig::default()
            .debounce(DEBOUNCE)
            .concurrency(self.concurrency);
        let shutdown = self.shutdown.clone();

        Controller::new(self.clusters.clone(), watcher::Config::default())
            .owns(self.deployments.clone(), children.clone())
            .owns(self.claims.clone(), children)
            .with_config(runtime_config)
            .graceful_shutdown_on(async move { shutdown.cancelled().await })
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((object, action)) => debug!(kfcluster = %object, ?action, "Reconciled"),
                    Err(e) => debug!(error = %e, "Controller event not reconciled"),
                }
            })
            .await;

        info!("KfCluster watcher stopped");
        Ok(())
    }
}
