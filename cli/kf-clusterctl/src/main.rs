//! kf-clusterctl - creates and deletes the VM backing a KF Cluster
//!
//! `kf-clusterctl create --file kfcluster-gcp.yaml` creates the instance a
//! KfCluster's `spec.provider.gce` describes and waits for it to run;
//! `kf-clusterctl delete` removes it. Project and zone not given in the file
//! come from `PROJECT` and `ZONE`. Exits 1 on any error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use crds::{GceProvider, Platform, apply_defaults, decode_admission_object, validate_create};
use gce_client::{DriverConfig, GceClient, InstanceDriver, InstanceTarget, DEFAULT_BASE_URL};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: Level = Level::INFO;

#[derive(Debug, Parser)]
#[command(name = "kf-clusterctl", version, about = "Create and delete KF Cluster instances")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    loglevel: String,

    /// KfCluster spec file
    #[arg(long, short = 'f', global = true)]
    file: Option<PathBuf>,

    /// GCP project used when the spec file does not name one
    #[arg(long, global = true, env = "PROJECT")]
    project: Option<String>,

    /// Compute zone used when the spec file does not name one
    #[arg(long, global = true, env = "ZONE")]
    zone: Option<String>,

    /// Compute Engine access token
    #[arg(long, global = true, env = "GCE_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true, env = "GCE_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    /// How long to wait for the instance to reach its target state
    #[arg(long, global = true, env = "PROVISION_TIMEOUT_SECS", default_value_t = 300)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the instance and wait until it is running
    Create,
    /// Delete the instance and wait until it is gone
    Delete,
    /// List instances in the zone
    List,
}

fn init_logging(requested: &str) {
    let parsed = requested.parse::<Level>();
    let level = parsed.as_ref().copied().unwrap_or(DEFAULT_LEVEL);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.as_str()))
        .init();
    if parsed.is_err() {
        warn!("Invalid log level '{}', defaulting to '{}'", requested, DEFAULT_LEVEL);
    }
}

/// GCE settings declared by a KfCluster spec file
///
/// The file goes through the same decoding, defaulting and validation as an
/// object submitted to the cluster.
fn load_provider(path: &Path) -> Result<GceProvider> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let object: serde_json::Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {} as YAML", path.display()))?;
    let mut cluster =
        decode_admission_object(&object).with_context(|| format!("{} is not a valid KfCluster", path.display()))?;
    apply_defaults(&mut cluster);
    validate_create(&cluster).with_context(|| format!("{} is not a valid KfCluster", path.display()))?;

    if cluster.spec.platform != Platform::Gcp {
        bail!(
            "{} declares platform '{}'; only gcp clusters have an instance",
            path.display(),
            cluster.spec.platform
        );
    }
    Ok(cluster.gce_provider().cloned().unwrap_or_default())
}

fn resolve_target(provider: &GceProvider, project: Option<&str>, zone: Option<&str>) -> Result<InstanceTarget> {
    let project = provider
        .project
        .as_deref()
        .or(project)
        .context("no project: set spec.provider.gce.project or PROJECT")?;
    let zone = provider
        .zone
        .as_deref()
        .or(zone)
        .context("no zone: set spec.provider.gce.zone or ZONE")?;
    Ok(InstanceTarget::new(project, zone, provider.instance_name_or_default()))
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let provider = match cli.file.as_deref() {
        Some(path) => load_provider(path)?,
        None => GceProvider::default(),
    };
    let target = resolve_target(&provider, cli.project.as_deref(), cli.zone.as_deref())?;

    let token = cli.token.context("GCE_ACCESS_TOKEN is not set")?;
    let client = GceClient::new(cli.api_url, token)?;
    let config = DriverConfig::default().with_timeout(Duration::from_secs(cli.timeout_secs));
    let driver = InstanceDriver::new(Arc::new(client), config);

    match cli.command {
        Command::Create => {
            let instance = driver.ensure_created(&target, &cancel).await?;
            info!(instance = %target, status = ?instance.status, "Instance ready");
        }
        Command::Delete => {
            driver.ensure_deleted(&target, &cancel).await?;
            info!(instance = %target, "Instance deleted");
        }
        Command::List => {
            for instance in driver.list(&target.project, &target.zone).await? {
                println!("{}\t{:?}", instance.name, instance.status);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            if let Err(io) = e.print() {
                // stderr is unusable; the log goes to stdout
                init_logging(DEFAULT_LEVEL.as_str());
                error!(error = %io, kind = ?e.kind(), "Could not print argument error");
            }
            return ExitCode::FAILURE;
        }
    };
    init_logging(&cli.loglevel);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning wait");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
