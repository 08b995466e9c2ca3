//! Controller configuration, read once from the environment at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use gce_client::{DEFAULT_BASE_URL, DriverConfig};

use crate::error::ControllerError;

const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_POLL_INITIAL_INTERVAL_MS: u64 = 500;
const DEFAULT_POLL_MAX_INTERVAL_SECS: u64 = 60;
const DEFAULT_RECONCILE_CONCURRENCY: u16 = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Compute Engine bearer token; without it VM provisioning is disabled
    pub gce_access_token: Option<String>,
    pub gce_api_url: String,
    /// Fallback for `spec.provider.gce.project`
    pub default_project: Option<String>,
    /// Fallback for `spec.provider.gce.zone`
    pub default_zone: Option<String>,
    pub provision_timeout: Duration,
    pub poll_initial_interval: Duration,
    pub poll_max_interval: Duration,
    pub reconcile_concurrency: u16,
}

// Keeps the access token out of logs
impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("namespace", &self.namespace)
            .field("gce_access_token", &self.gce_access_token.as_ref().map(|_| "<redacted>"))
            .field("gce_api_url", &self.gce_api_url)
            .field("default_project", &self.default_project)
            .field("default_zone", &self.default_zone)
            .field("provision_timeout", &self.provision_timeout)
            .field("poll_initial_interval", &self.poll_initial_interval)
            .field("poll_max_interval", &self.poll_max_interval)
            .field("reconcile_concurrency", &self.reconcile_concurrency)
            .finish()
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            gce_access_token: get("GCE_ACCESS_TOKEN"),
            gce_api_url: get("GCE_API_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_project: get("PROJECT"),
            default_zone: get("ZONE"),
            provision_timeout: Duration::from_secs(parse_or(
                "PROVISION_TIMEOUT_SECS",
                get("PROVISION_TIMEOUT_SECS"),
                DEFAULT_PROVISION_TIMEOUT_SECS,
            )?),
            poll_initial_interval: Duration::from_millis(non_zero(
                "POLL_INITIAL_INTERVAL_MS",
                parse_or(
                    "POLL_INITIAL_INTERVAL_MS",
                    get("POLL_INITIAL_INTERVAL_MS"),
                    DEFAULT_POLL_INITIAL_INTERVAL_MS,
                )?,
            )?),
            poll_max_interval: Duration::from_secs(non_zero(
                "POLL_MAX_INTERVAL_SECS",
                parse_or(
                    "POLL_MAX_INTERVAL_SECS",
                    get("POLL_MAX_INTERVAL_SECS"),
                    DEFAULT_POLL_MAX_INTERVAL_SECS,
                )?,
            )?),
            reconcile_concurrency: parse_or(
                "RECONCILE_CONCURRENCY",
                get("RECONCILE_CONCURRENCY"),
                DEFAULT_RECONCILE_CONCURRENCY,
            )?,
        })
    }

    /// Poll settings for the instance driver
    pub fn driver_config(&self) -> DriverConfig {
        let mut config = DriverConfig::default().with_timeout(self.provision_timeout);
        for poll in [&mut config.create_poll, &mut config.delete_poll] {
            poll.initial_interval = self.poll_initial_interval;
            poll.max_interval = self.poll_max_interval;
        }
        config
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ControllerError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{} has an invalid value: {:?}", key, raw))),
    }
}

/// Poll intervals of zero would spin against the Compute API
fn non_zero(key: &str, value: u64) -> Result<u64, ControllerError> {
    if value == 0 {
        return Err(ControllerError::InvalidConfig(format!("{} must be greater than zero", key)));
    }
    Ok(value)
}
