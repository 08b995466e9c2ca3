//! Admission rules for KfCluster
//!
//! Defaulting and validation applied before a KfCluster is persisted. A
//! malformed spec (unknown platform, secret names that cannot become volume
//! names) is rejected here instead of surfacing half-way through a reconcile.

use kube::ResourceExt;
use std::collections::HashSet;
use thiserror::Error;

use crate::kf_cluster::{KfCluster, Platform, API_GROUP};
use crate::provider::DEFAULT_INSTANCE_NAME;

/// Maximum length of a DNS-1123 label
const DNS_LABEL_MAX_LEN: usize = 63;

/// Reasons a KfCluster is rejected at admission
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The object could not be decoded as a KfCluster
    #[error("Malformed KfCluster: {0}")]
    Malformed(String),

    /// `apiVersion` names a group other than the KfCluster group
    #[error("apiVersion '{0}' is not in group 'cluster.kubeflow.org'")]
    WrongApiGroup(String),

    /// `spec.platform` is missing
    #[error("spec.platform is required, expected one of 'gcp' or 'generic'")]
    MissingPlatform,

    /// `spec.platform` is not a known platform
    #[error("Invalid platform type '{0}', expected one of 'gcp' or 'generic'")]
    UnknownPlatform(String),

    /// `spec.platform` uses a value from an earlier schema revision
    #[error("Platform '{0}' is no longer supported, use 'generic' for clusters managed outside this operator")]
    LegacyPlatform(String),

    /// Platform may not change once the cluster exists
    #[error("spec.platform is immutable (was '{from}', got '{to}')")]
    PlatformChanged {
        /// Platform of the stored object
        from: Platform,
        /// Platform of the update
        to: Platform,
    },

    /// A secret name cannot be used as a volume name
    #[error("Secret name '{0}' must be a DNS-1123 label")]
    InvalidSecretName(String),

    /// A secret name collides with the data volume, which is named after the cluster
    #[error("Secret name '{0}' collides with the cluster's data volume")]
    SecretShadowsDataVolume(String),

    /// The config map name is not a valid object name
    #[error("ConfigMap name '{0}' is invalid")]
    InvalidConfigMapName(String),

    /// A GCE provider is declared for a platform that provisions nothing
    #[error("spec.provider.gce is only valid for platform 'gcp' (got '{0}')")]
    GceProviderOnWrongPlatform(Platform),

    /// The VM addressed by the GCE provider may not change once set
    #[error("spec.provider.gce project, zone and instanceName are immutable and cannot be removed")]
    GceInstanceChanged,

    /// A GCE provider field is present but empty
    #[error("spec.provider.gce.{0} must not be empty")]
    EmptyGceField(&'static str),
}

/// Parses a raw platform value.
///
/// `metal` is recognised only to produce a migration hint.
pub fn parse_platform(raw: &str) -> Result<Platform, ValidationError> {
    match raw {
        "gcp" => Ok(Platform::Gcp),
        "generic" => Ok(Platform::Generic),
        "metal" => Err(ValidationError::LegacyPlatform(raw.to_string())),
        other => Err(ValidationError::UnknownPlatform(other.to_string())),
    }
}

/// Decodes a raw admission object, checking the platform before the typed decode
/// so that a bad platform yields a specific error rather than a serde message.
pub fn decode_admission_object(object: &serde_json::Value) -> Result<KfCluster, ValidationError> {
    if let Some(api_version) = object.get("apiVersion").and_then(serde_json::Value::as_str) {
        if api_version.split('/').next() != Some(API_GROUP) {
            return Err(ValidationError::WrongApiGroup(api_version.to_string()));
        }
    }
    match object.pointer("/spec/platform") {
        None | Some(serde_json::Value::Null) => return Err(ValidationError::MissingPlatform),
        Some(serde_json::Value::String(raw)) => {
            parse_platform(raw)?;
        }
        Some(other) => return Err(ValidationError::UnknownPlatform(other.to_string())),
    }
    serde_json::from_value(object.clone()).map_err(|e| ValidationError::Malformed(e.to_string()))
}

/// Fills in defaults. Idempotent.
pub fn apply_defaults(cluster: &mut KfCluster) {
    let config_map = cluster
        .spec
        .config_map_name
        .take()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    cluster.spec.config_map_name = config_map;

    // First occurrence wins so mount order stays what the author wrote
    let mut seen = HashSet::new();
    cluster.spec.secrets.retain(|secret| seen.insert(secret.clone()));

    if cluster.spec.platform == Platform::Gcp {
        if let Some(gce) = cluster.spec.provider.as_mut().and_then(|p| p.gce.as_mut()) {
            if gce.instance_name.is_none() {
                gce.instance_name = Some(DEFAULT_INSTANCE_NAME.to_string());
            }
        }
    }
}

/// Validates a new KfCluster
pub fn validate_create(cluster: &KfCluster) -> Result<(), ValidationError> {
    let name = cluster.name_any();

    for secret in &cluster.spec.secrets {
        if !is_dns_label(secret) {
            return Err(ValidationError::InvalidSecretName(secret.clone()));
        }
        if *secret == name {
            return Err(ValidationError::SecretShadowsDataVolume(secret.clone()));
        }
    }

    if let Some(config_map) = &cluster.spec.config_map_name {
        if !is_dns_subdomain(config_map) {
            return Err(ValidationError::InvalidConfigMapName(config_map.clone()));
        }
    }

    if let Some(gce) = cluster.gce_provider() {
        if cluster.spec.platform != Platform::Gcp {
            return Err(ValidationError::GceProviderOnWrongPlatform(cluster.spec.platform));
        }
        for (field, value) in [
            ("project", &gce.project),
            ("zone", &gce.zone),
            ("instanceName", &gce.instance_name),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ValidationError::EmptyGceField(field));
            }
        }
    }

    Ok(())
}

/// Validates an update against the stored object
pub fn validate_update(old: &KfCluster, new: &KfCluster) -> Result<(), ValidationError> {
    if old.spec.platform != new.spec.platform {
        return Err(ValidationError::PlatformChanged {
            from: old.spec.platform,
            to: new.spec.platform,
        });
    }
    if let Some(old_gce) = old.gce_provider() {
        if !new.gce_provider().is_some_and(|new_gce| new_gce.same_instance(old_gce)) {
            return Err(ValidationError::GceInstanceChanged);
        }
    }
    validate_create(new)
}

/// Validates a deletion. Deletion is always allowed; cleanup is handled by the finalizer.
pub fn validate_delete(_cluster: &KfCluster) -> Result<(), ValidationError> {
    Ok(())
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= DNS_LABEL_MAX_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= 253 && value.split('.').all(is_dns_label)
}
