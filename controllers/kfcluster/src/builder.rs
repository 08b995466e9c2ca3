//! Manifests for a KfCluster's bootstrap workload and its data volume.
//!
//! Builders are pure: the same spec, name and namespace always produce the
//! same manifests. Owner references are stamped separately with `stamp_owner`.

use std::collections::BTreeMap;

use crds::{KfClusterSpec, Platform};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, EnvFromSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

/// Image run by the bootstrap workload
pub const IMAGE_REPOSITORY: &str = "ciscoai/kf-clusterctl";

/// Image tag, fixed at build time
pub const IMAGE_VERSION: &str = match option_env!("KF_CLUSTERCTL_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

pub const CLUSTER_LABEL: &str = "kfcluster";

/// Storage class of the data volume. Not overridable from the spec.
pub const STORAGE_CLASS: &str = "standard";
pub const STORAGE_REQUEST: &str = "10Gi";
pub const DATA_MOUNT_PATH: &str = "/mnt/volume/";
pub const SECRET_MOUNT_ROOT: &str = "/etc/";

const SECRET_FILE_MODE: i32 = 0o444;

/// Workload and storage for one KfCluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterManifests {
    pub workload: Deployment,
    pub storage: PersistentVolumeClaim,
}

/// Script the bootstrap container runs for a platform
pub fn entrypoint_for(platform: Platform) -> &'static str {
    match platform {
        Platform::Gcp => "/gcp_entrypoint.sh",
        Platform::Generic => "/generic_entrypoint.sh",
    }
}

/// Where the bootstrap workload writes the cluster's kubeconfig
pub fn kubeconfig_path_for(name: &str) -> String {
    format!("{}{}/kubeconfig", DATA_MOUNT_PATH, name)
}

pub fn labels_for(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_LABEL.to_string(), name.to_string())])
}

pub fn image_for_version(version: &str) -> String {
    format!("{}:{}", IMAGE_REPOSITORY, version)
}

pub fn build_workload_and_storage(spec: &KfClusterSpec, name: &str, namespace: &str) -> ClusterManifests {
    ClusterManifests {
        workload: build_workload(spec, name, namespace),
        storage: build_storage(name, namespace),
    }
}

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels_for(name)),
        ..Default::default()
    }
}

fn build_storage(name: &str, namespace: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(name, namespace),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(STORAGE_CLASS.to_string()),
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(STORAGE_REQUEST.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_workload(spec: &KfClusterSpec, name: &str, namespace: &str) -> Deployment {
    let labels = labels_for(name);

    let mut volumes: Vec<Volume> = spec
        .secrets
        .iter()
        .map(|secret| Volume {
            name: secret.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                default_mode: Some(SECRET_FILE_MODE),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    volumes.push(Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: name.to_string(),
            read_only: Some(false),
        }),
        ..Default::default()
    });

    let mut mounts: Vec<VolumeMount> = spec
        .secrets
        .iter()
        .map(|secret| VolumeMount {
            name: secret.clone(),
            mount_path: format!("{}{}", SECRET_MOUNT_ROOT, secret),
            read_only: Some(true),
            ..Default::default()
        })
        .collect();
    mounts.push(VolumeMount {
        name: name.to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        read_only: Some(false),
        ..Default::default()
    });

    let env_from = spec.config_map_name.as_ref().map(|config_map| {
        vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: config_map.clone(),
                optional: Some(true),
            }),
            ..Default::default()
        }]
    });

    let container = Container {
        name: name.to_string(),
        image: Some(image_for_version(IMAGE_VERSION)),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["sh".to_string()]),
        args: Some(vec![entrypoint_for(spec.platform).to_string()]),
        env_from,
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(name, namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Adds `owner` to the object's owner references unless an entry with the same uid exists
pub fn stamp_owner(meta: &mut ObjectMeta, owner: OwnerReference) {
    let owners = meta.owner_references.get_or_insert_with(Vec::new);
    if !owners.iter().any(|existing| existing.uid == owner.uid) {
        owners.push(owner);
    }
}
