//! Selective copy-and-compare of the fields this controller manages on its children.
//!
//! Merging copies only the managed fields from the desired manifest onto the
//! observed object; everything the API server or other actors set is kept.
//! An update is needed exactly when the merge changes the observed object.
//! Secret volumes that a managed container mounted but the desired manifest no
//! longer declares are pruned, unless a foreign container still mounts them.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::builder::stamp_owner;

/// Observed workload with the managed fields of `desired` applied, or `None` if nothing differs
pub fn reconcile_workload(observed: &Deployment, desired: &Deployment) -> Option<Deployment> {
    let merged = merge_workload(observed, desired);
    (merged != *observed).then_some(merged)
}

/// Observed claim with the managed metadata of `desired` applied, or `None` if nothing differs.
///
/// A bound claim's spec is largely immutable, so only labels and owners are managed.
pub fn reconcile_claim(observed: &PersistentVolumeClaim, desired: &PersistentVolumeClaim) -> Option<PersistentVolumeClaim> {
    let mut merged = observed.clone();
    merge_metadata(&mut merged.metadata, &desired.metadata);
    (merged != *observed).then_some(merged)
}

pub fn merge_workload(observed: &Deployment, desired: &Deployment) -> Deployment {
    let mut merged = observed.clone();
    merge_metadata(&mut merged.metadata, &desired.metadata);

    let Some(desired_spec) = desired.spec.as_ref() else {
        return merged;
    };
    let spec = merged.spec.get_or_insert_with(Default::default);
    spec.replicas = desired_spec.replicas;

    let template = &mut spec.template;
    if let Some(labels) = desired_spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.as_ref())
    {
        let existing = template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(Default::default);
        existing.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    if let Some(desired_pod) = desired_spec.template.spec.as_ref() {
        merge_pod_spec(template.spec.get_or_insert_with(Default::default), desired_pod);
    }
    merged
}

fn merge_metadata(observed: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(labels) = desired.labels.as_ref() {
        observed
            .labels
            .get_or_insert_with(Default::default)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for owner in desired.owner_references.iter().flatten() {
        stamp_owner(observed, owner.clone());
    }
}

fn merge_pod_spec(observed: &mut PodSpec, desired: &PodSpec) {
    let managed: BTreeSet<&str> = desired.containers.iter().map(|c| c.name.as_str()).collect();
    let previously_mounted = mounted_volumes(observed, |name| managed.contains(name));

    for container in &desired.containers {
        match observed.containers.iter_mut().find(|c| c.name == container.name) {
            Some(existing) => merge_container(existing, container),
            None => observed.containers.push(container.clone()),
        }
    }

    if let Some(desired_volumes) = desired.volumes.as_ref() {
        let volumes = observed.volumes.get_or_insert_with(Vec::new);
        for volume in desired_volumes {
            match volumes.iter_mut().find(|v| v.name == volume.name) {
                Some(existing) => merge_volume(existing, volume),
                None => volumes.push(volume.clone()),
            }
        }
    }

    let desired_names: BTreeSet<&str> = desired.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
    let foreign_mounted = mounted_volumes(observed, |name| !managed.contains(name));
    if let Some(volumes) = observed.volumes.as_mut() {
        volumes.retain(|v| {
            let stale = v.secret.is_some()
                && previously_mounted.contains(&v.name)
                && !desired_names.contains(v.name.as_str())
                && !foreign_mounted.contains(&v.name);
            !stale
        });
    }
}

/// Names of volumes mounted by the containers `include` selects
fn mounted_volumes(pod: &PodSpec, include: impl Fn(&str) -> bool) -> BTreeSet<String> {
    pod.containers
        .iter()
        .filter(|c| include(c.name.as_str()))
        .flat_map(|c| c.volume_mounts.iter().flatten())
        .map(|m| m.name.clone())
        .collect()
}

fn merge_container(observed: &mut Container, desired: &Container) {
    observed.image.clone_from(&desired.image);
    observed.image_pull_policy.clone_from(&desired.image_pull_policy);
    observed.command.clone_from(&desired.command);
    observed.args.clone_from(&desired.args);
    observed.env_from.clone_from(&desired.env_from);
    observed.volume_mounts.clone_from(&desired.volume_mounts);
}

fn merge_volume(observed: &mut Volume, desired: &Volume) {
    if let Some(secret) = desired.secret.as_ref() {
        let existing = observed.secret.get_or_insert_with(Default::default);
        existing.secret_name.clone_from(&secret.secret_name);
        existing.default_mode = secret.default_mode;
    }
    if let Some(claim) = desired.persistent_volume_claim.as_ref() {
        let existing = observed
            .persistent_volume_claim
            .get_or_insert_with(Default::default);
        existing.claim_name.clone_from(&claim.claim_name);
        existing.read_only = claim.read_only;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_workload_and_storage, ClusterManifests};
    use crds::{KfClusterSpec, Platform};
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn manifests(secrets: &[&str]) -> ClusterManifests {
        let spec = KfClusterSpec {
            platform: Platform::Gcp,
            kf_version: None,
            config_map_name: Some("cfg".to_string()),
            apps: vec![],
            secrets: secrets.iter().map(|s| s.to_string()).collect(),
            provider: None,
        };
        build_workload_and_storage(&spec, "demo", "ns1")
    }

    fn pod(deployment: &Deployment) -> &PodSpec {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn pod_mut(deployment: &mut Deployment) -> &mut PodSpec {
        deployment.spec.as_mut().unwrap().template.spec.as_mut().unwrap()
    }

    #[test]
    fn test_identical_workload_needs_no_update() {
        let desired = manifests(&["db-cred"]).workload;
        assert!(reconcile_workload(&desired, &desired).is_none());
    }

    #[test]
    fn test_platform_set_fields_are_tolerated() {
        let desired = manifests(&["db-cred"]).workload;
        let mut observed = desired.clone();
        observed.metadata.resource_version = Some("42".to_string());
        observed.metadata.uid = Some("uid-deploy".to_string());
        observed.status = Some(DeploymentStatus {
            replicas: Some(1),
            ..Default::default()
        });
        pod_mut(&mut observed).containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        pod_mut(&mut observed).restart_policy = Some("Always".to_string());
        pod_mut(&mut observed).dns_policy = Some("ClusterFirst".to_string());

        assert!(reconcile_workload(&observed, &desired).is_none());
    }

    #[test]
    fn test_changed_image_is_corrected() {
        let desired = manifests(&["db-cred"]).workload;
        let mut observed = desired.clone();
        observed.metadata.resource_version = Some("42".to_string());
        pod_mut(&mut observed).containers[0].image = Some("ciscoai/kf-clusterctl:old".to_string());
        pod_mut(&mut observed).containers[0].termination_message_path = Some("/dev/termination-log".to_string());

        let merged = reconcile_workload(&observed, &desired).unwrap();
        let container = &pod(&merged).containers[0];
        assert_eq!(container.image, pod(&desired).containers[0].image);
        assert_eq!(container.termination_message_path.as_deref(), Some("/dev/termination-log"));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("42"));
    }

    #[test]
    fn test_new_secret_adds_volume_and_mount() {
        let observed = manifests(&["db-cred"]).workload;
        let desired = manifests(&["db-cred", "gcp-sa"]).workload;

        let merged = reconcile_workload(&observed, &desired).unwrap();
        let volumes = pod(&merged).volumes.as_ref().unwrap();
        assert!(volumes.iter().any(|v| v.name == "gcp-sa"));
        let mounts = pod(&merged).containers[0].volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.name == "gcp-sa"));
    }

    #[test]
    fn test_removed_secret_drops_volume_and_mount() {
        let observed = manifests(&["db-cred", "old-sa"]).workload;
        let desired = manifests(&["db-cred"]).workload;

        let merged = reconcile_workload(&observed, &desired).unwrap();
        let names: Vec<&str> = pod(&merged).volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["db-cred", "demo"]);
        let mounts = pod(&merged).containers[0].volume_mounts.as_ref().unwrap();
        assert!(!mounts.iter().any(|m| m.name == "old-sa"));
        assert!(reconcile_workload(&merged, &desired).is_none());
    }

    #[test]
    fn test_foreign_secret_volumes_survive_pruning() {
        let observed = manifests(&["db-cred", "old-sa"]).workload;
        let desired = manifests(&["db-cred"]).workload;
        let mut with_sidecar = observed.clone();
        let sidecar_mount = pod(&observed).containers[0]
            .volume_mounts
            .iter()
            .flatten()
            .find(|m| m.name == "old-sa")
            .cloned()
            .unwrap();
        pod_mut(&mut with_sidecar).containers.push(Container {
            name: "log-shipper".to_string(),
            volume_mounts: Some(vec![sidecar_mount]),
            ..Default::default()
        });
        let mut injected = pod(&observed).volumes.as_ref().unwrap()[0].clone();
        injected.name = "injected-token".to_string();
        pod_mut(&mut with_sidecar).volumes.as_mut().unwrap().push(injected);

        let merged = reconcile_workload(&with_sidecar, &desired).unwrap();
        let names: Vec<&str> = pod(&merged).volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert!(names.contains(&"old-sa"), "still mounted by the sidecar");
        assert!(names.contains(&"injected-token"), "never mounted by the managed container");
    }

    #[test]
    fn test_foreign_container_is_kept() {
        let desired = manifests(&[]).workload;
        let mut observed = desired.clone();
        pod_mut(&mut observed).containers.push(Container {
            name: "istio-proxy".to_string(),
            ..Default::default()
        });
        observed.spec.as_mut().unwrap().replicas = Some(3);

        let merged = reconcile_workload(&observed, &desired).unwrap();
        assert_eq!(merged.spec.as_ref().unwrap().replicas, Some(1));
        assert_eq!(pod(&merged).containers.len(), 2);
    }

    #[test]
    fn test_claim_only_tracks_metadata() {
        let ClusterManifests { storage: desired, .. } = manifests(&[]);
        let mut observed = desired.clone();
        observed.spec.as_mut().unwrap().volume_name = Some("pv-123".to_string());
        assert!(reconcile_claim(&observed, &desired).is_none());

        let mut owned = desired.clone();
        stamp_owner(
            &mut owned.metadata,
            OwnerReference {
                uid: "uid-1".to_string(),
                name: "demo".to_string(),
                ..Default::default()
            },
        );
        let merged = reconcile_claim(&observed, &owned).unwrap();
        assert_eq!(merged.metadata.owner_references.as_ref().unwrap().len(), 1);
        assert_eq!(merged.spec.as_ref().unwrap().volume_name.as_deref(), Some("pv-123"));
    }
}
