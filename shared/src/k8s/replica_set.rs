use super::{
    child_metadata, config_map, create_child_name, labels_for_instance, COMPONENT_LABEL_NAME,
    COMPONENT_SERVER,
};
use crate::app::managed_app::{AppInstance, ManagedApp};
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

/// Directory the instance's ConfigMap is mounted at
pub const CONFIG_MOUNT_PATH: &str = "/etc/blueshift";
/// Environment variable telling the application which app it belongs to
pub const APP_NAME_ENV_VAR: &str = "BLUESHIFT_APP";
/// Environment variable telling the application which instance it is, so the user
/// pods it launches can be labelled with it
pub const INSTANCE_ENV_VAR: &str = "BLUESHIFT_INSTANCE";

const CONTAINER_NAME: &str = "app";
const CONFIG_VOLUME_NAME: &str = "config";

/// Create the ReplicaSet running an AppInstance's server pods
pub fn create_new_replica_set(app: &ManagedApp, instance: &AppInstance) -> ReplicaSet {
    let app_name = app.name_any();
    let labels = labels_for_instance(&app_name, instance);
    let mut pod_labels = labels.clone();
    pod_labels.insert(
        COMPONENT_LABEL_NAME.to_string(),
        COMPONENT_SERVER.to_string(),
    );

    let mut env: Vec<EnvVar> = app
        .spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    env.push(EnvVar {
        name: APP_NAME_ENV_VAR.to_string(),
        value: Some(app_name.clone()),
        ..Default::default()
    });
    env.push(EnvVar {
        name: INSTANCE_ENV_VAR.to_string(),
        value: Some(instance.spec_fingerprint.clone()),
        ..Default::default()
    });

    let config_map_name = config_map::create_new_config_map(app, instance)
        .metadata
        .name;

    ReplicaSet {
        metadata: child_metadata(
            create_child_name(&app_name, instance, "rs"),
            &app.namespace().unwrap_or_default(),
            labels,
            app.controller_owner_ref(&()),
        ),
        spec: Some(ReplicaSetSpec {
            replicas: Some(app.replicas()),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(app.spec.image.clone()),
                        env: Some(env),
                        ports: Some(vec![ContainerPort {
                            container_port: app.port(),
                            name: Some("http".to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: CONFIG_VOLUME_NAME.to_string(),
                            mount_path: CONFIG_MOUNT_PATH.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME_NAME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: config_map_name,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A ReplicaSet is ready once every desired replica reports ready. One
/// scaled to zero is ready right away; its status never reports ready replicas.
pub fn is_ready(replica_set: &ReplicaSet) -> bool {
    let desired = replica_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    if desired == 0 {
        return true;
    }
    match replica_set.status.as_ref().and_then(|s| s.ready_replicas) {
        Some(ready) => ready == desired,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::managed_app::ManagedAppSpec;
    use k8s_openapi::api::apps::v1::ReplicaSetStatus;

    fn test_app() -> ManagedApp {
        let mut app = ManagedApp::new(
            "app1",
            ManagedAppSpec {
                image: "img:1".to_string(),
                replicas: Some(2),
                ..Default::default()
            },
        );
        app.metadata.namespace = Some("apps".to_string());
        app
    }

    #[test]
    fn test_replica_set_mounts_instance_config_map() {
        let rs = create_new_replica_set(&test_app(), &AppInstance::new("h1"));
        assert_eq!(rs.metadata.name.as_deref(), Some("app1-rs-h1"));
        let pod_spec = rs.spec.unwrap().template.unwrap().spec.unwrap();
        let volume = &pod_spec.volumes.unwrap()[0];
        assert_eq!(
            volume.config_map.as_ref().unwrap().name.as_deref(),
            Some("app1-cm-h1")
        );
        let env = pod_spec.containers[0].env.clone().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == INSTANCE_ENV_VAR && e.value.as_deref() == Some("h1")));
    }

    #[test]
    fn test_is_ready() {
        let mut rs = create_new_replica_set(&test_app(), &AppInstance::new("h1"));
        assert!(!is_ready(&rs));
        rs.status = Some(ReplicaSetStatus {
            replicas: 2,
            ready_replicas: Some(1),
            ..Default::default()
        });
        assert!(!is_ready(&rs));
        rs.status = Some(ReplicaSetStatus {
            replicas: 2,
            ready_replicas: Some(2),
            ..Default::default()
        });
        assert!(is_ready(&rs));
    }

    #[test]
    fn test_scaled_to_zero_is_ready() {
        let mut app = test_app();
        app.spec.replicas = Some(0);
        let mut rs = create_new_replica_set(&app, &AppInstance::new("h1"));
        assert_eq!(rs.spec.as_ref().unwrap().replicas, Some(0));
        assert!(is_ready(&rs));
        rs.status = Some(ReplicaSetStatus {
            replicas: 0,
            ..Default::default()
        });
        assert!(is_ready(&rs));
    }
}
