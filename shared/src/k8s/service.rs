use super::{
    child_metadata, create_child_name, labels_for_instance, COMPONENT_LABEL_NAME,
    COMPONENT_SERVER,
};
use crate::app::managed_app::{AppInstance, ManagedApp};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

/// Name of the Service exposing an AppInstance
pub fn service_name(app_name: &str, instance: &AppInstance) -> String {
    create_child_name(app_name, instance, "svc")
}

/// Create the Service selecting an AppInstance's server pods
pub fn create_new_service(app: &ManagedApp, instance: &AppInstance) -> Service {
    let app_name = app.name_any();
    let labels = labels_for_instance(&app_name, instance);
    let mut selector = labels.clone();
    selector.insert(
        COMPONENT_LABEL_NAME.to_string(),
        COMPONENT_SERVER.to_string(),
    );
    Service {
        metadata: child_metadata(
            service_name(&app_name, instance),
            &app.namespace().unwrap_or_default(),
            labels,
            app.controller_owner_ref(&()),
        ),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: app.port(),
                target_port: Some(IntOrString::Int(app.port())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
