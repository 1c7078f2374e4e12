use super::{child_metadata, service, APP_LABEL_NAME};
use crate::app::managed_app::{AppInstance, ManagedApp};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Create the Ingress routing a ManagedApp's traffic to the Service of
/// the given (latest) AppInstance
pub fn create_ingress_for_instance(app: &ManagedApp, instance: &AppInstance) -> Ingress {
    let app_name = app.name_any();
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL_NAME.to_string(), app_name.clone());
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: service::service_name(&app_name, instance),
            port: Some(ServiceBackendPort {
                number: Some(app.port()),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };
    Ingress {
        metadata: child_metadata(
            app_name,
            &app.namespace().unwrap_or_default(),
            labels,
            app.controller_owner_ref(&()),
        ),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: app.spec.ingress_host.clone(),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
