use super::{child_metadata, create_child_name, labels_for_instance};
use crate::app::managed_app::{AppInstance, ManagedApp};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Resource, ResourceExt};

/// Create the ConfigMap holding an AppInstance's config files.
///
/// Example:
///
/// ```
/// use blueshift_shared::app::managed_app::{AppInstance, ManagedApp, ManagedAppSpec};
/// use blueshift_shared::k8s::config_map;
///
/// let mut app = ManagedApp::new("app1", ManagedAppSpec::default());
/// app.metadata.namespace = Some("apps".to_string());
/// let cm = config_map::create_new_config_map(&app, &AppInstance::new("h1"));
/// assert_eq!(cm.metadata.name.unwrap(), "app1-cm-h1");
/// ```
pub fn create_new_config_map(app: &ManagedApp, instance: &AppInstance) -> ConfigMap {
    let app_name = app.name_any();
    ConfigMap {
        metadata: child_metadata(
            create_child_name(&app_name, instance, "cm"),
            &app.namespace().unwrap_or_default(),
            labels_for_instance(&app_name, instance),
            app.controller_owner_ref(&()),
        ),
        data: Some(app.spec.config.clone()),
        ..Default::default()
    }
}
