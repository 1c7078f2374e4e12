use super::app::{managed_app::AppInstance, API_NAMESPACE};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

pub mod api;
pub mod config_map;
pub mod ingress;
pub mod replica_set;
pub mod service;

pub const ERROR_UNAUTHORIZED: u16 = 401;
pub const ERROR_FORBIDDEN: u16 = 403;
pub const ERROR_NOT_FOUND: u16 = 404;
pub const ERROR_NOT_ACCEPTABLE: u16 = 406;
pub const ERROR_CONFLICT: u16 = 409;
pub const ERROR_UNSUPPORTED_MEDIA_TYPE: u16 = 415;

/// Longest name a Service (a DNS label) may have
pub const MAX_NAME_LEN: usize = 63;

pub const CONTROLLER_LABEL_ID: &str = "controller";
/// Name of the ManagedApp a resource belongs to
pub const APP_LABEL_NAME: &str = "blueshift.dev/app";
/// Spec fingerprint of the AppInstance a resource belongs to
pub const INSTANCE_LABEL_NAME: &str = "blueshift.dev/instance";
/// Distinguishes the instance's own server pods from the user pods it launches
pub const COMPONENT_LABEL_NAME: &str = "blueshift.dev/component";
pub const COMPONENT_SERVER: &str = "server";
/// Carried by every user pod launched by an instance
pub const PROXIED_APP_LABEL_NAME: &str = "blueshift.dev/proxied-app";

/// Number of fingerprint characters used in child resource names
const NAME_FINGERPRINT_LEN: usize = 12;

/// Labels identifying the children of one AppInstance
pub fn labels_for_instance(app_name: &str, instance: &AppInstance) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL_NAME.to_string(), app_name.to_string());
    labels.insert(
        INSTANCE_LABEL_NAME.to_string(),
        instance.spec_fingerprint.clone(),
    );
    labels
}

/// Renders labels as a label selector, e.g. `a=b,c=d`
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<String>>()
        .join(",")
}

/// Label selector matching every child of one AppInstance
pub fn instance_selector(app_name: &str, instance: &AppInstance) -> String {
    label_selector(&labels_for_instance(app_name, instance))
}

/// Label selector matching the user pods launched by one AppInstance
pub fn proxied_app_selector(app_name: &str, instance: &AppInstance) -> String {
    let mut labels = labels_for_instance(app_name, instance);
    labels.insert(PROXIED_APP_LABEL_NAME.to_string(), "true".to_string());
    label_selector(&labels)
}

/// Create name for a child resource of an AppInstance. The app name part is
/// shortened so the result fits in a DNS label.
///
/// Example:
///
/// ```
/// use blueshift_shared::app::managed_app::AppInstance;
/// use blueshift_shared::k8s;
///
/// let name = k8s::create_child_name(
///     "app1",
///     &AppInstance::new("4f1c9a0e7d2b8c3a5e6f"),
///     "svc");
/// assert_eq!(name, "app1-svc-4f1c9a0e7d2b");
/// ```
pub fn create_child_name(app_name: &str, instance: &AppInstance, suffix: &str) -> String {
    let short_fingerprint: String = instance
        .spec_fingerprint
        .chars()
        .take(NAME_FINGERPRINT_LEN)
        .collect();
    let max_app_len = MAX_NAME_LEN.saturating_sub(suffix.len() + short_fingerprint.len() + 2);
    let app_part: String = app_name.chars().take(max_app_len).collect();
    let app_part = app_part.trim_end_matches(|c| c == '-' || c == '.');
    format!("{}-{}-{}", app_part, suffix, short_fingerprint)
}

/// Metadata shared by every child of an AppInstance
pub(crate) fn child_metadata(
    name: String,
    namespace: &str,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> ObjectMeta {
    let mut labels = labels;
    labels.insert(CONTROLLER_LABEL_ID.to_string(), API_NAMESPACE.to_string());
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}
