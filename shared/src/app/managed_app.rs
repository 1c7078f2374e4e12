use blake2::{
    digest::{Update, VariableOutput},
    VarBlake2b,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of bytes in a spec fingerprint digest (rendered as twice as many hex characters)
pub const FINGERPRINT_BYTES: usize = 20;
/// Port exposed by the application when the spec does not set one
pub const DEFAULT_PORT: i32 = 8080;
/// Replica count used when the spec does not set one
pub const DEFAULT_REPLICAS: i32 = 1;

/// Defines the information in the ManagedApp CRD
///
/// A ManagedApp declares a deployment of an application that is rolled
/// out blue/green: every distinct spec becomes its own AppInstance with
/// its own config, workload and network endpoint.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
// group = API_NAMESPACE and version = API_VERSION
#[kube(
    group = "blueshift.dev",
    version = "v1alpha1",
    kind = "ManagedApp",
    namespaced,
    status = "ManagedAppStatus",
    shortname = "mapp"
)]
pub struct ManagedAppSpec {
    /// Container image of the application
    pub image: String,

    /// Number of workload replicas, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Port the application listens on, defaults to 8080
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Files materialized into the instance's ConfigMap, keyed by file name
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Environment variables set on the application container
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Additional namespaces in which the application launches user pods
    #[serde(default)]
    pub app_namespaces: Vec<String>,

    /// Host routed to the latest instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host: Option<String>,
}

/// One materialized version of a ManagedApp
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppInstance {
    /// Fingerprint of the spec that produced this instance
    pub spec_fingerprint: String,
    /// Whether this instance receives traffic
    #[serde(default)]
    pub is_latest: bool,
}

impl AppInstance {
    pub fn new(spec_fingerprint: &str) -> Self {
        AppInstance {
            spec_fingerprint: spec_fingerprint.to_string(),
            is_latest: false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedAppStatus {
    #[serde(default)]
    pub instances: Vec<AppInstance>,
}

impl ManagedAppStatus {
    pub fn instance_by_fingerprint(&self, spec_fingerprint: &str) -> Option<&AppInstance> {
        self.instances
            .iter()
            .find(|i| i.spec_fingerprint == spec_fingerprint)
    }

    pub fn latest_instance(&self) -> Option<&AppInstance> {
        self.instances.iter().find(|i| i.is_latest)
    }

    /// Marks the instance with the given fingerprint as latest and every
    /// other instance as not latest. Returns false, leaving the markers
    /// untouched, when no such instance exists.
    pub fn promote(&mut self, spec_fingerprint: &str) -> bool {
        if self.instance_by_fingerprint(spec_fingerprint).is_none() {
            return false;
        }
        for instance in self.instances.iter_mut() {
            instance.is_latest = instance.spec_fingerprint == spec_fingerprint;
        }
        true
    }

    /// Adds an instance unless one with the same fingerprint is already present
    pub fn add_instance(&mut self, instance: AppInstance) {
        if self
            .instance_by_fingerprint(&instance.spec_fingerprint)
            .is_none()
        {
            self.instances.push(instance);
        }
    }

    pub fn remove_instance(&mut self, spec_fingerprint: &str) {
        self.instances
            .retain(|i| i.spec_fingerprint != spec_fingerprint);
    }
}

impl ManagedApp {
    /// Stable hash of the current spec.
    ///
    /// The spec only contains ordered maps, so its JSON encoding (and with
    /// it the digest) does not depend on insertion order.
    pub fn spec_fingerprint(&self) -> anyhow::Result<String> {
        let encoded = serde_json::to_vec(&self.spec)?;
        let mut hasher = VarBlake2b::new(FINGERPRINT_BYTES)
            .map_err(|e| anyhow::anyhow!("unable to create spec hasher: {:?}", e))?;
        hasher.update(encoded);
        let mut fingerprint = String::new();
        hasher.finalize_variable(|var| {
            fingerprint = var
                .iter()
                .map(|num| format!("{:02x}", num))
                .collect::<Vec<String>>()
                .join("")
        });
        Ok(fingerprint)
    }

    pub fn instances(&self) -> &[AppInstance] {
        self.status
            .as_ref()
            .map(|s| s.instances.as_slice())
            .unwrap_or_default()
    }

    /// Membership is decided by fingerprint alone; the latest marker may
    /// have moved since `instance` was read.
    pub fn has_instance(&self, instance: &AppInstance) -> bool {
        self.instance_by_fingerprint(&instance.spec_fingerprint)
            .is_some()
    }

    pub fn instance_by_fingerprint(&self, spec_fingerprint: &str) -> Option<&AppInstance> {
        self.status
            .as_ref()
            .and_then(|s| s.instance_by_fingerprint(spec_fingerprint))
    }

    pub fn latest_instance(&self) -> Option<&AppInstance> {
        self.status.as_ref().and_then(|s| s.latest_instance())
    }

    pub fn port(&self) -> i32 {
        self.spec.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(DEFAULT_REPLICAS)
    }

    /// The application's own namespace followed by every extra namespace
    /// user pods are launched in, without duplicates.
    pub fn namespaces_of_current_instance(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.namespace().into_iter().collect();
        for ns in &self.spec.app_namespaces {
            if !namespaces.contains(ns) {
                namespaces.push(ns.clone());
            }
        }
        namespaces
    }

    /// `namespace/name`, used in logs and metric labels
    pub fn app_id(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}
