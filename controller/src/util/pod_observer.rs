use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use blueshift_shared::{
    app::managed_app::{AppInstance, ManagedApp},
    k8s::{api::IntoApi, proxied_app_selector},
};
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, ResourceExt};
use log::{info, trace};
use mockall::automock;
use tokio::sync::RwLock;

use super::{list_error, Result};

const TERMINATED_PHASES: [&str; 2] = ["Succeeded", "Failed"];

/// Tracks the user pods launched by application instances
#[automock]
#[async_trait]
pub trait PodObserver: Send + Sync {
    /// Pods launched by `instance` that have not terminated yet
    async fn pods_for(&self, app: &ManagedApp, instance: &AppInstance) -> Result<Vec<Pod>>;

    /// Extends the set of namespaces searched for user pods, on top of the
    /// namespaces the app itself targets
    async fn register_namespaces(&self, namespaces: Vec<String>);
}

pub struct KubePodObserver {
    client: Arc<dyn IntoApi<Pod>>,
    namespaces: RwLock<BTreeSet<String>>,
}

impl KubePodObserver {
    pub fn new(client: Arc<dyn IntoApi<Pod>>, operator_namespace: &str) -> Self {
        let mut namespaces = BTreeSet::new();
        namespaces.insert(operator_namespace.to_string());
        KubePodObserver {
            client,
            namespaces: RwLock::new(namespaces),
        }
    }

    pub async fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().await.iter().cloned().collect()
    }
}

fn is_running(pod: &Pod) -> bool {
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some(phase) => !TERMINATED_PHASES.contains(&phase),
        None => true,
    }
}

#[async_trait]
impl PodObserver for KubePodObserver {
    async fn pods_for(&self, app: &ManagedApp, instance: &AppInstance) -> Result<Vec<Pod>> {
        let lp = ListParams::default().labels(&proxied_app_selector(&app.name_any(), instance));
        let mut namespaces: BTreeSet<String> = self.namespaces.read().await.clone();
        namespaces.extend(app.namespaces_of_current_instance());
        let mut pods = Vec::new();
        for namespace in namespaces {
            let api = self.client.namespaced(&namespace);
            let listed = api.list(&lp).await.map_err(list_error)?;
            pods.extend(listed.items.into_iter().filter(is_running));
        }
        trace!(
            "pods_for - {} running pods for instance {} of {}",
            pods.len(),
            instance.spec_fingerprint,
            app.app_id()
        );
        Ok(pods)
    }

    async fn register_namespaces(&self, namespaces: Vec<String>) {
        let mut registered = self.namespaces.write().await;
        for namespace in namespaces {
            if registered.insert(namespace.clone()) {
                info!("register_namespaces - observing pods in {}", namespace);
            }
        }
    }
}
