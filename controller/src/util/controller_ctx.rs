use std::sync::Arc;

use async_trait::async_trait;
use blueshift_shared::app::managed_app::{AppInstance, ManagedApp};
use blueshift_shared::k8s::api::{Api, IntoApi};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use log::info;
use mockall::automock;

use super::config::{Mode, OperatorConfig};
use super::pod_observer::PodObserver;
use super::route::RouteReconciler;

pub trait ControllerKubeClient:
    IntoApi<ManagedApp>
    + IntoApi<ConfigMap>
    + IntoApi<ReplicaSet>
    + IntoApi<Service>
    + IntoApi<Pod>
    + IntoApi<Ingress>
{
}

impl<
        T: IntoApi<ManagedApp>
            + IntoApi<ConfigMap>
            + IntoApi<ReplicaSet>
            + IntoApi<Service>
            + IntoApi<Pod>
            + IntoApi<Ingress>,
    > ControllerKubeClient for T
{
}

/// Notified when an AppInstance has all of its children in place and ready
#[automock]
#[async_trait]
pub trait ReconcileListener: Send + Sync {
    async fn on_instance_fully_reconciled(&self, app: &ManagedApp, instance: &AppInstance);
}

/// Listener installed by the binary: logs and counts fully reconciled instances
pub struct LoggingReconcileListener;

#[async_trait]
impl ReconcileListener for LoggingReconcileListener {
    async fn on_instance_fully_reconciled(&self, app: &ManagedApp, instance: &AppInstance) {
        info!(
            "AppInstance {} of {} is fully reconciled",
            instance.spec_fingerprint,
            app.app_id()
        );
        crate::FULLY_RECONCILED_INSTANCE_METRIC
            .with_label_values(&[&app.app_id()])
            .inc();
    }
}

pub struct ControllerContext {
    /// Kubernetes client
    pub client: Arc<dyn ControllerKubeClient>,
    pub config: OperatorConfig,
    pub route_reconciler: Arc<dyn RouteReconciler>,
    pub pod_observer: Arc<dyn PodObserver>,
    pub reconcile_listener: Option<Arc<dyn ReconcileListener>>,
}

impl ControllerContext {
    pub fn new(
        client: Arc<dyn ControllerKubeClient>,
        config: OperatorConfig,
        route_reconciler: Arc<dyn RouteReconciler>,
        pod_observer: Arc<dyn PodObserver>,
    ) -> Self {
        ControllerContext {
            client,
            config,
            route_reconciler,
            pod_observer,
            reconcile_listener: None,
        }
    }

    pub fn with_reconcile_listener(mut self, listener: Arc<dyn ReconcileListener>) -> Self {
        self.reconcile_listener = Some(listener);
        self
    }

    /// Api for the namespace a ManagedApp (and all of its children) lives in
    pub fn app_api<K>(&self, app: &ManagedApp) -> Box<dyn Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Send + Sync + 'static,
        dyn ControllerKubeClient: IntoApi<K>,
    {
        self.namespaced_api(&app.namespace().unwrap_or_default())
    }

    pub fn namespaced_api<K>(&self, namespace: &str) -> Box<dyn Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Send + Sync + 'static,
        dyn ControllerKubeClient: IntoApi<K>,
    {
        IntoApi::<K>::namespaced(self.client.as_ref(), namespace)
    }

    /// Api covering every resource the controller is responsible for,
    /// depending on the mode it runs in
    pub fn scoped_api<K>(&self) -> Box<dyn Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Send + Sync + 'static,
        dyn ControllerKubeClient: IntoApi<K>,
    {
        match self.config.mode {
            Mode::Clustered => IntoApi::<K>::all(self.client.as_ref()),
            Mode::Namespaced => {
                IntoApi::<K>::namespaced(self.client.as_ref(), &self.config.namespace)
            }
        }
    }
}
