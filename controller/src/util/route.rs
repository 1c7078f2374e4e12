use std::sync::Arc;

use async_trait::async_trait;
use blueshift_shared::{
    app::{managed_app::ManagedApp, FIELD_MANAGER},
    k8s::{api::IntoApi, ingress::create_ingress_for_instance},
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use log::{info, trace};
use mockall::automock;

use super::Result;

/// Points an application's external route at its latest instance
#[automock]
#[async_trait]
pub trait RouteReconciler: Send + Sync {
    /// Idempotent, safe to call redundantly
    async fn reconcile(&self, app: &ManagedApp) -> Result<()>;
}

pub struct IngressRouteReconciler {
    client: Arc<dyn IntoApi<Ingress>>,
}

impl IngressRouteReconciler {
    pub fn new(client: Arc<dyn IntoApi<Ingress>>) -> Self {
        IngressRouteReconciler { client }
    }
}

#[async_trait]
impl RouteReconciler for IngressRouteReconciler {
    async fn reconcile(&self, app: &ManagedApp) -> Result<()> {
        let latest = match app.latest_instance() {
            Some(latest) => latest,
            None => {
                trace!("reconcile - {} has no latest instance yet", app.app_id());
                return Ok(());
            }
        };
        let ingress = create_ingress_for_instance(app, latest);
        let api = self.client.namespaced(&app.namespace().unwrap_or_default());
        api.apply(ingress, FIELD_MANAGER).await?;
        info!(
            "reconcile - routed {} to instance {}",
            app.app_id(),
            latest.spec_fingerprint
        );
        Ok(())
    }
}
