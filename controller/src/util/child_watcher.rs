use std::fmt::Debug;
use std::sync::Arc;

use blueshift_shared::{
    app::managed_app::ManagedApp,
    k8s::{api::Api, APP_LABEL_NAME, INSTANCE_LABEL_NAME},
};
use futures::{StreamExt, TryStreamExt};
use kube::runtime::{
    watcher::{self, watcher, Event},
    WatchStreamExt,
};
use kube::{Resource, ResourceExt};
use log::{error, trace, warn};
use serde::de::DeserializeOwned;

use super::controller_ctx::ControllerContext;
use super::event::{send_event, EventSender, ReconcileEvent};
use super::{ControllerError, Result};

/// Re-enters the instance reconciler whenever one of an instance's children
/// (ConfigMap, ReplicaSet, Service) is created, changed or deleted
pub struct ChildResourceWatcher {
    ctx: Arc<ControllerContext>,
    sender: EventSender,
}

impl ChildResourceWatcher {
    pub fn new(ctx: Arc<ControllerContext>, sender: EventSender) -> Self {
        ChildResourceWatcher { ctx, sender }
    }

    /// This watches every resource of kind `K` carrying the app label
    pub async fn watch<K>(&self, api: kube::Api<K>) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let kind = K::kind(&());
        trace!("watch - enter [kind: {}]", kind);
        let mut informer = watcher(api, watcher::Config::default().labels(APP_LABEL_NAME))
            .default_backoff()
            .boxed();
        loop {
            let event = match informer.try_next().await {
                Err(e) => {
                    let e = ControllerError::from(e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    error!("Error during {} watch: {}", kind, e);
                    continue;
                }
                Ok(None) => return Err(ControllerError::WatchEnded("child resource")),
                Ok(Some(event)) => event,
            };
            let children = match event {
                Event::Applied(child) | Event::Deleted(child) => vec![child],
                Event::Restarted(children) => children,
            };
            for child in children {
                if let Err(e) = self.handle_child(&child).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("watch - unable to handle {} {}: {}", kind, child.name_any(), e);
                }
            }
        }
    }

    /// Enqueues a ReconcileRequested event for the instance owning `child`,
    /// provided the app and the instance still exist
    pub async fn handle_child<K: Resource>(&self, child: &K) -> Result<()> {
        let labels = child.labels();
        let (app_name, fingerprint) = match (
            labels.get(APP_LABEL_NAME),
            labels.get(INSTANCE_LABEL_NAME),
        ) {
            (Some(app_name), Some(fingerprint)) => (app_name, fingerprint),
            _ => return Ok(()),
        };
        let api: Box<dyn Api<ManagedApp>> = self
            .ctx
            .namespaced_api(&child.namespace().unwrap_or_default());
        let app = match api.get(app_name).await? {
            Some(app) => app,
            None => {
                trace!("handle_child - no ManagedApp {} for {}", app_name, child.name_any());
                return Ok(());
            }
        };
        let instance = match app.instance_by_fingerprint(fingerprint) {
            Some(instance) => instance.clone(),
            None => {
                trace!(
                    "handle_child - {} has no instance {}",
                    app.app_id(),
                    fingerprint
                );
                return Ok(());
            }
        };
        send_event(
            &self.sender,
            ReconcileEvent::ReconcileRequested(Arc::new(app), instance),
        )
        .await
    }
}
