use std::collections::HashMap;
use std::sync::Arc;

use blueshift_shared::app::managed_app::ManagedApp;
use futures::{StreamExt, TryStreamExt};
use kube::runtime::{
    watcher::{self, watcher, Event},
    WatchStreamExt,
};
use log::{error, info, trace};

use super::event::{send_event, EventSender, ReconcileEvent};
use super::{ControllerError, Result};

/// Turns changes of ManagedApp objects into reconcile events.
///
/// Status writes by the controller also show up as changes, so the watcher
/// remembers the spec fingerprint of every app it has seen and only reports
/// an update when that fingerprint changes.
pub struct ManagedAppWatcher {
    sender: EventSender,
    known_apps: HashMap<String, (String, Arc<ManagedApp>)>,
}

impl ManagedAppWatcher {
    pub fn new(sender: EventSender) -> Self {
        ManagedAppWatcher {
            sender,
            known_apps: HashMap::new(),
        }
    }

    /// This watches for ManagedApp events until the stream ends or a fatal
    /// error occurs
    pub async fn watch(&mut self, api: kube::Api<ManagedApp>) -> Result<()> {
        trace!("watch - enter");
        let mut informer = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        loop {
            let event = match informer.try_next().await {
                Err(e) => {
                    let e = ControllerError::from(e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    error!("Error during ManagedApp watch: {}", e);
                    continue;
                }
                Ok(None) => return Err(ControllerError::WatchEnded("ManagedApp")),
                Ok(Some(event)) => event,
            };
            self.handle_app_event(event).await?;
        }
    }

    async fn handle_app_event(&mut self, event: Event<ManagedApp>) -> Result<()> {
        match event {
            Event::Applied(app) => self.handle_applied(app).await,
            Event::Deleted(app) => {
                info!("handle_app_event - ManagedApp {} deleted", app.app_id());
                self.known_apps.remove(&app.app_id());
                send_event(&self.sender, ReconcileEvent::Deleted(Arc::new(app))).await
            }
            Event::Restarted(apps) => {
                info!(
                    "handle_app_event - ManagedApp watcher [re]started with {} apps",
                    apps.len()
                );
                let listed: Vec<String> = apps.iter().map(|app| app.app_id()).collect();
                let vanished: Vec<String> = self
                    .known_apps
                    .keys()
                    .filter(|id| !listed.contains(id))
                    .cloned()
                    .collect();
                for id in vanished {
                    if let Some((_, app)) = self.known_apps.remove(&id) {
                        info!("handle_app_event - ManagedApp {} deleted while not watching", id);
                        send_event(&self.sender, ReconcileEvent::Deleted(app)).await?;
                    }
                }
                for app in apps {
                    self.handle_applied(app).await?;
                }
                Ok(())
            }
        }
    }

    async fn handle_applied(&mut self, app: ManagedApp) -> Result<()> {
        let fingerprint = app.spec_fingerprint()?;
        let app = Arc::new(app);
        let event = match self
            .known_apps
            .insert(app.app_id(), (fingerprint.clone(), app.clone()))
        {
            None => Some(ReconcileEvent::Added(app)),
            Some((previous, _)) if previous != fingerprint => Some(ReconcileEvent::SpecUpdated(app)),
            Some(_) => None,
        };
        match event {
            Some(event) => {
                info!("handle_applied - {}", event);
                send_event(&self.sender, event).await
            }
            None => {
                trace!("handle_applied - spec unchanged");
                Ok(())
            }
        }
    }
}
