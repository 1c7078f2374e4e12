//! The single consumer of the event queue.
//!
//! Events are handled one at a time, so no two reconcile steps ever run
//! concurrently. A failing event is logged and dropped; the watchers and the
//! ticker re-derive the same work later. Only fatal errors stop the loop.
use std::sync::Arc;

use log::{error, info, trace, warn};

use super::controller_ctx::ControllerContext;
use super::event::{schedule_obsolete_instance_checks, EventReceiver, EventSender, ReconcileEvent};
use super::instance_reconciler::reconcile_instance;
use super::instance_version::resolve_instance;
use super::reaper::check_obsolete_instances;
use super::stopper::Stopper;
use super::Result;

const OUTCOME_OK: &str = "ok";
const OUTCOME_ERROR: &str = "error";
const OUTCOME_FATAL: &str = "fatal";

pub struct ReconcileEngine {
    ctx: Arc<ControllerContext>,
}

impl ReconcileEngine {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        ReconcileEngine { ctx }
    }

    /// Drains the queue until stopped. Also runs the ticker that enqueues
    /// CheckObsoleteInstances events, through `sender`.
    pub async fn run(
        &self,
        sender: EventSender,
        mut receiver: EventReceiver,
        stopper: Stopper,
    ) -> Result<()> {
        let ticker = tokio::spawn(schedule_obsolete_instance_checks(
            sender,
            self.ctx.config.obsolete_check_interval,
            stopper.clone(),
        ));
        let result = loop {
            if stopper.is_stopped() {
                break Ok(());
            }
            let event = tokio::select! {
                _ = stopper.stopped() => break Ok(()),
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break Ok(()),
                },
            };
            if let Err(e) = self.handle_event(event).await {
                break Err(e);
            }
        };
        ticker.abort();
        info!("run - reconcile engine stopped");
        result
    }

    /// Handles one event. Returns an error only when it is fatal.
    pub async fn handle_event(&self, event: ReconcileEvent) -> Result<()> {
        let kind = event.kind();
        let description = event.to_string();
        trace!("handle_event - {}", description);
        match self.dispatch(event).await {
            Ok(()) => {
                count_event(kind, OUTCOME_OK);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!("handle_event - fatal error handling {}: {}", description, e);
                count_event(kind, OUTCOME_FATAL);
                Err(e)
            }
            Err(e) => {
                warn!("handle_event - error handling {}: {}", description, e);
                count_event(kind, OUTCOME_ERROR);
                Ok(())
            }
        }
    }

    async fn dispatch(&self, event: ReconcileEvent) -> Result<()> {
        match event {
            ReconcileEvent::Added(app) | ReconcileEvent::SpecUpdated(app) => {
                if let Some(instance) = resolve_instance(&self.ctx, &app).await? {
                    reconcile_instance(&self.ctx, &app, &instance).await?;
                }
                Ok(())
            }
            // children are garbage collected through their owner references
            ReconcileEvent::Deleted(_) => Ok(()),
            ReconcileEvent::ReconcileRequested(app, instance) => {
                reconcile_instance(&self.ctx, &app, &instance).await?;
                Ok(())
            }
            ReconcileEvent::CheckObsoleteInstances => check_obsolete_instances(&self.ctx).await,
        }
    }
}

fn count_event(kind: &str, outcome: &str) {
    crate::EVENT_COUNT_METRIC
        .with_label_values(&[kind, outcome])
        .inc();
}
