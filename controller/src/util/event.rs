//! The event queue feeding the reconcile engine.
//!
//! Watchers, the obsolete-instance ticker and the engine itself all send
//! into one bounded channel with a single consumer, so reconcile work is
//! totally ordered. A full queue suspends the sender; events are never
//! dropped.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use blueshift_shared::app::managed_app::{AppInstance, ManagedApp};
use log::{info, trace};
use tokio::sync::mpsc;

use super::stopper::Stopper;
use super::{ControllerError, Result};

pub type EventSender = mpsc::Sender<ReconcileEvent>;
pub type EventReceiver = mpsc::Receiver<ReconcileEvent>;

#[derive(Clone, Debug)]
pub enum ReconcileEvent {
    /// A ManagedApp was seen for the first time
    Added(Arc<ManagedApp>),
    /// The spec fingerprint of a known ManagedApp changed
    SpecUpdated(Arc<ManagedApp>),
    /// A ManagedApp was deleted. Its children are removed by the garbage
    /// collector through their owner references.
    Deleted(Arc<ManagedApp>),
    /// A child of the instance changed, or the instance itself did
    ReconcileRequested(Arc<ManagedApp>, AppInstance),
    /// Time to look for instances that can be removed
    CheckObsoleteInstances,
}

impl ReconcileEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileEvent::Added(_) => "added",
            ReconcileEvent::SpecUpdated(_) => "spec_updated",
            ReconcileEvent::Deleted(_) => "deleted",
            ReconcileEvent::ReconcileRequested(_, _) => "reconcile_requested",
            ReconcileEvent::CheckObsoleteInstances => "check_obsolete_instances",
        }
    }
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileEvent::Added(app)
            | ReconcileEvent::SpecUpdated(app)
            | ReconcileEvent::Deleted(app) => write!(f, "{}({})", self.kind(), app.app_id()),
            ReconcileEvent::ReconcileRequested(app, instance) => write!(
                f,
                "{}({}, {})",
                self.kind(),
                app.app_id(),
                instance.spec_fingerprint
            ),
            ReconcileEvent::CheckObsoleteInstances => f.write_str(self.kind()),
        }
    }
}

pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

pub async fn send_event(sender: &EventSender, event: ReconcileEvent) -> Result<()> {
    trace!("send_event - {}", event);
    sender
        .send(event)
        .await
        .map_err(|_| ControllerError::QueueClosed)
}

/// Enqueues a CheckObsoleteInstances event every `interval` until stopped
/// or until the queue is closed.
pub async fn schedule_obsolete_instance_checks(
    sender: EventSender,
    interval: Duration,
    stopper: Stopper,
) {
    loop {
        if send_event(&sender, ReconcileEvent::CheckObsoleteInstances)
            .await
            .is_err()
        {
            info!("schedule_obsolete_instance_checks - event queue closed");
            return;
        }
        tokio::select! {
            _ = stopper.stopped() => {
                info!("schedule_obsolete_instance_checks - stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
