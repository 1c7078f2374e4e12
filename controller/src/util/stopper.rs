use std::sync::Arc;

use futures::stream::{AbortHandle, Abortable};
use log::{info, warn};
use tokio::{signal::unix::SignalKind, sync::watch};

/// Cooperative cancellation shared by the engine, the ticker and the watchers.
/// Trips on SIGTERM or SIGINT, or when `stop` is called.
#[derive(Clone)]
pub struct Stopper {
    state: Arc<watch::Sender<bool>>,
}

impl Stopper {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        let s = Self {
            state: Arc::new(state),
        };
        let local_s = s.clone();
        tokio::spawn(async move {
            let mut terminate = match tokio::signal::unix::signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Stopper - unable to listen for SIGTERM: {:?}", e);
                    return;
                }
            };
            tokio::select! {
                _ = local_s.stopped() => {},
                _ = terminate.recv() => {
                    info!("Received SIGTERM, starting shutdown");
                    local_s.stop()
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, starting shutdown");
                    local_s.stop()
                },
            }
        });
        s
    }

    pub fn stop(&self) {
        self.state.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.borrow()
    }

    pub async fn stopped(&self) {
        let mut r = self.state.subscribe();
        if !*r.borrow_and_update() {
            let _ = r.changed().await;
        }
    }

    pub fn make_abortable<T>(&self, inner: T) -> Abortable<T> {
        let (handle, reg) = AbortHandle::new_pair();
        let local_self = self.clone();
        tokio::spawn(async move {
            local_self.stopped().await;
            handle.abort();
        });
        Abortable::new(inner, reg)
    }
}
