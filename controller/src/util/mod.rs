pub mod app_watcher;
pub mod child_watcher;
pub mod config;
pub(crate) mod controller_ctx;
pub mod engine;
pub mod event;
pub mod instance_reconciler;
pub mod instance_version;
pub mod pod_observer;
pub mod reaper;
pub mod route;
pub mod status;
pub mod stopper;

use blueshift_shared::k8s::{
    ERROR_FORBIDDEN, ERROR_NOT_ACCEPTABLE, ERROR_NOT_FOUND, ERROR_UNAUTHORIZED,
    ERROR_UNSUPPORTED_MEDIA_TYPE,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    KubeError(#[from] kube::Error),

    #[error("Watcher Error: {0}")]
    WatcherError(#[from] kube::runtime::watcher::Error),

    #[error("Resource collection is not served: {0}")]
    CollectionNotServed(#[source] kube::Error),

    #[error("Status of {0} still conflicting after {1} update attempts")]
    StatusConflict(String, u8),

    #[error("ManagedApp {0} no longer exists")]
    AppNotFound(String),

    #[error("Watch stream for {0} ended")]
    WatchEnded(&'static str),

    #[error("Event queue closed")]
    QueueClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ControllerError {
    /// Fatal errors mean the client can no longer be trusted (bad credentials,
    /// missing permissions) or does not speak the server's API. They are not
    /// retried; the process exits and relies on its supervisor for a clean
    /// restart.
    pub fn is_fatal(&self) -> bool {
        match self {
            ControllerError::KubeError(e) => is_fatal_kube_error(e),
            ControllerError::CollectionNotServed(_) => true,
            ControllerError::WatcherError(e) => match e {
                kube::runtime::watcher::Error::InitialListFailed(e)
                | kube::runtime::watcher::Error::WatchStartFailed(e)
                | kube::runtime::watcher::Error::WatchFailed(e) => {
                    is_fatal_kube_error(e) || is_not_found(e)
                }
                kube::runtime::watcher::Error::WatchError(ae) => {
                    is_fatal_status(ae.code) || ae.code == ERROR_NOT_FOUND
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Maps the failure of a collection list. A 404 there means the resource
/// type itself is missing, unlike a 404 for a single named object.
pub(crate) fn list_error(e: kube::Error) -> ControllerError {
    if is_not_found(&e) {
        ControllerError::CollectionNotServed(e)
    } else {
        ControllerError::KubeError(e)
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == ERROR_NOT_FOUND)
}

fn is_fatal_kube_error(e: &kube::Error) -> bool {
    match e {
        kube::Error::Api(ae) => is_fatal_status(ae.code),
        kube::Error::Auth(_) | kube::Error::SerdeError(_) => true,
        _ => false,
    }
}

fn is_fatal_status(code: u16) -> bool {
    matches!(
        code,
        ERROR_UNAUTHORIZED | ERROR_FORBIDDEN | ERROR_NOT_ACCEPTABLE | ERROR_UNSUPPORTED_MEDIA_TYPE
    )
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
