//! Read-modify-write access to the ManagedApp status subresource.
//!
//! Every write sends the resourceVersion of the object it was derived from,
//! so a concurrent edit makes the API server answer 409 Conflict instead of
//! silently losing an update. Conflicts re-run the whole read-modify-write.
use blueshift_shared::{
    app::{
        managed_app::{ManagedApp, ManagedAppStatus},
        retry::{random_delay, MAX_STATUS_UPDATE_TRIES},
    },
    k8s::{api::Api, ERROR_CONFLICT},
};
use kube::ResourceExt;
use log::{trace, warn};

use super::{ControllerError, Result};

/// Fetches the current version of a ManagedApp, None if it was deleted
pub async fn refresh_app(api: &dyn Api<ManagedApp>, app: &ManagedApp) -> Result<Option<ManagedApp>> {
    Ok(api.get(&app.name_any()).await?)
}

/// Applies `mutator` to the status of the freshest version of `app` and
/// persists it, retrying on write conflicts. Returns the persisted object.
pub async fn update_status<F>(
    api: &dyn Api<ManagedApp>,
    app: &ManagedApp,
    mutator: F,
) -> Result<ManagedApp>
where
    F: Fn(&mut ManagedAppStatus),
{
    for attempt in 1..=MAX_STATUS_UPDATE_TRIES {
        let mut fresh = refresh_app(api, app)
            .await?
            .ok_or_else(|| ControllerError::AppNotFound(app.app_id()))?;
        mutator(fresh.status.get_or_insert_with(ManagedAppStatus::default));
        match api.replace_status(&fresh).await {
            Ok(updated) => {
                trace!(
                    "update_status - updated status of {} on attempt {}",
                    app.app_id(),
                    attempt
                );
                return Ok(updated);
            }
            Err(kube::Error::Api(ae)) if ae.code == ERROR_CONFLICT => {
                warn!(
                    "update_status - conflict writing status of {} (attempt {}/{})",
                    app.app_id(),
                    attempt,
                    MAX_STATUS_UPDATE_TRIES
                );
                random_delay().await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ControllerError::StatusConflict(
        app.app_id(),
        MAX_STATUS_UPDATE_TRIES,
    ))
}
