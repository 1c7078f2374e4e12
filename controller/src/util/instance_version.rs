//! Decides which AppInstance a ManagedApp's current spec maps to.
//!
//! A spec that was never seen before gets a new instance, which is not
//! latest until its workload is ready. A spec matching an older instance
//! is a rollback: that instance is promoted right away, since its children
//! are already in place.
use blueshift_shared::{
    app::managed_app::{AppInstance, ManagedApp},
    k8s::api::Api,
};
use log::{info, trace};

use super::controller_ctx::ControllerContext;
use super::status::{refresh_app, update_status};
use super::Result;

/// Returns the instance for the app's current spec, creating or promoting
/// it as needed. Returns None when the app no longer exists.
pub async fn resolve_instance(
    ctx: &ControllerContext,
    app: &ManagedApp,
) -> Result<Option<AppInstance>> {
    let api: Box<dyn Api<ManagedApp>> = ctx.app_api(app);
    let app = match refresh_app(api.as_ref(), app).await? {
        Some(app) => app,
        None => {
            trace!("resolve_instance - {} is gone", app.app_id());
            return Ok(None);
        }
    };
    let fingerprint = app.spec_fingerprint()?;

    match app.instance_by_fingerprint(&fingerprint) {
        Some(instance) if instance.is_latest => {
            trace!(
                "resolve_instance - {} already at latest instance {}",
                app.app_id(),
                fingerprint
            );
            Ok(Some(instance.clone()))
        }
        Some(_) => {
            info!(
                "resolve_instance - {} rolled back to instance {}, promoting it",
                app.app_id(),
                fingerprint
            );
            let updated = update_status(api.as_ref(), &app, |status| {
                status.promote(&fingerprint);
            })
            .await?;
            ctx.route_reconciler.reconcile(&updated).await?;
            Ok(Some(AppInstance {
                spec_fingerprint: fingerprint,
                is_latest: true,
            }))
        }
        None => {
            info!(
                "resolve_instance - creating instance {} for {}",
                fingerprint,
                app.app_id()
            );
            let instance = AppInstance::new(&fingerprint);
            update_status(api.as_ref(), &app, |status| {
                status.add_instance(instance.clone())
            })
            .await?;
            Ok(Some(instance))
        }
    }
}
