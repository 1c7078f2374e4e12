//! Removes instances that no longer serve anyone.
//!
//! An instance is obsolete when it is not latest, does not belong to the
//! app's current spec, and none of the user pods it launched are still
//! running. Instances with running pods are left alone until they drain.
use blueshift_shared::{
    app::managed_app::{AppInstance, ManagedApp},
    k8s::{api::Api, instance_selector, ERROR_NOT_FOUND},
};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{api::ListParams, Resource, ResourceExt};
use log::{info, trace, warn};

use super::controller_ctx::ControllerContext;
use super::status::update_status;
use super::{list_error, Result};

/// Scans every ManagedApp in scope and deletes its obsolete instances
pub async fn check_obsolete_instances(ctx: &ControllerContext) -> Result<()> {
    trace!("check_obsolete_instances - enter");
    let api: Box<dyn Api<ManagedApp>> = ctx.scoped_api();
    let apps = api.list(&ListParams::default()).await.map_err(list_error)?;
    for app in apps.items {
        if app.instances().len() <= 1 {
            continue;
        }
        if let Err(e) = reap_app(ctx, &app).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(
                "check_obsolete_instances - failed for {}: {}",
                app.app_id(),
                e
            );
        }
    }
    Ok(())
}

async fn reap_app(ctx: &ControllerContext, app: &ManagedApp) -> Result<()> {
    let current = app.spec_fingerprint()?;
    for instance in app.instances().to_vec() {
        if instance.is_latest || instance.spec_fingerprint == current {
            // the latest or the soon to be latest instance
            continue;
        }
        let pods = ctx.pod_observer.pods_for(app, &instance).await?;
        if !pods.is_empty() {
            trace!(
                "reap_app - instance {} of {} has {} running pods, keeping it",
                instance.spec_fingerprint,
                app.app_id(),
                pods.len()
            );
            continue;
        }
        info!(
            "reap_app - instance {} of {} has no running pods and is not latest, removing it",
            instance.spec_fingerprint,
            app.app_id()
        );
        delete_instance(ctx, app, &instance).await?;
        let api: Box<dyn Api<ManagedApp>> = ctx.app_api(app);
        update_status(api.as_ref(), app, |status| {
            status.remove_instance(&instance.spec_fingerprint)
        })
        .await?;
        crate::REAPED_INSTANCE_METRIC.inc();
    }
    Ok(())
}

/// Deletes the Service, ReplicaSet and ConfigMap of an instance, in that order
async fn delete_instance(
    ctx: &ControllerContext,
    app: &ManagedApp,
    instance: &AppInstance,
) -> Result<()> {
    let lp = ListParams::default().labels(&instance_selector(&app.name_any(), instance));
    let services: Box<dyn Api<Service>> = ctx.app_api(app);
    delete_children(services.as_ref(), &lp).await?;
    let replica_sets: Box<dyn Api<ReplicaSet>> = ctx.app_api(app);
    delete_children(replica_sets.as_ref(), &lp).await?;
    let config_maps: Box<dyn Api<ConfigMap>> = ctx.app_api(app);
    delete_children(config_maps.as_ref(), &lp).await
}

async fn delete_children<K>(api: &dyn Api<K>, lp: &ListParams) -> Result<()>
where
    K: Resource + Clone + Send + Sync,
{
    for child in api.list(lp).await.map_err(list_error)?.items {
        match api.delete(&child.name_any()).await {
            Ok(_) => trace!("delete_children - deleted {}", child.name_any()),
            Err(kube::Error::Api(ae)) if ae.code == ERROR_NOT_FOUND => {
                trace!("delete_children - {} already gone", child.name_any())
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::config::OperatorConfig;
    use super::super::controller_ctx::ControllerContext;
    use super::super::instance_version::resolve_instance;
    use super::super::pod_observer::MockPodObserver;
    use super::super::route::MockRouteReconciler;
    use super::super::shared_test_utils::config_for_tests::{
        drive_to_fully_reconciled, fake_context, fingerprint, test_app, TEST_NAMESPACE,
    };
    use super::super::shared_test_utils::fake_cluster::FakeControllerKubeClient;
    use super::*;
    use std::sync::Arc;

    /// app1 deployed at img:1, its instance fully reconciled and serving a user pod
    async fn deployed_app(
        ctx: &ControllerContext,
        client: &FakeControllerKubeClient,
    ) -> (ManagedApp, AppInstance) {
        let app = test_app("app1", "img:1");
        client.apps.insert(app.clone());
        let h1 = resolve_instance(ctx, &app).await.unwrap().unwrap();
        drive_to_fully_reconciled(ctx, client, &app, &h1).await;
        client.add_user_pod("user-1", TEST_NAMESPACE, "app1", &h1, "Running");
        (client.app("app1"), h1)
    }

    /// Rolls app1 out to img:2 and drives the new instance to latest
    async fn roll_out(
        ctx: &ControllerContext,
        client: &FakeControllerKubeClient,
    ) -> AppInstance {
        let app = client.update_app_spec("app1", |spec| spec.image = "img:2".to_string());
        let h2 = resolve_instance(ctx, &app).await.unwrap().unwrap();
        drive_to_fully_reconciled(ctx, client, &app, &h2).await;
        h2
    }

    #[tokio::test]
    async fn test_draining_instance_is_kept() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let ctx = fake_context(&client);
        let (_, h1) = deployed_app(&ctx, &client).await;

        let app = client.update_app_spec("app1", |spec| spec.image = "img:2".to_string());
        let h2 = resolve_instance(&ctx, &app).await.unwrap().unwrap();
        let stored = client.app("app1");
        assert_eq!(stored.instances().len(), 2);
        assert!(stored.instance_by_fingerprint(&h1.spec_fingerprint).unwrap().is_latest);
        assert!(!h2.is_latest);

        check_obsolete_instances(&ctx).await.unwrap();
        assert_eq!(client.app("app1").instances().len(), 2);

        drive_to_fully_reconciled(&ctx, &client, &app, &h2).await;
        let stored = client.app("app1");
        assert!(!stored.instance_by_fingerprint(&h1.spec_fingerprint).unwrap().is_latest);
        assert!(stored.instance_by_fingerprint(&h2.spec_fingerprint).unwrap().is_latest);

        for _ in 0..3 {
            check_obsolete_instances(&ctx).await.unwrap();
        }
        assert_eq!(client.app("app1").instances().len(), 2);
        assert_eq!(client.config_maps.names().len(), 2);
        assert_eq!(client.replica_sets.names().len(), 2);
        assert_eq!(client.services.names().len(), 2);
    }

    #[tokio::test]
    async fn test_drained_instance_is_deleted() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let ctx = fake_context(&client);
        let (_, h1) = deployed_app(&ctx, &client).await;
        let h2 = roll_out(&ctx, &client).await;

        client.pods.remove("user-1");
        client.clear_journal();
        check_obsolete_instances(&ctx).await.unwrap();

        let stored = client.app("app1");
        assert_eq!(
            stored.instances(),
            &[AppInstance {
                spec_fingerprint: h2.spec_fingerprint.clone(),
                is_latest: true
            }]
        );
        let short_h1: String = h1.spec_fingerprint.chars().take(12).collect();
        let deletes: Vec<String> = client
            .journal()
            .into_iter()
            .filter(|entry| entry.starts_with("delete"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                format!("delete Service app1-svc-{}", short_h1),
                format!("delete ReplicaSet app1-rs-{}", short_h1),
                format!("delete ConfigMap app1-cm-{}", short_h1),
            ]
        );
        assert_eq!(client.services.names().len(), 1);
        assert_eq!(client.replica_sets.names().len(), 1);
        assert_eq!(client.config_maps.names().len(), 1);
    }

    #[tokio::test]
    async fn test_terminated_pods_do_not_block_deletion() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let ctx = fake_context(&client);
        let (_, h1) = deployed_app(&ctx, &client).await;
        roll_out(&ctx, &client).await;

        client.add_user_pod("user-2", TEST_NAMESPACE, "app1", &h1, "Succeeded");
        client.pods.remove("user-1");
        check_obsolete_instances(&ctx).await.unwrap();
        assert_eq!(client.app("app1").instances().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_keeps_children_and_drains_newer_instance() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let ctx = fake_context(&client);
        let (_, h1) = deployed_app(&ctx, &client).await;
        let h2 = roll_out(&ctx, &client).await;
        client.add_user_pod("user-2", TEST_NAMESPACE, "app1", &h2, "Running");
        client.clear_journal();

        let app = client.update_app_spec("app1", |spec| spec.image = "img:1".to_string());
        let resolved = resolve_instance(&ctx, &app).await.unwrap().unwrap();
        assert_eq!(resolved.spec_fingerprint, h1.spec_fingerprint);
        assert!(resolved.is_latest);
        drive_to_fully_reconciled(&ctx, &client, &app, &resolved).await;
        assert!(!client
            .journal()
            .iter()
            .any(|entry| entry.starts_with("create")));

        let stored = client.app("app1");
        assert_eq!(stored.latest_instance().unwrap().spec_fingerprint, h1.spec_fingerprint);
        assert!(!stored.instance_by_fingerprint(&h2.spec_fingerprint).unwrap().is_latest);

        check_obsolete_instances(&ctx).await.unwrap();
        assert_eq!(client.app("app1").instances().len(), 2);

        client.pods.remove("user-2");
        check_obsolete_instances(&ctx).await.unwrap();
        let stored = client.app("app1");
        assert_eq!(stored.instances().len(), 1);
        assert_eq!(stored.instances()[0].spec_fingerprint, h1.spec_fingerprint);
    }

    #[tokio::test]
    async fn test_first_pass_after_start_keeps_draining_instance() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        // nothing has reached the fully reconciled step in this process yet
        let ctx = fake_context(&client);
        assert_ne!(ctx.config.namespace, TEST_NAMESPACE);

        let old = AppInstance::new(&fingerprint(&test_app("app1", "img:1")));
        let mut app = test_app("app1", "img:2");
        let mut current = AppInstance::new(&fingerprint(&app));
        current.is_latest = true;
        app.status = Some(blueshift_shared::app::managed_app::ManagedAppStatus {
            instances: vec![old.clone(), current.clone()],
        });
        client.apps.insert(app);
        client.add_user_pod("user-1", TEST_NAMESPACE, "app1", &old, "Running");

        check_obsolete_instances(&ctx).await.unwrap();
        assert_eq!(client.app("app1").instances().len(), 2);

        client.pods.remove("user-1");
        check_obsolete_instances(&ctx).await.unwrap();
        assert_eq!(client.app("app1").instances(), &[current]);
    }

    #[tokio::test]
    async fn test_missing_app_collection_is_fatal() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        client.apps.fail_with(404);
        let result = check_obsolete_instances(&fake_context(&client)).await;
        assert!(matches!(result, Err(ref e) if e.is_fatal()));
    }

    #[tokio::test]
    async fn test_apps_with_single_instance_are_not_inspected() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let mut app = test_app("app1", "img:1");
        app.status = Some(blueshift_shared::app::managed_app::ManagedAppStatus {
            instances: vec![AppInstance::new("h-old")],
        });
        client.apps.insert(app);
        let mut pod_observer = MockPodObserver::new();
        pod_observer.expect_pods_for().never();
        let ctx = ControllerContext::new(
            Arc::new(client.clone()),
            OperatorConfig::default(),
            Arc::new(MockRouteReconciler::new()),
            Arc::new(pod_observer),
        );
        check_obsolete_instances(&ctx).await.unwrap();
        assert_eq!(client.app("app1").instances().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_pass() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let mut app = test_app("app1", "img:1");
        app.status = Some(blueshift_shared::app::managed_app::ManagedAppStatus {
            instances: vec![AppInstance::new("h-old"), AppInstance::new("h-older")],
        });
        client.apps.insert(app);
        client.pods.fail_with(401);
        let ctx = fake_context(&client);
        let result = check_obsolete_instances(&ctx).await;
        assert!(matches!(result, Err(ref e) if e.is_fatal()));

        client.pods.fail_with(500);
        check_obsolete_instances(&ctx).await.unwrap();
    }
}
