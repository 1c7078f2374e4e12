//! Brings the children of one AppInstance into existence.
//!
//! `reconcile_instance` is a step function: every call performs the first
//! unmet step and returns. Progress resumes when the child watcher sees the
//! resource that was just created (or a ReplicaSet becoming ready) and
//! enqueues another ReconcileRequested event.
//!
//! The steps, in order:
//!
//! 1. the instance is gone from the app's status: nothing to do
//! 2. no ConfigMap: create it
//! 3. no ReplicaSet: create it
//! 4. ReplicaSet not ready: wait
//! 5. ReplicaSet ready: promote the instance if it belongs to the current
//!    spec and is not latest yet, then carry on
//! 6. no Service: create it
//! 7. everything in place: reconcile the route, register the namespaces
//!    user pods are launched in, notify the listener
use blueshift_shared::{
    app::managed_app::{AppInstance, ManagedApp},
    k8s::{
        api::Api, config_map::create_new_config_map, instance_selector,
        replica_set::{create_new_replica_set, is_ready},
        service::create_new_service,
    },
};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{api::ListParams, ResourceExt};
use log::{debug, info, trace};

use super::controller_ctx::ControllerContext;
use super::status::{refresh_app, update_status};
use super::{list_error, Result};

/// Outcome of one `reconcile_instance` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileStep {
    InstanceRemoved,
    ConfigMapCreated,
    ReplicaSetCreated,
    AwaitingReplicaSet,
    ServiceCreated,
    FullyReconciled,
}

pub async fn reconcile_instance(
    ctx: &ControllerContext,
    app: &ManagedApp,
    instance: &AppInstance,
) -> Result<ReconcileStep> {
    trace!(
        "reconcile_instance - enter {} {}",
        app.app_id(),
        instance.spec_fingerprint
    );
    let app_api: Box<dyn Api<ManagedApp>> = ctx.app_api(app);
    let app = match refresh_app(app_api.as_ref(), app).await? {
        Some(app) if app.has_instance(instance) => app,
        _ => {
            info!(
                "reconcile_instance - instance {} of {} is being deleted, skipping",
                instance.spec_fingerprint,
                app.app_id()
            );
            return Ok(ReconcileStep::InstanceRemoved);
        }
    };
    let lp = ListParams::default().labels(&instance_selector(&app.name_any(), instance));

    let config_maps: Box<dyn Api<ConfigMap>> = ctx.app_api(&app);
    if config_maps.list(&lp).await.map_err(list_error)?.items.is_empty() {
        debug!("reconcile_instance - 0 ConfigMaps found, creating ConfigMap");
        config_maps
            .create(&create_new_config_map(&app, instance))
            .await?;
        return Ok(ReconcileStep::ConfigMapCreated);
    }

    let replica_sets: Box<dyn Api<ReplicaSet>> = ctx.app_api(&app);
    let listed = replica_sets.list(&lp).await.map_err(list_error)?;
    let replica_set = match listed.items.into_iter().next() {
        Some(rs) => rs,
        None => {
            debug!("reconcile_instance - 0 ReplicaSets found, creating ReplicaSet");
            replica_sets
                .create(&create_new_replica_set(&app, instance))
                .await?;
            return Ok(ReconcileStep::ReplicaSetCreated);
        }
    };
    if !is_ready(&replica_set) {
        trace!(
            "reconcile_instance - ReplicaSet {} not ready yet",
            replica_set.name_any()
        );
        return Ok(ReconcileStep::AwaitingReplicaSet);
    }

    let app = update_latest_marker(app_api.as_ref(), app, instance).await?;

    let services: Box<dyn Api<Service>> = ctx.app_api(&app);
    if services.list(&lp).await.map_err(list_error)?.items.is_empty() {
        debug!("reconcile_instance - 0 Services found, creating Service");
        services.create(&create_new_service(&app, instance)).await?;
        return Ok(ReconcileStep::ServiceCreated);
    }

    ctx.route_reconciler.reconcile(&app).await?;
    ctx.pod_observer
        .register_namespaces(app.namespaces_of_current_instance())
        .await;
    if let Some(listener) = &ctx.reconcile_listener {
        let current = app
            .instance_by_fingerprint(&instance.spec_fingerprint)
            .cloned()
            .unwrap_or_else(|| instance.clone());
        listener.on_instance_fully_reconciled(&app, &current).await;
    }
    Ok(ReconcileStep::FullyReconciled)
}

/// Promotes `instance` once its workload is ready, unless the spec has
/// already moved on to another instance or it is latest already.
async fn update_latest_marker(
    api: &dyn Api<ManagedApp>,
    app: ManagedApp,
    instance: &AppInstance,
) -> Result<ManagedApp> {
    let fingerprint = app.spec_fingerprint()?;
    if instance.spec_fingerprint != fingerprint {
        return Ok(app);
    }
    if app
        .instance_by_fingerprint(&fingerprint)
        .map(|i| i.is_latest)
        .unwrap_or(false)
    {
        return Ok(app);
    }
    info!(
        "update_latest_marker - instance {} of {} is ready, marking it latest",
        fingerprint,
        app.app_id()
    );
    update_status(api, &app, |status| {
        status.promote(&fingerprint);
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::super::controller_ctx::MockReconcileListener;
    use super::super::shared_test_utils::config_for_tests::{
        drive_to_fully_reconciled, fake_context, fingerprint, test_app, TEST_NAMESPACE,
    };
    use super::super::shared_test_utils::fake_cluster::FakeControllerKubeClient;
    use super::*;
    use blueshift_shared::app::managed_app::ManagedAppStatus;
    use std::sync::Arc;

    fn app_with_instance(client: &FakeControllerKubeClient) -> (ManagedApp, AppInstance) {
        let mut app = test_app("app1", "img:1");
        let instance = AppInstance::new(&fingerprint(&app));
        app.status = Some(ManagedAppStatus {
            instances: vec![instance.clone()],
        });
        client.apps.insert(app.clone());
        (app, instance)
    }

    fn position(journal: &[String], prefix: &str) -> usize {
        journal
            .iter()
            .position(|entry| entry.starts_with(prefix))
            .unwrap_or_else(|| panic!("{} not in {:?}", prefix, journal))
    }

    #[tokio::test]
    async fn test_new_instance_is_promoted_once_ready() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let (app, instance) = app_with_instance(&client);
        let mut listener = MockReconcileListener::new();
        listener
            .expect_on_instance_fully_reconciled()
            .times(1)
            .withf(|_, instance| instance.is_latest)
            .returning(|_, _| ());
        let ctx = fake_context(&client).with_reconcile_listener(Arc::new(listener));

        assert_eq!(
            reconcile_instance(&ctx, &app, &instance).await.unwrap(),
            ReconcileStep::ConfigMapCreated
        );
        assert_eq!(
            reconcile_instance(&ctx, &app, &instance).await.unwrap(),
            ReconcileStep::ReplicaSetCreated
        );
        assert_eq!(
            reconcile_instance(&ctx, &app, &instance).await.unwrap(),
            ReconcileStep::AwaitingReplicaSet
        );
        assert!(!client.app("app1").instances()[0].is_latest);

        client.mark_replica_sets_ready();
        assert_eq!(
            reconcile_instance(&ctx, &app, &instance).await.unwrap(),
            ReconcileStep::ServiceCreated
        );
        assert!(client.app("app1").instances()[0].is_latest);
        assert_eq!(
            reconcile_instance(&ctx, &app, &instance).await.unwrap(),
            ReconcileStep::FullyReconciled
        );

        assert_eq!(client.config_maps.names().len(), 1);
        assert_eq!(client.replica_sets.names().len(), 1);
        assert_eq!(client.services.names().len(), 1);
        assert_eq!(client.ingresses.names(), vec!["app1".to_string()]);
    }

    #[tokio::test]
    async fn test_children_are_created_in_order() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let (app, instance) = app_with_instance(&client);
        let ctx = fake_context(&client);

        let calls = drive_to_fully_reconciled(&ctx, &client, &app, &instance).await;
        assert_eq!(calls, 5);
        let journal = client.journal();
        let config_map = position(&journal, "create ConfigMap");
        let replica_set = position(&journal, "create ReplicaSet");
        let service = position(&journal, "create Service");
        assert!(config_map < replica_set);
        assert!(replica_set < service);
    }

    #[tokio::test]
    async fn test_redundant_calls_have_no_side_effects() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let (app, instance) = app_with_instance(&client);
        let ctx = fake_context(&client);
        drive_to_fully_reconciled(&ctx, &client, &app, &instance).await;
        client.clear_journal();

        for _ in 0..3 {
            assert_eq!(
                reconcile_instance(&ctx, &app, &instance).await.unwrap(),
                ReconcileStep::FullyReconciled
            );
        }
        assert!(client
            .journal()
            .iter()
            .all(|entry| entry.starts_with("apply Ingress")));
    }

    #[tokio::test]
    async fn test_waiting_on_replica_set_has_no_side_effects() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let (app, instance) = app_with_instance(&client);
        let ctx = fake_context(&client);
        reconcile_instance(&ctx, &app, &instance).await.unwrap();
        reconcile_instance(&ctx, &app, &instance).await.unwrap();
        client.clear_journal();

        for _ in 0..3 {
            assert_eq!(
                reconcile_instance(&ctx, &app, &instance).await.unwrap(),
                ReconcileStep::AwaitingReplicaSet
            );
        }
        assert!(client.journal().is_empty());
    }

    #[tokio::test]
    async fn test_removed_instance_is_skipped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let (app, _) = app_with_instance(&client);
        let ctx = fake_context(&client);

        assert_eq!(
            reconcile_instance(&ctx, &app, &AppInstance::new("gone"))
                .await
                .unwrap(),
            ReconcileStep::InstanceRemoved
        );
        client.apps.remove("app1");
        assert_eq!(
            reconcile_instance(&ctx, &app, &AppInstance::new(&fingerprint(&app)))
                .await
                .unwrap(),
            ReconcileStep::InstanceRemoved
        );
        assert!(client.journal().is_empty());
    }

    #[tokio::test]
    async fn test_instance_of_outdated_spec_is_not_promoted() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let mut app = test_app("app1", "img:2");
        let h2 = fingerprint(&app);
        let old = AppInstance::new("h1");
        app.status = Some(ManagedAppStatus {
            instances: vec![
                old.clone(),
                AppInstance {
                    spec_fingerprint: h2.clone(),
                    is_latest: true,
                },
            ],
        });
        client.apps.insert(app.clone());
        let ctx = fake_context(&client);

        drive_to_fully_reconciled(&ctx, &client, &app, &old).await;
        let stored = client.app("app1");
        assert_eq!(stored.latest_instance().unwrap().spec_fingerprint, h2);
        assert!(!stored.instance_by_fingerprint("h1").unwrap().is_latest);
    }

    #[tokio::test]
    async fn test_namespaces_are_registered_when_fully_reconciled() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let mut app = test_app("app1", "img:1");
        app.spec.app_namespaces = vec!["team-a".to_string()];
        let instance = AppInstance::new(&fingerprint(&app));
        app.status = Some(ManagedAppStatus {
            instances: vec![instance.clone()],
        });
        client.apps.insert(app.clone());
        client.add_user_pod("p1", "team-a", "app1", &instance, "Running");
        let ctx = fake_context(&client);

        assert!(ctx.pod_observer.pods_for(&app, &instance).await.unwrap().is_empty());
        drive_to_fully_reconciled(&ctx, &client, &app, &instance).await;
        assert_eq!(ctx.pod_observer.pods_for(&app, &instance).await.unwrap().len(), 1);
        assert!(client
            .config_maps
            .objects()
            .iter()
            .all(|cm| cm.namespace().as_deref() == Some(TEST_NAMESPACE)));
    }

    #[tokio::test]
    async fn test_forbidden_create_is_fatal() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = FakeControllerKubeClient::default();
        let (app, instance) = app_with_instance(&client);
        client.config_maps.fail_with(403);
        let ctx = fake_context(&client);
        let result = reconcile_instance(&ctx, &app, &instance).await;
        assert!(matches!(result, Err(ref e) if e.is_fatal()));
    }
}
