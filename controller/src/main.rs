#[macro_use]
extern crate lazy_static;
mod util;

use blueshift_shared::{
    app::{managed_app::ManagedApp, metrics::run_metrics_server, API_NAMESPACE},
    os::env_var::ActualEnvVarQuery,
};
use futures::future::FutureExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use prometheus::{IntCounter, IntCounterVec};
use std::sync::Arc;
use util::{
    app_watcher::ManagedAppWatcher,
    child_watcher::ChildResourceWatcher,
    config::OperatorConfig,
    controller_ctx::{ControllerContext, LoggingReconcileListener},
    engine::ReconcileEngine,
    event::event_queue,
    pod_observer::KubePodObserver,
    route::IngressRouteReconciler,
    stopper::Stopper,
};

lazy_static! {
    // Reports the number of handled reconcile events, grouped by event kind and outcome
    pub static ref EVENT_COUNT_METRIC: IntCounterVec = prometheus::register_int_counter_vec!("blueshift_reconcile_event_count", "Blueshift Reconcile Event Count", &["kind", "outcome"]).unwrap();
    // Reports the number of AppInstances removed after draining
    pub static ref REAPED_INSTANCE_METRIC: IntCounter = prometheus::register_int_counter!("blueshift_reaped_instance_count", "Blueshift Reaped Instance Count").unwrap();
    // Reports the number of times an AppInstance was found fully reconciled, grouped by ManagedApp
    pub static ref FULLY_RECONCILED_INSTANCE_METRIC: IntCounterVec = prometheus::register_int_counter_vec!("blueshift_fully_reconciled_instance_count", "Blueshift Fully Reconciled Instance Count", &["app"]).unwrap();
}

/// This is the entry point for the controller.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    println!("{} Controller start", API_NAMESPACE);
    env_logger::try_init()?;
    log::info!("{} Controller logging started", API_NAMESPACE);

    let config = OperatorConfig::from_env(&ActualEnvVarQuery {})?;
    log::info!("{} Controller config: {:?}", API_NAMESPACE, config);
    let client = kube::Client::try_default().await?;
    let ctx = Arc::new(
        ControllerContext::new(
            Arc::new(client.clone()),
            config.clone(),
            Arc::new(IngressRouteReconciler::new(Arc::new(client.clone()))),
            Arc::new(KubePodObserver::new(
                Arc::new(client.clone()),
                &config.namespace,
            )),
        )
        .with_reconcile_listener(Arc::new(LoggingReconcileListener)),
    );
    let stopper = Stopper::new();
    let (sender, receiver) = event_queue(config.event_queue_capacity);
    let mut tasks = Vec::new();

    // Start server for prometheus metrics
    tokio::spawn(run_metrics_server(config.metrics_port));

    // Watch ManagedApps
    let app_api = ctx.scoped_api::<ManagedApp>().as_inner();
    let mut app_watcher = ManagedAppWatcher::new(sender.clone());
    tasks.push(
        tokio::spawn(stopper.make_abortable(async move { app_watcher.watch(app_api).await }))
            .boxed(),
    );

    // Watch the children of every instance
    let child_watcher = Arc::new(ChildResourceWatcher::new(ctx.clone(), sender.clone()));
    let config_maps = ctx.scoped_api::<ConfigMap>().as_inner();
    let watcher = child_watcher.clone();
    tasks.push(
        tokio::spawn(stopper.make_abortable(async move { watcher.watch(config_maps).await }))
            .boxed(),
    );
    let replica_sets = ctx.scoped_api::<ReplicaSet>().as_inner();
    let watcher = child_watcher.clone();
    tasks.push(
        tokio::spawn(stopper.make_abortable(async move { watcher.watch(replica_sets).await }))
            .boxed(),
    );
    let services = ctx.scoped_api::<Service>().as_inner();
    let watcher = child_watcher;
    tasks.push(
        tokio::spawn(stopper.make_abortable(async move { watcher.watch(services).await }))
            .boxed(),
    );

    // Consume reconcile events
    let engine = ReconcileEngine::new(ctx);
    let engine_stopper = stopper.clone();
    tasks.push(
        tokio::spawn(stopper.make_abortable(async move {
            engine.run(sender, receiver, engine_stopper).await
        }))
        .boxed(),
    );

    // The first task to finish decides the outcome; aborted means a signal was received
    let (finished, _, _) = futures::future::select_all(tasks).await;
    stopper.stop();
    match finished? {
        Err(_aborted) => {
            log::info!("{} Controller end", API_NAMESPACE);
            Ok(())
        }
        Ok(Ok(())) => {
            log::info!("{} Controller end", API_NAMESPACE);
            Ok(())
        }
        Ok(Err(e)) => {
            log::error!("{} Controller exiting on error: {}", API_NAMESPACE, e);
            std::process::exit(1)
        }
    }
}
