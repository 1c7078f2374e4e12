use log::info;
use prometheus::Encoder;
use warp::{Filter, Rejection, Reply};

/// Environment variable name for setting metrics port
pub const METRICS_PORT_LABEL: &str = "METRICS_PORT";
/// Port used when METRICS_PORT is not set
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Reports the controller's custom Prometheus metrics along with
/// process metrics such as process_cpu_seconds_total, process_open_fds, etc, which are added by
/// default to the default Prometheus registry.
/// See https://prometheus.io/docs/instrumenting/writing_clientlibs/#process-metrics
/// for the entire list of default process metrics.
async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::error!("metrics_handler - unable to encode metrics: {:?}", e);
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Serves prometheus metrics over a web service at /metrics
pub async fn run_metrics_server(port: u16) {
    info!("starting metrics server on port {} at /metrics", port);
    let metrics_route = warp::path!("metrics").and_then(metrics_handler);
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}
