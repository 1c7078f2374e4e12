//! Operator settings, read from the environment at start-up.
use anyhow::Context;
use blueshift_shared::{
    app::metrics::{DEFAULT_METRICS_PORT, METRICS_PORT_LABEL},
    os::env_var::EnvVarQuery,
};
use log::{info, warn};
use std::time::Duration;

pub const MODE_LABEL: &str = "BLUESHIFT_MODE";
pub const NAMESPACE_LABEL: &str = "BLUESHIFT_NAMESPACE";
pub const OBSOLETE_CHECK_INTERVAL_LABEL: &str = "BLUESHIFT_OBSOLETE_CHECK_INTERVAL_SECS";
pub const EVENT_QUEUE_CAPACITY_LABEL: &str = "BLUESHIFT_EVENT_QUEUE_CAPACITY";

pub const DEFAULT_NAMESPACE: &str = "default";
/// Length of time to sleep between obsolete instance checks
pub const DEFAULT_OBSOLETE_CHECK_INTERVAL_SECS: u64 = 3;
/// Large enough to absorb the burst of events a watcher restart produces
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 10000;

/// Scope of the resources the controller watches
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    /// ManagedApps in every namespace
    Clustered,
    /// Only ManagedApps in the operator's own namespace
    Namespaced,
}

impl Mode {
    fn parse(value: &str) -> Mode {
        match value.to_lowercase().as_str() {
            "clustered" => Mode::Clustered,
            "namespaced" => Mode::Namespaced,
            other => {
                warn!("Unknown {} {:?}, assuming clustered", MODE_LABEL, other);
                Mode::Clustered
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    pub mode: Mode,
    pub namespace: String,
    pub obsolete_check_interval: Duration,
    pub event_queue_capacity: usize,
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            mode: Mode::Clustered,
            namespace: DEFAULT_NAMESPACE.to_string(),
            obsolete_check_interval: Duration::from_secs(DEFAULT_OBSOLETE_CHECK_INTERVAL_SECS),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl OperatorConfig {
    pub fn from_env(env_var_query: &impl EnvVarQuery) -> anyhow::Result<Self> {
        let mut config = OperatorConfig::default();
        if let Ok(mode) = env_var_query.get_env_var(MODE_LABEL) {
            config.mode = Mode::parse(&mode);
        }
        if let Ok(namespace) = env_var_query.get_env_var(NAMESPACE_LABEL) {
            config.namespace = namespace;
        } else {
            info!("No namespace found via config, assuming {}", DEFAULT_NAMESPACE);
        }
        if let Ok(interval) = env_var_query.get_env_var(OBSOLETE_CHECK_INTERVAL_LABEL) {
            let secs = interval
                .parse::<u64>()
                .with_context(|| format!("invalid {}: {:?}", OBSOLETE_CHECK_INTERVAL_LABEL, interval))?;
            config.obsolete_check_interval = Duration::from_secs(secs);
        }
        if let Ok(capacity) = env_var_query.get_env_var(EVENT_QUEUE_CAPACITY_LABEL) {
            config.event_queue_capacity = capacity
                .parse::<usize>()
                .with_context(|| format!("invalid {}: {:?}", EVENT_QUEUE_CAPACITY_LABEL, capacity))?;
            if config.event_queue_capacity == 0 {
                anyhow::bail!("{} must be greater than zero", EVENT_QUEUE_CAPACITY_LABEL);
            }
        }
        if let Ok(port) = env_var_query.get_env_var(METRICS_PORT_LABEL) {
            config.metrics_port = port
                .parse::<u16>()
                .with_context(|| format!("invalid {}: {:?}", METRICS_PORT_LABEL, port))?;
        }
        info!("Running in {:?} mode, using namespace {}", config.mode, config.namespace);
        Ok(config)
    }
}
