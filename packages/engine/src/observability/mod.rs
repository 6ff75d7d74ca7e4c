// packages/engine/src/observability/mod.rs
//! Logging and metrics setup
//!
//! Logs go through `tracing` with an `EnvFilter` (`RUST_LOG` overrides the
//! configured level). Metrics go through the `metrics` facade; installing the
//! Prometheus recorder is optional and only the binary does it.

use crate::utils::config::LoggingSettings;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Metric names emitted by the engine
pub mod metric_names {
    pub const CONTEXT_ACQUIRES: &str = "robosim_context_acquires_total";
    pub const CONTEXT_RELEASES: &str = "robosim_context_releases_total";
    pub const ACTIVATION_RETRIES: &str = "robosim_context_activation_retries_total";
    pub const CONTEXTS_IN_USE: &str = "robosim_contexts_in_use";
    pub const CONTEXT_WAIT_SECONDS: &str = "robosim_context_wait_seconds";
    pub const WORKERS_COMPLETED: &str = "robosim_workers_completed_total";
    pub const FRAMES_CAPTURED: &str = "robosim_frames_captured_total";
}

/// Install the global tracing subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| EngineError::Observability(format!("invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| EngineError::Observability(e.to_string()))
}

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::Observability(e.to_string()))
}
