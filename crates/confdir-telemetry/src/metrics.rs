//! Prometheus metrics for confdir.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `confdir_reloads_total` | Counter | `result` | Reloads by outcome (`changed`, `unchanged`) |
//! | `confdir_reload_duration_seconds` | Histogram | - | Time spent scanning and notifying |
//! | `confdir_reload_changed_files` | Histogram | - | Files changed per reload |
//! | `confdir_reloadable_failures_total` | Counter | `reloadable` | Consumers that failed to reload |
//! | `confdir_properties` | Gauge | - | Properties in the current index |
//!
//! The recording functions are no-ops until a recorder is installed with
//! [`init_metrics`].

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Reload counter.
pub const RELOADS_TOTAL: &str = "confdir_reloads_total";
/// Reload duration histogram.
pub const RELOAD_DURATION_SECONDS: &str = "confdir_reload_duration_seconds";
/// Changed files per reload.
pub const RELOAD_CHANGED_FILES: &str = "confdir_reload_changed_files";
/// Failed reloadable notifications.
pub const RELOADABLE_FAILURES_TOTAL: &str = "confdir_reloadable_failures_total";
/// Property count gauge.
pub const PROPERTIES: &str = "confdir_properties";

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:9464".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparseable address and
/// `TelemetryError::MetricsInit` if the exporter cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(RELOADS_TOTAL, "Configuration reloads by outcome");
    describe_histogram!(
        RELOAD_DURATION_SECONDS,
        "Time spent rescanning configuration and notifying consumers"
    );
    describe_histogram!(RELOAD_CHANGED_FILES, "Configuration files changed per reload");
    describe_counter!(
        RELOADABLE_FAILURES_TOTAL,
        "Reloadable consumers that failed to apply a reload"
    );
    describe_gauge!(PROPERTIES, "Properties in the current configuration index");
}

/// Records a finished reload.
pub fn record_reload(changed_files: usize, duration: Duration) {
    let result = if changed_files == 0 { "unchanged" } else { "changed" };
    counter!(RELOADS_TOTAL, "result" => result).increment(1);
    histogram!(RELOAD_DURATION_SECONDS).record(duration.as_secs_f64());
    histogram!(RELOAD_CHANGED_FILES).record(changed_files as f64);
}

/// Records a consumer whose reload failed.
pub fn record_reloadable_failure(reloadable: &str) {
    counter!(RELOADABLE_FAILURES_TOTAL, "reloadable" => reloadable.to_string()).increment(1);
}

/// Records the size of the current index.
pub fn record_property_count(count: usize) {
    gauge!(PROPERTIES).set(count as f64);
}
