//! Metrics recording implementation using Prometheus.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
    Encoder, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Trait for recording sync engine metrics.
pub trait MetricsRecorder: Clone + Send + Sync + 'static {
    /// Records a sync message. `direction` is one of sent, received, suppressed, duplicate.
    fn record_sync_message(&self, direction: &str, message_type: &str, transport: &str);

    /// Records the outcome of a call to the session or user endpoint.
    fn record_boundary_call(&self, endpoint: &str, result: &str);

    /// Records how long a boundary call took.
    fn record_boundary_duration(&self, endpoint: &str, duration_secs: f64);

    /// Records a storage operation that failed and was degraded to memory-only.
    fn record_storage_failure(&self, operation: &str);
}

/// Prometheus metrics collector. Clones share one registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    sync_messages_total: CounterVec,

    boundary_calls_total: CounterVec,
    boundary_duration_seconds: HistogramVec,

    storage_failures_total: CounterVec,
}

impl Metrics {
    /// Creates a new metrics instance with its own Prometheus registry.
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let sync_messages_total = register_counter_vec_with_registry!(
            Opts::new(
                "authsync_sync_messages_total",
                "Cross-context sync messages by direction"
            ),
            &["direction", "type", "transport"],
            registry.clone()
        )
        .expect("Failed to register authsync_sync_messages_total");

        let boundary_calls_total = register_counter_vec_with_registry!(
            Opts::new(
                "authsync_boundary_calls_total",
                "Calls to the session/user endpoints by outcome"
            ),
            &["endpoint", "result"],
            registry.clone()
        )
        .expect("Failed to register authsync_boundary_calls_total");

        let boundary_duration_seconds = register_histogram_vec_with_registry!(
            "authsync_boundary_duration_seconds",
            "Session/user endpoint latency in seconds",
            &["endpoint"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            registry.clone()
        )
        .expect("Failed to register authsync_boundary_duration_seconds");

        let storage_failures_total = register_counter_vec_with_registry!(
            Opts::new(
                "authsync_storage_failures_total",
                "Storage operations that failed and were degraded to memory-only"
            ),
            &["operation"],
            registry.clone()
        )
        .expect("Failed to register authsync_storage_failures_total");

        Metrics {
            registry,
            sync_messages_total,
            boundary_calls_total,
            boundary_duration_seconds,
            storage_failures_total,
        }
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Current value of a sync message counter, mostly for tests.
    pub fn sync_message_count(&self, direction: &str, message_type: &str, transport: &str) -> f64 {
        self.sync_messages_total
            .with_label_values(&[direction, message_type, transport])
            .get()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for Metrics {
    fn record_sync_message(&self, direction: &str, message_type: &str, transport: &str) {
        self.sync_messages_total
            .with_label_values(&[direction, message_type, transport])
            .inc();
    }

    fn record_boundary_call(&self, endpoint: &str, result: &str) {
        self.boundary_calls_total
            .with_label_values(&[endpoint, result])
            .inc();
    }

    fn record_boundary_duration(&self, endpoint: &str, duration_secs: f64) {
        self.boundary_duration_seconds
            .with_label_values(&[endpoint])
            .observe(duration_secs);
    }

    fn record_storage_failure(&self, operation: &str) {
        self.storage_failures_total
            .with_label_values(&[operation])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        let metrics = Metrics::new();
        metrics.record_boundary_call("session", "ok");
        metrics.record_storage_failure("set");
        metrics.record_sync_message("sent", "SIGN_IN", "channel");

        let text = metrics.render();
        assert!(text.contains("authsync_boundary_calls_total"));
        assert!(text.contains("operation=\"set\""));
        assert_eq!(metrics.sync_message_count("sent", "SIGN_IN", "channel"), 1.0);
    }
}
