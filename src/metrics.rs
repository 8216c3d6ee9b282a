//! Metrics and observability support for the REST gateway.
//!
//! This module provides Prometheus metrics collection for monitoring
//! instance creation and backing gRPC call performance.
//!
//! # Metrics Exposed
//!
//! - `rest_gateway_instances_created_total` - Instances created per operation
//! - `rest_gateway_backend_calls_total` - Backing calls per operation and streaming shape
//! - `rest_gateway_backend_errors_total` - Failed backing calls per operation and status code
//! - `rest_gateway_backend_duration_seconds` - Backing call latency histogram
//! - `rest_gateway_stream_messages_total` - Response stream messages received per operation
//!
//! # Example
//!
//! ```rust,no_run
//! use grpc_rest_gateway::GatewayMetrics;
//!
//! let metrics = GatewayMetrics::global();
//! println!("{}", metrics.render());
//! ```

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Instant;

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics registry for the gateway
static METRICS: Lazy<GatewayMetrics> = Lazy::new(GatewayMetrics::new);

/// Gateway metrics for Prometheus monitoring.
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Instances created by operation
    pub instances_created: IntCounterVec,
    /// Backing calls by operation and shape (unary, server_stream, ...)
    pub backend_calls: IntCounterVec,
    /// Failed backing calls by operation and gRPC code
    pub backend_errors: IntCounterVec,
    /// Backing call duration in seconds, until the last message arrived
    pub backend_duration: HistogramVec,
    /// Response stream messages by operation
    pub stream_messages: IntCounterVec,
}

impl GatewayMetrics {
    /// Create a new metrics instance with registered Prometheus metrics
    pub fn new() -> Self {
        Self {
            instances_created: register_int_counter_vec!(
                "rest_gateway_instances_created_total",
                "Total number of instances created",
                &["operation"]
            )
            .expect("metric can be created"),

            backend_calls: register_int_counter_vec!(
                "rest_gateway_backend_calls_total",
                "Total number of backing gRPC calls",
                &["operation", "shape"]
            )
            .expect("metric can be created"),

            backend_errors: register_int_counter_vec!(
                "rest_gateway_backend_errors_total",
                "Total number of failed backing gRPC calls",
                &["operation", "code"]
            )
            .expect("metric can be created"),

            backend_duration: register_histogram_vec!(
                "rest_gateway_backend_duration_seconds",
                "Backing gRPC call duration in seconds",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("metric can be created"),

            stream_messages: register_int_counter_vec!(
                "rest_gateway_stream_messages_total",
                "Total number of response stream messages received",
                &["operation"]
            )
            .expect("metric can be created"),
        }
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Self {
        &METRICS
    }

    pub fn record_instance_created(&self, operation: &str) {
        self.instances_created.with_label_values(&[operation]).inc();
    }

    pub fn record_backend_call(&self, operation: &str, shape: &str) {
        self.backend_calls
            .with_label_values(&[operation, shape])
            .inc();
    }

    pub fn record_backend_error(&self, operation: &str, code: &str) {
        self.backend_errors
            .with_label_values(&[operation, code])
            .inc();
    }

    pub fn record_backend_duration(&self, operation: &str, duration_secs: f64) {
        self.backend_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn record_stream_message(&self, operation: &str) {
        self.stream_messages.with_label_values(&[operation]).inc();
    }

    /// Instances created for one operation (for health checks / debugging)
    pub fn instances_created_for(&self, operation: &str) -> u64 {
        self.instances_created.with_label_values(&[operation]).get()
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for backing calls, records the duration when dropped
pub struct BackendTimer {
    start: Instant,
    operation: String,
    metrics: &'static GatewayMetrics,
}

impl BackendTimer {
    /// Count a new call and start timing it
    pub fn new(operation: impl Into<String>, shape: &str) -> Self {
        let operation = operation.into();
        let metrics = GatewayMetrics::global();
        metrics.record_backend_call(&operation, shape);
        Self {
            start: Instant::now(),
            operation,
            metrics,
        }
    }

    /// Record an error for this call
    pub fn record_error(&self, code: &str) {
        self.metrics.record_backend_error(&self.operation, code);
    }

    /// Count one received stream message
    pub fn record_stream_message(&self) {
        self.metrics.record_stream_message(&self.operation);
    }
}

impl Drop for BackendTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metrics
            .record_backend_duration(&self.operation, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_counter() {
        let metrics = GatewayMetrics::global();
        let before = metrics.instances_created_for("metrics.test.Create");

        metrics.record_instance_created("metrics.test.Create");
        metrics.record_instance_created("metrics.test.Create");

        assert_eq!(metrics.instances_created_for("metrics.test.Create"), before + 2);
    }

    #[test]
    fn test_metrics_render() {
        let metrics = GatewayMetrics::global();
        metrics.record_instance_created("metrics.test.Render");

        let output = metrics.render();
        assert!(output.contains("rest_gateway_instances_created_total"));
    }

    #[test]
    fn test_backend_timer() {
        let timer = BackendTimer::new("metrics.test.Timer", "server_stream");
        timer.record_stream_message();
        timer.record_error("NOT_FOUND");
        drop(timer);

        let metrics = GatewayMetrics::global();
        assert!(
            metrics
                .backend_errors
                .with_label_values(&["metrics.test.Timer", "NOT_FOUND"])
                .get()
                >= 1
        );
        assert_eq!(
            metrics
                .backend_duration
                .with_label_values(&["metrics.test.Timer"])
                .get_sample_count(),
            1
        );
    }
}
