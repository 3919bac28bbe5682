use crate::error::{Result, ThrottleError};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ThrottleError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "throttle_decisions_total",
            "Total number of admission decisions, by profile and outcome"
        );
        describe_histogram!(
            "throttle_smoothing_delay_seconds",
            "Artificial delay applied to admitted requests of smoothing profiles"
        );
        describe_counter!(
            "throttle_degraded_decisions_total",
            "Decisions taken by the fail policy while the counter store was unavailable"
        );
        describe_counter!(
            "throttle_store_errors_total",
            "Total number of failed counter store calls"
        );
        describe_histogram!(
            "throttle_store_duration_seconds",
            "Counter store call latencies in seconds"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record an admission decision
pub fn record_decision(profile: &str, outcome: &'static str, delay_secs: f64) {
    let labels = [("profile", profile.to_string()), ("outcome", outcome.to_string())];
    counter!("throttle_decisions_total", &labels).increment(1);

    if delay_secs > 0.0 {
        let labels = [("profile", profile.to_string())];
        histogram!("throttle_smoothing_delay_seconds", &labels).record(delay_secs);
    }
}

/// Record a decision taken by the fail policy
pub fn record_degraded(profile: &str, policy: &'static str) {
    let labels = [("profile", profile.to_string()), ("policy", policy.to_string())];
    counter!("throttle_degraded_decisions_total", &labels).increment(1);
}

/// Record a failed counter store call
pub fn record_store_error(operation: &'static str) {
    let labels = [("operation", operation.to_string())];
    counter!("throttle_store_errors_total", &labels).increment(1);
}

/// Record counter store call latency
pub fn record_store_latency(operation: &'static str, duration: f64) {
    let labels = [("operation", operation.to_string())];
    histogram!("throttle_store_duration_seconds", &labels).record(duration);
}
