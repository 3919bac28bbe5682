use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use tracing::{info, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::error::{Result, ThrottleError};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_FILTER: &str = "api_throttle=debug,tower_http=debug";

/// Configuration for OpenTelemetry tracing
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: String,
    /// Service name for traces
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Sample rate (0.0 to 1.0)
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "api-throttle".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            sample_rate: 1.0,
        }
    }
}

/// Install the OTLP pipeline and return its tracer
pub fn init_telemetry(config: TracingConfig) -> Result<opentelemetry_sdk::trace::Tracer> {
    info!(
        endpoint = %config.otlp_endpoint,
        service = %config.service_name,
        version = %config.service_version,
        "Initializing OpenTelemetry tracing"
    );

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&config.otlp_endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", config.service_name.clone()),
                    KeyValue::new("service.version", config.service_version.clone()),
                ])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| ThrottleError::Internal(format!("Failed to install tracer: {}", e)))
}

/// Initialize tracing with optional OpenTelemetry export
pub fn init_tracing(otel_config: Option<TracingConfig>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    match otel_config {
        Some(config) => {
            let tracer = init_telemetry(config)?;
            tracing_subscriber::registry()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false).compact())
                .init();

            info!("Tracing initialized with OpenTelemetry support");
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false).compact())
                .init();

            info!("Tracing initialized without OpenTelemetry");
        }
    }

    Ok(())
}

/// Flush and shut down OpenTelemetry
pub fn shutdown_telemetry() {
    info!("Shutting down OpenTelemetry");
    global::shutdown_tracer_provider();
}

/// Request ID extension type
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Middleware to attach a request ID to requests and responses
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", request_id.as_str());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
