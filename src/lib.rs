pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;

use crate::api::ApiState;
use crate::config::ThrottleConfig;
use crate::error::{Result, ThrottleError};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{
    AdmissionMiddleware, AdmissionService, ClientIpResolver, ConsumptionEngine, CounterStore,
    FailPolicy, InMemoryCounterStore, PrefixClassifier, RedisCounterStore,
};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Connect the counter store.
///
/// An unreachable store is fatal unless the fail policy is `open`.
pub async fn connect_store(config: &ThrottleConfig) -> Result<Arc<dyn CounterStore>> {
    let store = &config.store;

    let Some(url) = store.connection_url() else {
        warn!("No counter store URL configured, limits are enforced per process");
        let memory = Arc::new(InMemoryCounterStore::new());
        spawn_purge_task(memory.clone());
        return Ok(memory);
    };

    match RedisCounterStore::connect(&url, store.op_timeout(), store.connect_timeout()).await {
        Ok(redis) => Ok(Arc::new(redis)),
        Err(e) if store.fail_policy == FailPolicy::Open => {
            error!(
                error = %e,
                "Counter store unreachable at startup, continuing in fail-open mode"
            );
            Ok(Arc::new(RedisCounterStore::new(&url, store.op_timeout())?))
        }
        Err(e) => Err(e),
    }
}

fn spawn_purge_task(store: Arc<InMemoryCounterStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            store.purge_expired();
        }
    });
}

/// Build the admission service on top of an existing store
pub fn build_admission(
    config: &ThrottleConfig,
    store: Arc<dyn CounterStore>,
) -> Result<Arc<AdmissionService>> {
    let registry = Arc::new(config.registry()?);
    let engine = Arc::new(ConsumptionEngine::with_prefix(
        store,
        registry,
        config.store.key_prefix.clone(),
    ));

    Ok(Arc::new(AdmissionService::new(
        engine,
        config.store.fail_policy_config(),
    )))
}

fn route_classifier(config: &ThrottleConfig) -> Arc<PrefixClassifier> {
    Arc::new(PrefixClassifier::new(
        config.routes.clone(),
        config.default_profile.clone(),
    ))
}

/// Build the admission middleware state for hosts embedding the throttle.
///
/// Install with
/// `axum::middleware::from_fn_with_state(admission, rate_limit::admission_middleware)`.
pub fn build_admission_layer(
    config: &ThrottleConfig,
    service: Arc<AdmissionService>,
) -> AdmissionMiddleware {
    AdmissionMiddleware::new(
        service,
        Arc::new(ClientIpResolver::new(config.identity.trust_forwarded_for)),
        route_classifier(config),
    )
}

/// Build the HTTP application
pub fn build_app(
    config: &ThrottleConfig,
    service: Arc<AdmissionService>,
    metrics: Option<MetricsService>,
) -> Router {
    let mut app = api::router(ApiState {
        service,
        classifier: route_classifier(config),
    });

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(axum::middleware::from_fn(
        observability::request_id_middleware,
    ))
    .layer(TraceLayer::new_for_http())
}

/// Initialize and run the throttle server
pub async fn init_server(config: ThrottleConfig) -> Result<()> {
    config.validate()?;

    info!("Starting API throttle");

    let store = connect_store(&config).await?;
    let service = build_admission(&config, store)?;
    let metrics = MetricsService::new()?;
    let app = build_app(&config, service, Some(metrics));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ThrottleError::Io)?;

    info!("Throttle listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| ThrottleError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
