//! HTTP decision API.
//!
//! Lets services and proxies outside this process share the limiter: they
//! ask for a decision and apply it themselves (including any smoothing
//! delay).

use crate::error::Result;
use crate::rate_limit::{AdmissionService, DenialReason, PrefixClassifier};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Shared state of the decision API
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AdmissionService>,
    pub classifier: Arc<PrefixClassifier>,
}

/// Consume request body
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// Caller identity (e.g., client IP, account id)
    pub identity: String,
    /// Explicit profile name
    #[serde(default)]
    pub profile: Option<String>,
    /// Request path, classified by the route rules when no profile is given
    #[serde(default)]
    pub path: Option<String>,
}

/// Consume response body
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ConsumeResponse {
    pub admitted: bool,
    /// Profile that was applied, `None` when the request is unthrottled
    pub profile: Option<String>,
    pub delay_seconds: f64,
    pub retry_after_seconds: u64,
    pub reason: Option<DenialReason>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    fail_policy: &'static str,
    version: &'static str,
}

/// Build the decision API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/consume", post(consume))
        .route("/health", get(health))
        .with_state(state)
}

/// Consume one point for the caller
pub async fn consume(
    State(state): State<ApiState>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>> {
    let profile = req.profile.or_else(|| {
        req.path
            .as_deref()
            .and_then(|path| state.classifier.profile_for(path))
            .map(str::to_string)
    });

    let Some(profile) = profile else {
        debug!(identity = %req.identity, path = ?req.path, "No profile applies, admitting");
        return Ok(Json(ConsumeResponse {
            admitted: true,
            profile: None,
            delay_seconds: 0.0,
            retry_after_seconds: 0,
            reason: None,
            limit: None,
            remaining: None,
        }));
    };

    let decision = state.service.admit(&profile, &req.identity).await?;

    Ok(Json(ConsumeResponse {
        admitted: decision.admitted,
        profile: Some(profile),
        delay_seconds: decision.delay_secs(),
        retry_after_seconds: decision.retry_after_secs,
        reason: decision.reason,
        limit: Some(decision.limit),
        remaining: Some(decision.remaining),
    }))
}

/// Health check endpoint, reports counter store reachability
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let fail_policy = state.service.fail_policy().policy.as_str();
    let version = env!("CARGO_PKG_VERSION");

    match state.service.engine().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                store: "up",
                fail_policy,
                version,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                store: "down",
                fail_policy,
                version,
            }),
        ),
    }
}
