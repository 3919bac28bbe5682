use super::service::AdmissionService;
use super::types::{Decision, DenialReason, RouteRule};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

const FORWARDED_FOR: &str = "x-forwarded-for";
const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Resolves the caller identity of a request
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, request: &Request) -> Option<String>;
}

/// Selects the rate limiting profile for a request, `None` leaves it unthrottled
pub trait RouteClassifier: Send + Sync {
    fn classify(&self, request: &Request) -> Option<String>;
}

/// Identity from the client network address
#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    /// Use the first `X-Forwarded-For` hop (only behind a trusted proxy)
    pub trust_forwarded_for: bool,
}

impl ClientIpResolver {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self {
            trust_forwarded_for,
        }
    }
}

impl IdentityResolver for ClientIpResolver {
    fn resolve(&self, request: &Request) -> Option<String> {
        if self.trust_forwarded_for {
            let forwarded = request
                .headers()
                .get(FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());

            if let Some(ip) = forwarded {
                return Some(ip.to_string());
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
    }
}

/// Longest-prefix route classification
#[derive(Debug, Clone, Default)]
pub struct PrefixClassifier {
    rules: Vec<RouteRule>,
    default_profile: Option<String>,
}

impl PrefixClassifier {
    pub fn new(mut rules: Vec<RouteRule>, default_profile: Option<String>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            rules,
            default_profile,
        }
    }

    /// Profile for a request path
    pub fn profile_for(&self, path: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| prefix_matches(&rule.prefix, path))
            .map(|rule| rule.profile.as_str())
            .or(self.default_profile.as_deref())
    }
}

impl RouteClassifier for PrefixClassifier {
    fn classify(&self, request: &Request) -> Option<String> {
        self.profile_for(request.uri().path()).map(str::to_string)
    }
}

/// `/api/auth` matches `/api/auth` and `/api/auth/login`, not `/api/authors`
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Admission middleware state
#[derive(Clone)]
pub struct AdmissionMiddleware {
    service: Arc<AdmissionService>,
    resolver: Arc<dyn IdentityResolver>,
    classifier: Arc<dyn RouteClassifier>,
}

impl AdmissionMiddleware {
    pub fn new(
        service: Arc<AdmissionService>,
        resolver: Arc<dyn IdentityResolver>,
        classifier: Arc<dyn RouteClassifier>,
    ) -> Self {
        Self {
            service,
            resolver,
            classifier,
        }
    }

    /// Apply admission control to a request.
    ///
    /// Returns the request (after any smoothing delay) with the decision, or
    /// the rejection response. Dropping the returned future abandons the
    /// delay; the consumed point is not refunded.
    pub async fn apply(&self, request: Request) -> Result<(Request, Option<Decision>), Response> {
        let Some(profile) = self.classifier.classify(&request) else {
            return Ok((request, None));
        };

        let identity = self
            .resolver
            .resolve(&request)
            .unwrap_or_else(|| "unknown".to_string());

        let decision = match self.service.admit(&profile, &identity).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(profile = %profile, error = %e, "Admission check failed");
                return Err(e.into_response());
            }
        };

        if !decision.admitted {
            return Err(create_rejection_response(&decision));
        }

        if !decision.delay.is_zero() {
            debug!(
                profile = %profile,
                identity = %identity,
                delay_ms = decision.delay.as_millis() as u64,
                "Delaying request for smoothing"
            );
            tokio::time::sleep(decision.delay).await;
        }

        Ok((request, Some(decision)))
    }
}

/// Create a 429 Too Many Requests response for a denial
pub fn create_rejection_response(decision: &Decision) -> Response {
    let reason = decision.reason.unwrap_or(DenialReason::QuotaExceeded);
    let mut headers = HeaderMap::new();

    insert_rate_limit_headers(&mut headers, decision);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));

    let error = match reason {
        DenialReason::QuotaExceeded => "Rate limit exceeded",
        DenialReason::Blocked => "Temporarily blocked",
    };
    let body = serde_json::json!({
        "error": error,
        "code": reason.code(),
        "status": 429,
        "limit": decision.limit,
        "retry_after": decision.retry_after_secs,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if decision.reset_secs > 0 {
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_secs));
    }
}

/// Add rate limit headers to an admitted response
pub fn add_rate_limit_headers(mut response: Response, decision: &Decision) -> Response {
    insert_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Axum middleware function for admission control.
///
/// Install with `axum::middleware::from_fn_with_state(admission, admission_middleware)`.
pub async fn admission_middleware(
    State(admission): State<AdmissionMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    match admission.apply(request).await {
        Ok((request, Some(decision))) => {
            add_rate_limit_headers(next.run(request).await, &decision)
        }
        Ok((request, None)) => next.run(request).await,
        Err(response) => response,
    }
}
