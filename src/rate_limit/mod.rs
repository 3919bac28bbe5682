//! Rate limiting module
//!
//! Multi-profile, store-backed admission control:
//!
//! - **Profiles**: named quotas with their own window, optional burst
//!   smoothing and optional escalation blocks
//! - **Counter store**: shared TTL counters with atomic increment-and-expire
//!   (Redis in production, in-memory for tests and single instances)
//! - **Consumption engine**: one atomic store round trip per decision
//! - **Admission**: fail-open / fail-closed handling, observations, and an
//!   axum middleware producing `429` responses with `Retry-After`
//!
//! # Example
//!
//! ```rust,no_run
//! use api_throttle::rate_limit::{
//!     AdmissionService, ConsumptionEngine, FailPolicyConfig, InMemoryCounterStore, Profile,
//!     ProfileRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ProfileRegistry::new(vec![Profile {
//!         name: "auth".to_string(),
//!         max_points: 5,
//!         window_secs: 900,
//!         smoothing: false,
//!         block_duration_secs: Some(900),
//!     }])
//!     .unwrap();
//!
//!     let store = Arc::new(InMemoryCounterStore::new());
//!     let engine = Arc::new(ConsumptionEngine::new(store, Arc::new(registry)));
//!     let service = AdmissionService::new(engine, FailPolicyConfig::default());
//!
//!     let decision = service.admit("auth", "203.0.113.7").await.unwrap();
//!     assert!(decision.admitted);
//! }
//! ```

pub mod clock;
pub mod engine;
pub mod escalation;
pub mod lua_scripts;
pub mod memory;
pub mod middleware;
pub mod redis;
pub mod registry;
pub mod service;
pub mod smoothing;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, MockClock, SystemClock};
pub use engine::{ConsumptionEngine, DEFAULT_KEY_PREFIX};
pub use escalation::EscalationTracker;
pub use memory::InMemoryCounterStore;
pub use middleware::{
    admission_middleware, AdmissionMiddleware, ClientIpResolver, IdentityResolver,
    PrefixClassifier, RouteClassifier,
};
pub use redis::RedisCounterStore;
pub use registry::ProfileRegistry;
pub use service::{AdmissionService, FailPolicyConfig};
pub use store::{CounterSnapshot, CounterStore};
pub use types::{
    Decision, DenialReason, FailPolicy, Profile, ProfileConfig, RateLimitKey, RouteRule,
};
