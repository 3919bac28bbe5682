use super::engine::ConsumptionEngine;
use super::types::{Decision, FailPolicy};
use crate::error::{Result, ThrottleError};
use crate::metrics;
use std::sync::Arc;
use tracing::{info, warn};

/// Fail policy settings applied when the counter store is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailPolicyConfig {
    pub policy: FailPolicy,
    /// `Retry-After` reported on fail-closed denials
    pub retry_after_secs: u64,
}

impl Default for FailPolicyConfig {
    fn default() -> Self {
        Self {
            policy: FailPolicy::Closed,
            retry_after_secs: 5,
        }
    }
}

/// Admission service: wraps the consumption engine with the fail policy and
/// emits one observation per decision
pub struct AdmissionService {
    engine: Arc<ConsumptionEngine>,
    fail_policy: FailPolicyConfig,
}

impl AdmissionService {
    pub fn new(engine: Arc<ConsumptionEngine>, fail_policy: FailPolicyConfig) -> Self {
        info!(
            fail_policy = fail_policy.policy.as_str(),
            profiles = engine.registry().len(),
            "Initializing admission service"
        );
        Self {
            engine,
            fail_policy,
        }
    }

    pub fn engine(&self) -> &Arc<ConsumptionEngine> {
        &self.engine
    }

    pub fn fail_policy(&self) -> FailPolicyConfig {
        self.fail_policy
    }

    /// Decide whether `identity` may proceed under `profile`.
    ///
    /// Store outages are resolved by the fail policy; only configuration
    /// errors (unknown profile) are returned.
    pub async fn admit(&self, profile: &str, identity: &str) -> Result<Decision> {
        let decision = match self.engine.consume(profile, identity).await {
            Ok(decision) => decision,
            Err(ThrottleError::StoreUnavailable(cause)) => self.degraded(profile, &cause)?,
            Err(e) => return Err(e),
        };

        observe(profile, identity, &decision);
        Ok(decision)
    }

    fn degraded(&self, profile: &str, cause: &str) -> Result<Decision> {
        let limit = self.engine.registry().get(profile)?.max_points;
        let policy = self.fail_policy.policy;

        warn!(
            profile,
            fail_policy = policy.as_str(),
            cause,
            "Counter store unavailable, running in degraded mode"
        );
        metrics::record_degraded(profile, policy.as_str());

        let decision = match policy {
            FailPolicy::Open => Decision::admitted(limit, 0, std::time::Duration::ZERO),
            FailPolicy::Closed => Decision::quota_exceeded(limit, self.fail_policy.retry_after_secs),
        };
        Ok(decision.into_degraded())
    }
}

/// Emit the structured observation for one decision
fn observe(profile: &str, identity: &str, decision: &Decision) {
    let outcome = decision.reason.map(|r| r.code()).unwrap_or("admitted");

    info!(
        target: "api_throttle::admission",
        identity,
        profile,
        admitted = decision.admitted,
        outcome,
        retry_after_secs = decision.retry_after_secs,
        delay_ms = decision.delay.as_millis() as u64,
        remaining = decision.remaining,
        degraded = decision.degraded,
        "Admission decision"
    );
    metrics::record_decision(profile, outcome, decision.delay_secs());
}
