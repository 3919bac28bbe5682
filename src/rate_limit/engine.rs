use super::escalation::EscalationTracker;
use super::registry::ProfileRegistry;
use super::smoothing;
use super::store::CounterStore;
use super::types::{ceil_secs, Decision, Profile, RateLimitKey};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, error};

/// Default namespace for every key written to the counter store
pub const DEFAULT_KEY_PREFIX: &str = "throttle:";

/// Performs one atomic consumption attempt per request.
///
/// Store failures are returned as `StoreUnavailable`; applying the fail
/// policy is left to the caller. Once the counter has reported the quota as
/// exceeded the request is denied even if the block marker cannot be written.
pub struct ConsumptionEngine {
    store: Arc<dyn CounterStore>,
    registry: Arc<ProfileRegistry>,
    escalation: EscalationTracker,
    key_prefix: String,
}

impl ConsumptionEngine {
    /// Create an engine using the default key prefix
    pub fn new(store: Arc<dyn CounterStore>, registry: Arc<ProfileRegistry>) -> Self {
        Self::with_prefix(store, registry, DEFAULT_KEY_PREFIX)
    }

    /// Create an engine with a custom key prefix
    pub fn with_prefix(
        store: Arc<dyn CounterStore>,
        registry: Arc<ProfileRegistry>,
        key_prefix: impl Into<String>,
    ) -> Self {
        let key_prefix = key_prefix.into();
        Self {
            escalation: EscalationTracker::new(store.clone(), key_prefix.clone()),
            store,
            registry,
            key_prefix,
        }
    }

    /// Profiles known to this engine
    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Check that the counter store is reachable
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Consume one point of `profile_name` for `identity`
    pub async fn consume(&self, profile_name: &str, identity: &str) -> Result<Decision> {
        let profile = self.registry.get(profile_name)?;
        self.consume_profile(profile, identity).await
    }

    /// Consume one point of an already resolved profile
    pub async fn consume_profile(&self, profile: &Profile, identity: &str) -> Result<Decision> {
        let key = RateLimitKey::new(profile.name.as_str(), identity);

        // An active block short-circuits before the quota counter is touched.
        if profile.block_duration().is_some() {
            if let Some(remaining) = self.escalation.active_block(&key).await? {
                debug!(
                    profile = %profile.name,
                    identity,
                    remaining_secs = remaining.as_secs(),
                    "Identity is blocked"
                );
                return Ok(Decision::blocked(profile.max_points, ceil_secs(remaining)));
            }
        }

        let snapshot = self
            .store
            .increment_and_get(&key.counter_key(&self.key_prefix), profile.window())
            .await?;

        if snapshot.count <= u64::from(profile.max_points) {
            let remaining = profile.max_points - snapshot.count as u32;
            let delay = smoothing::delay_for(profile, &snapshot);

            debug!(
                profile = %profile.name,
                identity,
                count = snapshot.count,
                remaining,
                delay_ms = delay.as_millis() as u64,
                "Consumption admitted"
            );
            let decision = Decision::admitted(profile.max_points, remaining, delay)
                .with_reset(ceil_secs(snapshot.ttl));
            return Ok(decision);
        }

        match profile.block_duration() {
            Some(block) => {
                // The counter stays over quota for the rest of the window, so a
                // later request retries the marker write.
                if let Err(e) = self.escalation.escalate(&key, block).await {
                    error!(
                        profile = %profile.name,
                        identity,
                        error = %e,
                        "Failed to record block marker"
                    );
                }
                Ok(Decision::blocked(profile.max_points, block.as_secs()))
            }
            None => Ok(Decision::quota_exceeded(
                profile.max_points,
                ceil_secs(snapshot.ttl),
            )),
        }
    }
}
