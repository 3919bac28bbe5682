use super::store::CounterStore;
use super::types::RateLimitKey;
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Tracks escalation blocks for identity/profile pairs.
///
/// A block is a marker record with its own TTL, independent of the quota
/// counter, so it outlives window resets. It is lifted only by expiry; there
/// is no unblock operation.
pub struct EscalationTracker {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
}

impl EscalationTracker {
    pub fn new(store: Arc<dyn CounterStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Remaining block time, `None` when unblocked
    pub async fn active_block(&self, key: &RateLimitKey) -> Result<Option<Duration>> {
        self.store.get_ttl(&key.block_key(&self.key_prefix)).await
    }

    /// Block `key` for `duration`.
    ///
    /// An existing longer block is left in place. The marker value is the
    /// wall-clock expiry for operators inspecting the store; only its TTL is
    /// read back.
    pub async fn escalate(&self, key: &RateLimitKey, duration: Duration) -> Result<()> {
        let blocked_until = blocked_until(SystemTime::now(), duration);

        warn!(
            profile = %key.profile,
            identity = %key.identity,
            blocked_until,
            block_secs = duration.as_secs(),
            "Quota violation, blocking identity"
        );

        self.store
            .set_with_ttl(&key.block_key(&self.key_prefix), blocked_until, duration)
            .await
    }
}

/// Unix seconds at which a block started at `now` ends, saturating on overflow
fn blocked_until(now: SystemTime, duration: Duration) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_secs())
        .unwrap_or_default()
        .saturating_add(duration.as_secs())
}
