use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Counter state returned by an atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Value after the increment
    pub count: u64,
    /// Time until the counter expires
    pub ttl: Duration,
}

/// Shared key-value store with atomic increment-and-expire.
///
/// Implementations must make `increment_and_get` atomic across every process
/// sharing the store. All failures surface as
/// [`ThrottleError::StoreUnavailable`](crate::error::ThrottleError::StoreUnavailable).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one, creating it with expiry `ttl` when absent
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot>;

    /// Remaining lifetime of `key`, `None` when absent
    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Store `value` under `key` with expiry `ttl`.
    ///
    /// An existing longer expiry is kept.
    async fn set_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;
}
