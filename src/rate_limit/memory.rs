use super::clock::{Clock, SystemClock};
use super::store::{CounterSnapshot, CounterStore};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: u64,
    expires_at: Instant,
}

/// Process-local counter store.
///
/// Each key is updated under its shard lock, so increments are atomic within
/// this process only. Use it for tests and single-instance deployments.
pub struct InMemoryCounterStore {
    entries: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    /// Create a store driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Drop entries whose TTL has elapsed
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        debug!(
            "Purged {} expired counter entries",
            before.saturating_sub(self.entries.len())
        );
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        let now = self.clock.now();
        let mut slot = self.entries.entry(key.to_string()).or_insert(Slot {
            value: 0,
            expires_at: now + ttl,
        });

        if slot.expires_at <= now {
            *slot = Slot {
                value: 0,
                expires_at: now + ttl,
            };
        }
        slot.value += 1;

        Ok(CounterSnapshot {
            count: slot.value,
            ttl: slot.expires_at.saturating_duration_since(now),
        })
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .map(|slot| slot.expires_at.saturating_duration_since(now))
            .filter(|ttl| !ttl.is_zero()))
    }

    async fn set_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert(Slot { value, expires_at });

        if slot.expires_at <= expires_at {
            *slot = Slot { value, expires_at };
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
