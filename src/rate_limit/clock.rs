use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of the current time for the in-memory counter store
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// System clock backed by `Instant::now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same time value.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<Instant>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Advance the clock by a duration
    pub fn advance(&self, duration: Duration) {
        let mut now = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += duration;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_shared_between_clones() {
        let clock = MockClock::new();
        let start = clock.now();
        let other = clock.clone();

        other.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + Duration::from_secs(10));
    }
}
