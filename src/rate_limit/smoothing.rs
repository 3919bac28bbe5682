//! Burst smoothing.
//!
//! A smoothing profile treats its window as a uniform arrival schedule: the
//! n-th admitted request of a window is expected no earlier than
//! `(n - 1) * window / max_points` after the window opened. Requests that
//! arrive ahead of schedule are delayed rather than rejected.

use super::store::CounterSnapshot;
use super::types::Profile;
use std::time::Duration;

/// Delay to apply before an admitted request proceeds.
///
/// The window start is derived from the counter's remaining TTL, so no extra
/// state is read. The result never exceeds the profile window.
pub fn delay_for(profile: &Profile, snapshot: &CounterSnapshot) -> Duration {
    if !profile.smoothing || snapshot.count == 0 {
        return Duration::ZERO;
    }

    let window = profile.window();
    let elapsed = window.saturating_sub(snapshot.ttl);
    let slot = u32::try_from(snapshot.count - 1).unwrap_or(u32::MAX);
    let expected = profile.spacing().saturating_mul(slot);

    expected.saturating_sub(elapsed).min(window)
}
