use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Profile settings as they appear in configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Quota capacity per window
    pub max_points: u32,
    /// Window length (in seconds)
    pub window_secs: u64,
    /// Spread admitted requests evenly across the window
    #[serde(default)]
    pub smoothing: bool,
    /// Denial period applied once the quota is exceeded
    #[serde(default)]
    pub block_duration_secs: Option<u64>,
}

/// A named rate limiting profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub max_points: u32,
    pub window_secs: u64,
    pub smoothing: bool,
    pub block_duration_secs: Option<u64>,
}

impl Profile {
    /// Build a profile from its configuration entry
    pub fn new(name: impl Into<String>, config: &ProfileConfig) -> Self {
        Self {
            name: name.into(),
            max_points: config.max_points,
            window_secs: config.window_secs,
            smoothing: config.smoothing,
            block_duration_secs: config.block_duration_secs,
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Block duration, if this profile escalates on violation.
    ///
    /// A configured value of zero means no escalation.
    pub fn block_duration(&self) -> Option<Duration> {
        self.block_duration_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Ideal spacing between admitted requests
    pub fn spacing(&self) -> Duration {
        self.window() / self.max_points.max(1)
    }
}

/// Maps a request path prefix to a profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRule {
    /// Path prefix (e.g., "/api/auth")
    pub prefix: String,
    /// Profile applied to matching requests
    pub profile: String,
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Quota for the current window is used up
    QuotaExceeded,
    /// An escalation block is active
    #[serde(rename = "temporarily_blocked")]
    Blocked,
}

impl DenialReason {
    /// Machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::QuotaExceeded => "quota_exceeded",
            DenialReason::Blocked => "temporarily_blocked",
        }
    }
}

/// Behavior when the counter store cannot be reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Admit every request
    Open,
    /// Deny every request
    #[default]
    Closed,
}

impl FailPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailPolicy::Open => "open",
            FailPolicy::Closed => "closed",
        }
    }
}

/// Outcome of one consumption attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// How long the caller should wait before proceeding (smoothing)
    pub delay: Duration,
    /// Seconds until a retry may succeed (0 when admitted)
    pub retry_after_secs: u64,
    /// Set when the request was denied
    pub reason: Option<DenialReason>,
    /// Quota capacity of the profile
    pub limit: u32,
    /// Points left in the current window
    pub remaining: u32,
    /// Seconds until the quota window resets (0 when unknown)
    pub reset_secs: u64,
    /// Decided by the fail policy rather than the store
    pub degraded: bool,
}

impl Decision {
    /// Create an admitted decision
    pub fn admitted(limit: u32, remaining: u32, delay: Duration) -> Self {
        Self {
            admitted: true,
            delay,
            retry_after_secs: 0,
            reason: None,
            limit,
            remaining,
            reset_secs: 0,
            degraded: false,
        }
    }

    /// Create a quota-exceeded denial
    pub fn quota_exceeded(limit: u32, retry_after_secs: u64) -> Self {
        Self::denied(limit, DenialReason::QuotaExceeded, retry_after_secs)
    }

    /// Create a blocked denial
    pub fn blocked(limit: u32, retry_after_secs: u64) -> Self {
        Self::denied(limit, DenialReason::Blocked, retry_after_secs)
    }

    fn denied(limit: u32, reason: DenialReason, retry_after_secs: u64) -> Self {
        Self {
            admitted: false,
            delay: Duration::ZERO,
            retry_after_secs,
            reason: Some(reason),
            limit,
            remaining: 0,
            reset_secs: retry_after_secs,
            degraded: false,
        }
    }

    /// Attach the time until the quota window resets
    pub fn with_reset(mut self, reset_secs: u64) -> Self {
        self.reset_secs = reset_secs;
        self
    }

    /// Mark the decision as produced by the fail policy
    pub fn into_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Smoothing delay in fractional seconds
    pub fn delay_secs(&self) -> f64 {
        self.delay.as_secs_f64()
    }
}

/// Identity scoped to a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Profile name
    pub profile: String,
    /// Caller identity (e.g., IP address, account id)
    pub identity: String,
}

impl RateLimitKey {
    /// Create a new rate limit key
    pub fn new(profile: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            identity: identity.into(),
        }
    }

    /// Store key of the quota counter.
    ///
    /// Profile names never contain `:`, so the profile segment ends at the
    /// first separator and any identity is safe in the last segment.
    pub fn counter_key(&self, prefix: &str) -> String {
        format!("{}quota:{}:{}", prefix, self.profile, self.identity)
    }

    /// Store key of the block marker
    pub fn block_key(&self, prefix: &str) -> String {
        format!("{}block:{}:{}", prefix, self.profile, self.identity)
    }
}

/// Round a remaining duration up to whole seconds, never below one
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    let secs = if duration.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}
