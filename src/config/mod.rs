use crate::error::{Result, ThrottleError};
use crate::observability::TracingConfig;
use crate::rate_limit::types::{FailPolicy, ProfileConfig, RouteRule};
use crate::rate_limit::{FailPolicyConfig, ProfileRegistry, DEFAULT_KEY_PREFIX};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the counter store URL (may carry credentials)
pub const STORE_URL_ENV: &str = "THROTTLE_STORE_URL";

/// Main throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Rate limiting profiles by name
    pub profiles: BTreeMap<String, ProfileConfig>,
    /// Route classification rules
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Profile for requests matching no route rule
    #[serde(default)]
    pub default_profile: Option<String>,
    /// Identity resolution
    #[serde(default)]
    pub identity: IdentityConfig,
    /// OpenTelemetry export
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL, overridden by `THROTTLE_STORE_URL`
    #[serde(default)]
    pub url: Option<String>,
    /// Namespace for every key written to the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound for a single store call (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound for establishing the connection at startup (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Behavior while the store is unavailable
    #[serde(default)]
    pub fail_policy: FailPolicy,
    /// `Retry-After` reported on fail-closed denials
    #[serde(default = "default_fail_closed_retry_after")]
    pub fail_closed_retry_after_secs: u64,
}

/// Identity resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Use the first `X-Forwarded-For` hop as the caller identity
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Sample rate (0.0 to 1.0)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_fail_closed_retry_after() -> u64 {
    5
}

fn default_service_name() -> String {
    "api-throttle".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            fail_policy: FailPolicy::default(),
            fail_closed_retry_after_secs: default_fail_closed_retry_after(),
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn fail_policy_config(&self) -> FailPolicyConfig {
        FailPolicyConfig {
            policy: self.fail_policy,
            retry_after_secs: self.fail_closed_retry_after_secs,
        }
    }

    /// Store URL from the environment, falling back to the configuration file
    pub fn connection_url(&self) -> Option<Secret<String>> {
        self.resolve_url(std::env::var(STORE_URL_ENV).ok())
    }

    fn resolve_url(&self, from_env: Option<String>) -> Option<Secret<String>> {
        from_env
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.url.clone())
            .map(Secret::new)
    }
}

impl TelemetryConfig {
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            otlp_endpoint: self.otlp_endpoint.clone(),
            service_name: self.service_name.clone(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            sample_rate: self.sample_rate,
        }
    }
}

impl ThrottleConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ThrottleError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Build the profile registry
    pub fn registry(&self) -> Result<ProfileRegistry> {
        ProfileRegistry::from_config(&self.profiles)
    }

    /// Validate configuration.
    ///
    /// Unknown profile references are reported as `InvalidProfile` here so
    /// they never reach request handling.
    pub fn validate(&self) -> Result<()> {
        let registry = self.registry()?;

        if registry.is_empty() {
            return Err(ThrottleError::Config(
                "At least one rate limit profile must be configured".to_string(),
            ));
        }

        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(ThrottleError::Config(format!(
                    "Route prefix must start with '/': {}",
                    route.prefix
                )));
            }
        }

        registry.ensure_known(self.routes.iter().map(|r| r.profile.as_str()))?;
        registry.ensure_known(self.default_profile.as_deref())?;

        if self.store.key_prefix.is_empty() {
            return Err(ThrottleError::Config(
                "Counter store key prefix cannot be empty".to_string(),
            ));
        }

        if self.store.timeout_ms == 0 || self.store.timeout_ms >= 1000 {
            return Err(ThrottleError::Config(format!(
                "Counter store timeout must be between 1 and 999 ms, got {}",
                self.store.timeout_ms
            )));
        }

        if self.store.connect_timeout_ms == 0 {
            return Err(ThrottleError::Config(
                "Counter store connect timeout must be > 0".to_string(),
            ));
        }

        if let Some(telemetry) = &self.telemetry {
            if !(0.0..=1.0).contains(&telemetry.sample_rate) {
                return Err(ThrottleError::Config(format!(
                    "Telemetry sample rate must be within 0.0..=1.0, got {}",
                    telemetry.sample_rate
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
server:
  host: "127.0.0.1"
  port: 9000

store:
  url: "redis://127.0.0.1:6379"
  timeout_ms: 100
  fail_policy: open

profiles:
  auth:
    max_points: 5
    window_secs: 900
    block_duration_secs: 900
  api:
    max_points: 100
    window_secs: 60
    smoothing: true

routes:
  - prefix: /api/auth
    profile: auth
  - prefix: /api
    profile: api

default_profile: api
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = ThrottleConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.fail_policy, FailPolicy::Open);
        assert_eq!(config.store.op_timeout(), Duration::from_millis(100));
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(config.profiles["auth"].block_duration_secs, Some(900));
        assert!(config.profiles["api"].smoothing);
        assert_eq!(config.routes.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let yaml = r#"
profiles:
  api:
    max_points: 10
    window_secs: 1
"#;

        let config = ThrottleConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.key_prefix, "throttle:");
        assert_eq!(config.store.timeout_ms, 250);
        assert_eq!(config.store.fail_policy, FailPolicy::Closed);
        assert!(config.store.url.is_none());
        assert!(!config.identity.trust_forwarded_for);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_route_profile() {
        let mut config = ThrottleConfig::from_yaml(SAMPLE).unwrap();
        config.routes.push(RouteRule {
            prefix: "/upload".to_string(),
            profile: "upload".to_string(),
        });

        assert!(matches!(
            config.validate(),
            Err(ThrottleError::InvalidProfile(name)) if name == "upload"
        ));
    }

    #[test]
    fn test_validate_unknown_default_profile() {
        let mut config = ThrottleConfig::from_yaml(SAMPLE).unwrap();
        config.default_profile = Some("missing".to_string());
        assert!(matches!(
            config.validate(),
            Err(ThrottleError::InvalidProfile(_))
        ));
    }

    #[test]
    fn test_validate_zero_quota() {
        let mut config = ThrottleConfig::from_yaml(SAMPLE).unwrap();
        config.profiles.insert(
            "broken".to_string(),
            ProfileConfig {
                max_points: 0,
                window_secs: 60,
                smoothing: false,
                block_duration_secs: None,
            },
        );
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_validate_store_timeout_is_sub_second() {
        let mut config = ThrottleConfig::from_yaml(SAMPLE).unwrap();
        config.store.timeout_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_url_takes_precedence() {
        let config = ThrottleConfig::from_yaml(SAMPLE).unwrap();

        let url = config
            .store
            .resolve_url(Some("redis://:secret@cache:6379".to_string()))
            .unwrap();
        assert_eq!(url.expose_secret(), "redis://:secret@cache:6379");

        let url = config.store.resolve_url(Some("  ".to_string())).unwrap();
        assert_eq!(url.expose_secret(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ThrottleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("api"));

        assert!(ThrottleConfig::from_file("/nonexistent/throttle.yaml").is_err());
    }
}
