use std::fs;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, FailureKind};
use crate::request::RetryPolicy;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`. CLI flags may override the intervals.
//
// It defines:
// - Polling and reporting cadence
// - Retry policy for every exchange request
// - Persistence backend
// - Enabled exchanges and their fee defaults
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Seconds between the start of two collection cycles
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    /// Lower bound on the pause between cycles, even when a cycle overruns
    #[serde(default = "default_minimum_sleep")]
    pub minimum_sleep_secs: u64,

    /// Seconds between two health summaries in the log
    #[serde(default = "default_health_report_interval")]
    pub health_report_interval_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// List of exchange configurations
    pub exchanges: Vec<ExchangeConfig>,
}

fn default_update_interval() -> u64 {
    5
}

fn default_minimum_sleep() -> u64 {
    1
}

fn default_health_report_interval() -> u64 {
    300
}

// ------------------------------------------------------------
// Retry configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Failure kinds that are retried
    pub retry_on: Vec<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            backoff_factor: policy.backoff_factor,
            request_timeout_secs: 10,
            retry_on: policy.retryable,
        }
    }
}

// ------------------------------------------------------------
// Store configuration
// ------------------------------------------------------------
//
// Example:
//   { "backend": "redis", "url": "redis://127.0.0.1/", "prefix": "arb" }
//
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local tables, lost on exit
    #[default]
    Memory,

    Redis {
        url: String,

        /// Key namespace, so several deployments can share one Redis
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

fn default_prefix() -> String {
    "arb".to_string()
}

// ------------------------------------------------------------
// Exchange configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Exchange identifier (e.g. "binance", "kucoin")
    pub name: String,

    /// Enables or disables this exchange at runtime
    pub enabled: bool,

    /// Fee defaults stored on the exchange row
    #[serde(default = "default_fee")]
    pub maker_fee: f64,

    #[serde(default = "default_fee")]
    pub taker_fee: f64,
}

fn default_fee() -> f64 {
    0.001
}

/// API credentials for authenticated endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the secret
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Reads `<NAME>_API_KEY` and `<NAME>_API_SECRET`.
    ///
    /// Returns `None` unless both are set and non-empty.
    pub fn from_env(exchange: &str) -> Option<Self> {
        let prefix = exchange.to_uppercase();
        let api_key = std::env::var(format!("{prefix}_API_KEY")).ok()?;
        let api_secret = std::env::var(format!("{prefix}_API_SECRET")).ok()?;

        if api_key.is_empty() || api_secret.is_empty() {
            return None;
        }
        Some(Self { api_key, api_secret })
    }
}

impl Config {
    /// Reads a JSON configuration file without validating it.
    ///
    /// Callers apply CLI overrides first, then call [`Config::validate`].
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_json::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Replaces the intervals given on the command line.
    pub fn apply_overrides(
        &mut self,
        update_interval_secs: Option<u64>,
        health_report_interval_secs: Option<u64>,
    ) {
        if let Some(secs) = update_interval_secs {
            self.update_interval_secs = secs;
        }
        if let Some(secs) = health_report_interval_secs {
            self.health_report_interval_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_secs == 0 {
            return Err(invalid("update_interval_secs", "must be greater than zero"));
        }
        // zero would run cycles back to back after an overrun
        if self.minimum_sleep_secs == 0 {
            return Err(invalid("minimum_sleep_secs", "must be greater than zero"));
        }
        if self.health_report_interval_secs == 0 {
            return Err(invalid("health_report_interval_secs", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !(self.retry.backoff_factor >= 1.0) {
            return Err(invalid("retry.backoff_factor", "must be >= 1.0"));
        }
        if self.retry.request_timeout_secs == 0 {
            return Err(invalid("retry.request_timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn minimum_sleep(&self) -> Duration {
        Duration::from_secs(self.minimum_sleep_secs)
    }

    pub fn health_report_interval(&self) -> Duration {
        Duration::from_secs(self.health_report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.retry.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            retryable: self.retry.retry_on.clone(),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_json(r#"{"exchanges": [{"name": "binance", "enabled": true}]}"#)
            .unwrap();

        assert_eq!(cfg.update_interval(), Duration::from_secs(5));
        assert_eq!(cfg.health_report_interval(), Duration::from_secs(300));
        assert_eq!(cfg.store, StoreConfig::Memory);
        assert_eq!(cfg.exchanges[0].maker_fee, 0.001);
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn redis_store_and_retry_overrides() {
        let cfg = Config::from_json(
            r#"{
                "update_interval_secs": 30,
                "retry": {"max_attempts": 5, "initial_delay_ms": 250, "retry_on": ["timeout"]},
                "store": {"backend": "redis", "url": "redis://127.0.0.1/"},
                "exchanges": []
            }"#,
        )
        .unwrap();

        assert_eq!(
            cfg.store,
            StoreConfig::Redis {
                url: "redis://127.0.0.1/".into(),
                prefix: "arb".into()
            }
        );

        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.retryable, vec![FailureKind::Timeout]);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = Config::from_json(r#"{"retry": {"max_attempts": 0}, "exchanges": []}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "retry.max_attempts",
                ..
            }
        ));
    }

    #[test]
    fn zero_minimum_sleep_is_rejected() {
        let err = Config::from_json(r#"{"minimum_sleep_secs": 0, "exchanges": []}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "minimum_sleep_secs",
                ..
            }
        ));
    }

    #[test]
    fn cli_override_is_applied_before_validation() {
        let path = std::env::temp_dir().join(format!(
            "metadata-collector-config-{}.json",
            std::process::id()
        ));
        fs::write(&path, r#"{"update_interval_secs": 0, "exchanges": []}"#).unwrap();

        let mut cfg = Config::load(path.to_str().unwrap()).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "update_interval_secs",
                ..
            })
        ));

        cfg.apply_overrides(Some(10), None);
        cfg.validate().unwrap();
        assert_eq!(cfg.update_interval(), Duration::from_secs(10));
        assert_eq!(cfg.health_report_interval(), Duration::from_secs(300));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load("/nonexistent/metadata-collector.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let err = Config::from_json(r#"{"retry": {"backoff_factor": 0.5}, "exchanges": []}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
