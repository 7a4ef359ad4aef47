//! Runtime configuration for the purchase flow.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides:
//!
//! ```json
//! { "catalog_ttl_secs": 60, "retry": { "max_attempts": 5 } }
//! ```

use crate::error::{PurchaseError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Backoff schedule applied when the verifier answers with a transient error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total verifier calls per receipt, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before verifier call number `attempt + 1`, where `attempt` counts
    /// calls already made. A retry-after hint from the verifier replaces the
    /// exponential delay; both are capped at `max_delay_ms`.
    pub fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        let computed = Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(1u64 << attempt.saturating_sub(1).min(32)),
        );
        hint.unwrap_or(computed).min(cap)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a fetched catalog is trusted before `purchase` refreshes it.
    pub catalog_ttl_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_ttl_secs: 300,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PurchaseError::ConfigError(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::from_json(r#"{ "retry": { "max_attempts": 5 } }"#).unwrap();
        assert_eq!(config.catalog_ttl_secs, 300);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
    }

    #[test]
    fn test_malformed_config_is_reported() {
        let result = Config::from_json("{ not json");
        assert!(matches!(result, Err(PurchaseError::ConfigError(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_after(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3, None), Duration::from_millis(350));
        assert_eq!(policy.delay_after(60, None), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_hint_replaces_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_after(1, Some(Duration::from_millis(40))),
            Duration::from_millis(40)
        );
        assert_eq!(
            policy.delay_after(1, Some(Duration::from_secs(60))),
            Duration::from_millis(5_000)
        );
    }
}
