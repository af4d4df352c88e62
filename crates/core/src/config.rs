//! Bus configuration.
//!
//! All fields have sensible defaults suitable for local development.
//! In production, override via environment variables or construct the
//! struct directly; the bus takes the config once, at construction time.

use std::env;

use crate::routing::ChannelMap;

/// Construction-time configuration for the event bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker connection URL (default: `redis://127.0.0.1:6379`).
    pub broker_url: String,
    /// Name of this service, stamped on published events as `source`.
    pub service_name: String,
    /// Deployment environment label (default: `development`).
    pub environment: String,
    /// Default retry budget for published envelopes (default: `3`).
    pub max_retries: u32,
    /// Handler execution timeout in milliseconds (default: `30000`).
    pub default_timeout_ms: u64,
    /// Persist published events to the event store (default: `true`).
    pub enable_event_store: bool,
    /// Record and periodically report per-type metrics (default: `true`).
    pub enable_metrics: bool,
    /// Dead-letter envelopes that exhaust their retries (default: `true`).
    pub enable_dead_letter_queue: bool,
    /// Validate events against the schema registry on publish
    /// (default: `true`).
    pub enable_validation: bool,
    /// Event-type to channel routing table.
    pub channels: ChannelMap,
}

impl BusConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `BROKER_URL`             | `redis://127.0.0.1:6379`   |
    /// | `SERVICE_NAME`           | `campus`                   |
    /// | `ENVIRONMENT`            | `development`              |
    /// | `EVENT_MAX_RETRIES`      | `3`                        |
    /// | `EVENT_TIMEOUT_MS`       | `30000`                    |
    /// | `EVENT_STORE_ENABLED`    | `true`                     |
    /// | `EVENT_METRICS_ENABLED`  | `true`                     |
    /// | `EVENT_DLQ_ENABLED`      | `true`                     |
    /// | `EVENT_VALIDATION_ENABLED` | `true`                   |
    ///
    /// Unparseable values fall back to the default rather than failing.
    pub fn from_env() -> Self {
        let mut config = Self::new(env_or("SERVICE_NAME", "campus".to_string()));
        config.broker_url = env_or("BROKER_URL", config.broker_url);
        config.environment = env_or("ENVIRONMENT", config.environment);
        config.max_retries = env_parse("EVENT_MAX_RETRIES", config.max_retries);
        config.default_timeout_ms = env_parse("EVENT_TIMEOUT_MS", config.default_timeout_ms);
        config.enable_event_store = env_parse("EVENT_STORE_ENABLED", config.enable_event_store);
        config.enable_metrics = env_parse("EVENT_METRICS_ENABLED", config.enable_metrics);
        config.enable_dead_letter_queue =
            env_parse("EVENT_DLQ_ENABLED", config.enable_dead_letter_queue);
        config.enable_validation =
            env_parse("EVENT_VALIDATION_ENABLED", config.enable_validation);
        config
    }

    /// Defaults for the given service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            broker_url: "redis://127.0.0.1:6379".to_string(),
            service_name: service_name.into(),
            environment: "development".to_string(),
            max_retries: 3,
            default_timeout_ms: 30_000,
            enable_event_store: true,
            enable_metrics: true,
            enable_dead_letter_queue: true,
            enable_validation: true,
            channels: ChannelMap::default(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::new("campus")
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_friendly() {
        let config = BusConfig::new("payments");
        assert_eq!(config.broker_url, "redis://127.0.0.1:6379");
        assert_eq!(config.service_name, "payments");
        assert_eq!(config.environment, "development");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert!(config.enable_event_store);
        assert!(config.enable_metrics);
        assert!(config.enable_dead_letter_queue);
        assert!(config.enable_validation);
    }

    #[test]
    fn default_trait_uses_platform_service_name() {
        assert_eq!(BusConfig::default().service_name, "campus");
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        // No env var set: default wins.
        assert_eq!(env_parse("CAMPUS_TEST_UNSET_VAR", 7u32), 7);
    }
}
