//! Runtime configuration.

use std::str::FromStr;
use std::time::Duration;

use db::DbConfig;
use handlers::ExtractionConfig;
use queue_core::BrokerConfig;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

/// Everything needed to start a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db: DbConfig,
    pub broker: BrokerConfig,
    /// Number of concurrent workers.
    pub concurrency: usize,
    pub extraction: ExtractionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            broker: BrokerConfig::default(),
            concurrency: 4,
            extraction: ExtractionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Read `JOBFLOW_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("JOBFLOW_DB_ENDPOINT") {
            config.db = config.db.with_endpoint(endpoint);
        }
        if let Some(namespace) = lookup("JOBFLOW_DB_NAMESPACE") {
            config.db = config.db.with_namespace(namespace);
        }
        if let Some(database) = lookup("JOBFLOW_DB_DATABASE") {
            config.db = config.db.with_database(database);
        }
        if let (Some(user), Some(pass)) = (lookup("JOBFLOW_DB_USER"), lookup("JOBFLOW_DB_PASS")) {
            config.db = config.db.with_credentials(user, pass);
        }

        if let Some(concurrency) = parse::<usize>(&lookup, "JOBFLOW_CONCURRENCY")? {
            if concurrency == 0 {
                return Err(invalid("JOBFLOW_CONCURRENCY", "0", "must be at least 1"));
            }
            config.concurrency = concurrency;
        }
        if let Some(max_attempts) = parse::<u32>(&lookup, "JOBFLOW_MAX_ATTEMPTS")? {
            if max_attempts == 0 {
                return Err(invalid("JOBFLOW_MAX_ATTEMPTS", "0", "must be at least 1"));
            }
            config.broker.retry.max_attempts = max_attempts;
        }
        if let Some(base) = parse(&lookup, "JOBFLOW_BACKOFF_BASE_MS")? {
            config.broker.retry.base_delay_ms = base;
        }
        if let Some(max) = parse(&lookup, "JOBFLOW_BACKOFF_MAX_MS")? {
            config.broker.retry.max_delay_ms = max;
        }
        if let Some(secs) = parse(&lookup, "JOBFLOW_LEASE_TIMEOUT_SECS")? {
            config.broker = config.broker.with_lease_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = parse(&lookup, "JOBFLOW_TICK_MS")? {
            config.broker = config.broker.with_tick_interval(Duration::from_millis(ms));
        }
        if let Some(url) = lookup("JOBFLOW_EXTRACTION_URL") {
            config.extraction = config.extraction.with_base_url(url);
        }

        Ok(config)
    }
}

fn invalid(var: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &value, e.to_string())),
        None => Ok(None),
    }
}
