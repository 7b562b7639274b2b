use std::env::{self, VarError};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::error::BrokerError;

pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 50;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Settings for the process-wide broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub backoff_step_ms: u64,
    pub backoff_max_ms: u64,
    /// `None` retries forever. `Some(0)` gives up after the first failure.
    pub max_retries: Option<u32>,
    pub connect_timeout_ms: u64,
}

impl Default for BrokerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_owned(),
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_retries: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl BrokerConfig {
    /// Creates a configuration for `url` with the default retry-forever policy.
    #[inline]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Disables reconnects: the first failed attempt closes the connection.
    ///
    /// Meant for transient callers such as health checks or one-off CLI
    /// commands that should report an error instead of waiting.
    #[must_use]
    pub fn fail_fast(mut self) -> Self {
        self.max_retries = Some(0);
        self
    }

    /// Loads configuration from environment variables using the supplied prefix.
    ///
    /// Expected variables:
    /// - `{PREFIX}_REDIS_URL` (optional, falls back to `REDIS_URL`, then the default)
    /// - `{PREFIX}_BACKOFF_STEP_MS` (optional)
    /// - `{PREFIX}_BACKOFF_MAX_MS` (optional)
    /// - `{PREFIX}_MAX_RETRIES` (optional, unset means unbounded)
    /// - `{PREFIX}_CONNECT_TIMEOUT_MS` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, BrokerError> {
        let mut config = Self::default();

        if let Some(url) = read_var(&format!("{prefix}_REDIS_URL"))?.or(read_var("REDIS_URL")?) {
            config.url = url;
        }
        if config.url.trim().is_empty() {
            return Err(BrokerError::EmptyUrl);
        }
        if let Some(step) = parse_var(prefix, "BACKOFF_STEP_MS")? {
            config.backoff_step_ms = step;
        }
        if let Some(max) = parse_var(prefix, "BACKOFF_MAX_MS")? {
            config.backoff_max_ms = max;
        }
        if let Some(retries) = parse_var(prefix, "MAX_RETRIES")? {
            config.max_retries = Some(retries);
        }
        if let Some(timeout) = parse_var(prefix, "CONNECT_TIMEOUT_MS")? {
            config.connect_timeout_ms = timeout;
        }

        Ok(config)
    }

    #[inline]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_step_ms),
            Duration::from_millis(self.backoff_max_ms),
            self.max_retries,
        )
    }

    #[inline]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn read_var(name: &str) -> Result<Option<String>, BrokerError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(BrokerError::InvalidUnicode(name.to_owned())),
    }
}

fn parse_var<T>(prefix: &str, suffix: &str) -> Result<Option<T>, BrokerError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    let name = format!("{prefix}_{suffix}");
    match read_var(&name)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|source| BrokerError::InvalidNumber { var: name, source }),
        None => Ok(None),
    }
}
