use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Queue and consumer names end up inside broker keys, so no `:` and no spaces.
static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,127}$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub broker: Option<BrokerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub worker: Option<WorkerSection>,
    #[serde(default)]
    pub jobs: Option<JobsSection>,
}

#[derive(Debug, Deserialize)]
pub struct BrokerSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub backoff_step_ms: Option<u64>,
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub consumer: Option<String>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub fetch_wait_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
    #[serde(default)]
    pub shutdown_grace_ms: Option<u64>,
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct JobsSection {
    #[serde(default)]
    pub send_email_delay_ms: Option<u64>,
    #[serde(default)]
    pub generate_report_delay_ms: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try to parse config by attempting each enabled format
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub broker: BrokerSettings,
    pub logging: LoggingConfig,
    pub worker: WorkerConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerSettings {
    pub url: String,
    pub backoff_step_ms: u64,
    pub backoff_max_ms: u64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerConfig {
    pub queue: String,
    /// Stable name for this worker's in-flight list. Defaults to one derived
    /// from the host name when unset.
    pub consumer: Option<String>,
    pub key_prefix: String,
    pub fetch_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub job_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobsConfig {
    pub send_email_delay_ms: u64,
    pub generate_report_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                url: DEFAULT_REDIS_URL.to_string(),
                backoff_step_ms: 50,
                backoff_max_ms: 2000,
                max_retries: None,
                connect_timeout_ms: 10_000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            worker: WorkerConfig {
                queue: "tasks".to_string(),
                consumer: None,
                key_prefix: "jobline".to_string(),
                fetch_wait_ms: 1000,
                poll_interval_ms: 200,
                job_timeout_ms: None,
                shutdown_grace_ms: None,
                ready_timeout_ms: None,
            },
            jobs: JobsConfig {
                send_email_delay_ms: 1500,
                generate_report_delay_ms: 2000,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(()),
    }
}

/// Optional limits use 0 for "off".
#[inline]
fn nonzero(v: u64) -> Option<u64> {
    (v > 0).then_some(v)
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
    ($target:expr, $source:expr, limit) => {
        if let Some(v) = $source {
            $target = nonzero(v);
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(b) = raw.broker {
            apply_opt!(cfg.broker.url, b.url);
            apply_opt!(cfg.broker.backoff_step_ms, b.backoff_step_ms);
            apply_opt!(cfg.broker.backoff_max_ms, b.backoff_max_ms);
            apply_opt!(cfg.broker.max_retries, b.max_retries, wrap);
            apply_opt!(cfg.broker.connect_timeout_ms, b.connect_timeout_ms);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        if let Some(w) = raw.worker {
            apply_opt!(cfg.worker.queue, w.queue);
            apply_opt!(cfg.worker.consumer, w.consumer, wrap);
            apply_opt!(cfg.worker.key_prefix, w.key_prefix);
            apply_opt!(cfg.worker.fetch_wait_ms, w.fetch_wait_ms);
            apply_opt!(cfg.worker.poll_interval_ms, w.poll_interval_ms);
            apply_opt!(cfg.worker.job_timeout_ms, w.job_timeout_ms, limit);
            apply_opt!(cfg.worker.shutdown_grace_ms, w.shutdown_grace_ms, limit);
            apply_opt!(cfg.worker.ready_timeout_ms, w.ready_timeout_ms, limit);
        }
        if let Some(j) = raw.jobs {
            apply_opt!(cfg.jobs.send_email_delay_ms, j.send_email_delay_ms);
            apply_opt!(cfg.jobs.generate_report_delay_ms, j.generate_report_delay_ms);
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

/// Helper to get env var as string, ignoring empty values
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Broker; the bare REDIS_URL is honoured when nothing more specific is set.
    if let Some(v) = env_str("JOBLINE_REDIS_URL").or_else(|| env_str("REDIS_URL")) {
        cfg.broker.url = v;
    }
    apply_opt!(cfg.broker.backoff_step_ms, env_parse("JOBLINE_BACKOFF_STEP_MS")?);
    apply_opt!(cfg.broker.backoff_max_ms, env_parse("JOBLINE_BACKOFF_MAX_MS")?);
    apply_opt!(cfg.broker.max_retries, env_parse("JOBLINE_MAX_RETRIES")?, wrap);
    apply_opt!(cfg.broker.connect_timeout_ms, env_parse("JOBLINE_CONNECT_TIMEOUT_MS")?);

    // Logging
    apply_opt!(cfg.logging.level, env_str("JOBLINE_LOG_LEVEL"));
    apply_opt!(cfg.logging.json, env_bool("JOBLINE_LOG_JSON")?);

    // Worker
    apply_opt!(cfg.worker.queue, env_str("JOBLINE_QUEUE"));
    apply_opt!(cfg.worker.consumer, env_str("JOBLINE_CONSUMER"), wrap);
    apply_opt!(cfg.worker.key_prefix, env_str("JOBLINE_KEY_PREFIX"));
    apply_opt!(cfg.worker.fetch_wait_ms, env_parse("JOBLINE_FETCH_WAIT_MS")?);
    apply_opt!(cfg.worker.poll_interval_ms, env_parse("JOBLINE_POLL_INTERVAL_MS")?);
    apply_opt!(cfg.worker.job_timeout_ms, env_parse("JOBLINE_JOB_TIMEOUT_MS")?, limit);
    apply_opt!(cfg.worker.shutdown_grace_ms, env_parse("JOBLINE_SHUTDOWN_GRACE_MS")?, limit);
    apply_opt!(cfg.worker.ready_timeout_ms, env_parse("JOBLINE_READY_TIMEOUT_MS")?, limit);

    // Jobs
    apply_opt!(cfg.jobs.send_email_delay_ms, env_parse("JOBLINE_SEND_EMAIL_DELAY_MS")?);
    apply_opt!(cfg.jobs.generate_report_delay_ms, env_parse("JOBLINE_GENERATE_REPORT_DELAY_MS")?);

    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if NAME_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("invalid {}: {:?}", field, value)))
    }
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    let url = url::Url::parse(cfg.broker.url.trim())
        .map_err(|_| ConfigError::Validation("broker.url is not a valid URL".to_string()))?;
    match url.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "unsupported broker.url scheme: {}",
                other
            )))
        }
    }

    if cfg.broker.backoff_step_ms == 0 {
        return Err(ConfigError::Validation("broker.backoff_step_ms must be > 0".into()));
    }
    if cfg.broker.backoff_max_ms < cfg.broker.backoff_step_ms {
        return Err(ConfigError::Validation(
            "broker.backoff_max_ms must be >= broker.backoff_step_ms".into(),
        ));
    }
    if cfg.broker.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation("broker.connect_timeout_ms must be > 0".into()));
    }

    validate_name("worker.queue", &cfg.worker.queue)?;
    validate_name("worker.key_prefix", &cfg.worker.key_prefix)?;
    if let Some(consumer) = &cfg.worker.consumer {
        validate_name("worker.consumer", consumer)?;
    }
    if cfg.worker.fetch_wait_ms == 0 {
        return Err(ConfigError::Validation("worker.fetch_wait_ms must be > 0".into()));
    }
    if cfg.worker.poll_interval_ms == 0 {
        return Err(ConfigError::Validation("worker.poll_interval_ms must be > 0".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_with_ext(ext: &str, contents: &str) -> NamedTempFile {
        let f = tempfile::Builder::new()
            .suffix(ext)
            .tempfile()
            .expect("tmpfile");
        std::fs::write(f.path(), contents).unwrap();
        f
    }

    #[test]
    fn parse_toml() {
        let f = temp_with_ext(
            ".toml",
            r#"
[broker]
url = "redis://cache:6380/2"
max_retries = 5

[worker]
queue = "emails"
job_timeout_ms = 30000
shutdown_grace_ms = 0
"#,
        );
        let raw = load_raw_from_file(f.path()).expect("load");
        let b = raw.broker.unwrap();
        assert_eq!(b.url.unwrap(), "redis://cache:6380/2");
        assert_eq!(b.max_retries, Some(5));

        let cfg = load_config(Some(f.path())).expect("config");
        assert_eq!(cfg.worker.queue, "emails");
        assert_eq!(cfg.worker.job_timeout_ms, Some(30000));
        assert_eq!(cfg.worker.shutdown_grace_ms, None);
        assert_eq!(cfg.broker.backoff_step_ms, 50);
    }

    #[test]
    fn parse_yaml() {
        let f = temp_with_ext(
            ".yaml",
            r#"
logging:
  level: debug
  json: true
jobs:
  send_email_delay_ms: 10
"#,
        );
        let cfg = load_config(Some(f.path())).expect("load");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.jobs.send_email_delay_ms, 10);
        assert_eq!(cfg.jobs.generate_report_delay_ms, 2000);
    }

    #[test]
    fn parse_json_without_extension() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(f.path(), r#"{"worker": {"consumer": "worker-a", "fetch_wait_ms": 250}}"#).unwrap();
        let raw = load_raw_from_file(f.path()).expect("load");
        let w = raw.worker.unwrap();
        assert_eq!(w.consumer.as_deref(), Some("worker-a"));
        assert_eq!(w.fetch_wait_ms, Some(250));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let f = temp_with_ext(".toml", "this is = = not toml");
        assert!(matches!(load_raw_from_file(f.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn broker_url_env_overrides() {
        for k in &["JOBLINE_REDIS_URL", "REDIS_URL"] {
            std::env::remove_var(k);
        }
        assert_eq!(load_config::<&Path>(None).unwrap().broker.url, DEFAULT_REDIS_URL);

        std::env::set_var("REDIS_URL", "redis://fallback:6379");
        assert_eq!(load_config::<&Path>(None).unwrap().broker.url, "redis://fallback:6379");

        std::env::set_var("JOBLINE_REDIS_URL", "redis://primary:6379");
        assert_eq!(load_config::<&Path>(None).unwrap().broker.url, "redis://primary:6379");

        for k in &["JOBLINE_REDIS_URL", "REDIS_URL"] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn worker_env_overrides() {
        let keys = [
            "JOBLINE_CONSUMER",
            "JOBLINE_KEY_PREFIX",
            "JOBLINE_FETCH_WAIT_MS",
            "JOBLINE_READY_TIMEOUT_MS",
            "JOBLINE_MAX_RETRIES",
        ];
        for k in &keys {
            std::env::remove_var(k);
        }

        std::env::set_var("JOBLINE_CONSUMER", "worker-7");
        std::env::set_var("JOBLINE_KEY_PREFIX", "staging");
        std::env::set_var("JOBLINE_FETCH_WAIT_MS", " 250 ");
        std::env::set_var("JOBLINE_READY_TIMEOUT_MS", "0");
        std::env::set_var("JOBLINE_MAX_RETRIES", "0");

        let cfg = load_config::<&Path>(None).expect("load config");
        assert_eq!(cfg.worker.consumer.as_deref(), Some("worker-7"));
        assert_eq!(cfg.worker.key_prefix, "staging");
        assert_eq!(cfg.worker.fetch_wait_ms, 250);
        assert_eq!(cfg.worker.ready_timeout_ms, None);
        assert_eq!(cfg.broker.max_retries, Some(0));

        for k in &keys {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn bad_env_numbers_are_parse_errors() {
        std::env::set_var("JOBLINE_TEST_NOT_A_NUMBER", "soon");
        let err = env_parse::<u64>("JOBLINE_TEST_NOT_A_NUMBER").unwrap_err();
        std::env::remove_var("JOBLINE_TEST_NOT_A_NUMBER");
        assert!(err.to_string().contains("JOBLINE_TEST_NOT_A_NUMBER"));
        assert_eq!(env_parse::<u64>("JOBLINE_TEST_UNSET").unwrap(), None);
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool("YES"), Ok(true));
        assert_eq!(parse_bool(" off "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn defaults_validate() {
        validate_config(&Config::default()).expect("defaults are valid");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.broker.url = "http://localhost:6379".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.worker.queue = "tasks:high".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.worker.consumer = Some("has space".into());
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.worker.poll_interval_ms = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.broker.backoff_max_ms = 10;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.broker.url = "rediss://user:pw@secure.example:6380".into();
        assert!(validate_config(&cfg).is_ok());
    }
}
