use jobline_config::LoggingConfig;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level.
fn filter_directive(cfg: &LoggingConfig, rust_log: Option<String>) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| cfg.level.clone())
}

/// Initialize tracing from configuration.
///
/// Fails if a global subscriber is already installed.
pub fn install_tracing_from_config(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let directive = filter_directive(cfg, std::env::var("RUST_LOG").ok());
    let env_filter = EnvFilter::new(&directive);

    let installed = if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_timer(ChronoUtc::rfc_3339())
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.into(),
            json: false,
        }
    }

    #[test]
    fn rust_log_overrides_configured_level() {
        let cfg = logging("info");
        assert_eq!(filter_directive(&cfg, None), "info");
        assert_eq!(
            filter_directive(&cfg, Some("jobline_queue=debug".into())),
            "jobline_queue=debug"
        );
        assert_eq!(filter_directive(&cfg, Some("  ".into())), "info");
    }
}
