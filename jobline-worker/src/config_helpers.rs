use std::time::Duration;

use jobline_broker::BrokerConfig;
use jobline_config::Config;
use jobline_jobs::HandlerDelays;
use jobline_queue::EngineSettings;

/// Build the broker connection config from application config.
pub fn broker_config_from_config(cfg: &Config) -> BrokerConfig {
    BrokerConfig {
        url: cfg.broker.url.clone(),
        backoff_step_ms: cfg.broker.backoff_step_ms,
        backoff_max_ms: cfg.broker.backoff_max_ms,
        max_retries: cfg.broker.max_retries,
        connect_timeout_ms: cfg.broker.connect_timeout_ms,
    }
}

/// Build worker/queue tunables from application config.
///
/// Without a configured consumer name the host-derived default is used, so a
/// restarted worker on the same host reclaims the jobs it left in flight.
pub fn engine_settings_from_config(cfg: &Config) -> EngineSettings {
    let defaults = EngineSettings::default();
    EngineSettings {
        queue_name: cfg.worker.queue.clone(),
        consumer_name: cfg.worker.consumer.clone().unwrap_or(defaults.consumer_name),
        fetch_wait: Duration::from_millis(cfg.worker.fetch_wait_ms),
        job_timeout: cfg.worker.job_timeout_ms.map(Duration::from_millis),
        shutdown_grace: cfg.worker.shutdown_grace_ms.map(Duration::from_millis),
        ready_timeout: cfg.worker.ready_timeout_ms.map(Duration::from_millis),
    }
}

pub fn handler_delays_from_config(cfg: &Config) -> HandlerDelays {
    HandlerDelays {
        send_email: Duration::from_millis(cfg.jobs.send_email_delay_ms),
        generate_report: Duration::from_millis(cfg.jobs.generate_report_delay_ms),
    }
}

pub fn poll_interval_from_config(cfg: &Config) -> Duration {
    Duration::from_millis(cfg.worker.poll_interval_ms)
}
