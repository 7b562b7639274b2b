//! Jobline worker
//!
//! Entry point for the worker process: configuration loading, tracing
//! setup, and the run/check/enqueue commands.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use jobline_config::{load_config, validate_config};
use jobline_worker::cli::{CliArgs, Command};
use jobline_worker::tracing_setup::install_tracing_from_config;
use jobline_worker::{check_broker, enqueue_job, run_job_locally, run_worker, Backend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = load_config(args.config_path.as_deref())
        .with_context(|| format!("failed to load config from {:?}", args.config_path))?;
    validate_config(&config).context("invalid configuration")?;

    install_tracing_from_config(&config.logging)?;
    let backend = Backend::from_flag(args.in_memory);

    match args.command() {
        Command::Run => {
            let report = run_worker(&config, backend, shutdown_signal()).await?;
            if report.forced {
                anyhow::bail!("shutdown grace period expired with a job still running");
            }
            info!(jobs_processed = report.jobs_processed, "worker exited cleanly");
        }
        Command::Check => {
            let latency = check_broker(&config, &backend).await?;
            println!("ok ({} ms)", latency.as_millis());
        }
        Command::Enqueue { name, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            match backend {
                Backend::Redis => {
                    let submitted = enqueue_job(&config, &name, payload).await?;
                    println!("{}", submitted.job_id);
                }
                Backend::Memory(_) => {
                    let event = run_job_locally(&config, &name, payload).await?;
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
        }
    }

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
