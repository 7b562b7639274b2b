use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "jobline-worker", version, about = "Consumes jobs from the shared broker")]
pub struct CliArgs {
    /// Path to configuration file (overrides JOBLINE_CONFIG_PATH env var)
    #[arg(short = 'c', long = "config-path", env = "JOBLINE_CONFIG_PATH", global = true)]
    pub config_path: Option<PathBuf>,

    /// Use the in-process broker instead of Redis
    #[arg(long, global = true)]
    pub in_memory: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the worker until SIGTERM or Ctrl+C (default)
    Run,
    /// Ping the broker once without retrying
    Check,
    /// Enqueue one job and print its id
    ///
    /// With --in-memory the job is executed in this process instead and the
    /// resulting event is printed.
    Enqueue {
        /// Job name, e.g. send-email
        name: String,
        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,
    },
}

impl CliArgs {
    /// The subcommand to execute, `run` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let args = CliArgs::try_parse_from(["jobline-worker"]).unwrap();
        assert_eq!(args.command(), Command::Run);
        assert!(!args.in_memory);
    }

    #[test]
    fn parses_enqueue_with_global_flags() {
        let args = CliArgs::try_parse_from([
            "jobline-worker",
            "enqueue",
            "send-email",
            r#"{"to":"a@b.com"}"#,
            "--in-memory",
            "-c",
            "worker.toml",
        ])
        .unwrap();
        assert!(args.in_memory);
        assert_eq!(args.config_path, Some(PathBuf::from("worker.toml")));
        assert_eq!(
            args.command(),
            Command::Enqueue {
                name: "send-email".into(),
                payload: r#"{"to":"a@b.com"}"#.into(),
            }
        );
    }

    #[test]
    fn enqueue_payload_defaults_to_empty_object() {
        let args = CliArgs::try_parse_from(["jobline-worker", "enqueue", "generate-report"]).unwrap();
        match args.command() {
            Command::Enqueue { payload, .. } => assert_eq!(payload, "{}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
