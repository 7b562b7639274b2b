//! Worker process for the jobline job queue.
//!
//! The binary loads configuration, installs tracing, and either runs the
//! worker until a termination signal arrives or executes one of the helper
//! commands (`check`, `enqueue`). The pieces are exposed here so the
//! integration tests can drive the same assembly the binary uses.

pub mod cli;
pub mod config_helpers;
pub mod engine;
pub mod tracing_setup;

pub use engine::{
    build_context, build_lifecycle, build_registry, check_broker, enqueue_job, run_job_locally, run_worker, Backend,
};
