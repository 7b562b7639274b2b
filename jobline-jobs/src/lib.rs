//! Built-in job handlers for the jobline worker.
//!
//! This crate provides implementations of the
//! [`JobHandler`](jobline_queue::JobHandler) trait for the job names the
//! worker serves out of the box.
//!
//! # Job Names
//!
//! - `send-email` - simulated email delivery, returns `{"status": "sent"}`
//! - `generate-report` - simulated report generation, returns `{"status": "report_ready"}`
//!
//! # Usage
//!
//! ```rust,no_run
//! use jobline_jobs::{job_names, register_all_handlers, HandlerDelays};
//! use jobline_queue::HandlerRegistry;
//!
//! let mut builder = HandlerRegistry::builder();
//! register_all_handlers(&mut builder, HandlerDelays::default()).unwrap();
//! let registry = builder.build_checked(job_names::ALL).unwrap();
//! assert_eq!(registry.len(), 2);
//! ```

mod email;
mod error;
mod report;

use std::time::Duration;

pub use email::{SendEmailHandler, SendEmailPayload};
pub use error::JobError;
pub use report::{GenerateReportHandler, GenerateReportPayload};

use jobline_queue::{HandlerRegistryBuilder, JobQueueError};

/// Simulated processing time per built-in job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerDelays {
    pub send_email: Duration,
    pub generate_report: Duration,
}

impl Default for HandlerDelays {
    fn default() -> Self {
        Self {
            send_email: SendEmailHandler::DEFAULT_DELAY,
            generate_report: GenerateReportHandler::DEFAULT_DELAY,
        }
    }
}

/// Register every built-in handler with the registry builder.
pub fn register_all_handlers(builder: &mut HandlerRegistryBuilder, delays: HandlerDelays) -> Result<(), JobQueueError> {
    builder
        .register(SendEmailHandler::with_delay(delays.send_email))?
        .register(GenerateReportHandler::with_delay(delays.generate_report))?;
    Ok(())
}

/// Job name constants for type-safe job references.
pub mod job_names {
    pub const SEND_EMAIL: &str = "send-email";
    pub const GENERATE_REPORT: &str = "generate-report";

    /// Every name the built-in handlers cover.
    pub const ALL: &[&str] = &[SEND_EMAIL, GENERATE_REPORT];
}
