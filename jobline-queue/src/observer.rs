//! Delivery of job events to whoever needs them.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::JobEvent;

/// Receives exactly one event per processed job, after the job has been
/// acknowledged to the broker.
pub trait JobObserver: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

/// Writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl JobObserver for LogObserver {
    fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Completed {
                job_id,
                job_name,
                result,
            } => info!(job_id = %job_id, job_name = %job_name, result = %result, "job completed"),
            JobEvent::Failed {
                job_id,
                job_name,
                error_message,
            } => warn!(job_id = %job_id, job_name = %job_name, error = %error_message, "job failed"),
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobObserver for ChannelObserver {
    fn on_event(&self, event: &JobEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Fans one event out to several observers, in order.
#[derive(Default)]
pub struct Observers(Vec<Box<dyn JobObserver>>);

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl JobObserver + 'static) -> Self {
        self.0.push(Box::new(observer));
        self
    }
}

impl JobObserver for Observers {
    fn on_event(&self, event: &JobEvent) {
        for observer in &self.0 {
            observer.on_event(event);
        }
    }
}
