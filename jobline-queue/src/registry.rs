//! Handler registry: the dispatch table from job name to handler.
//!
//! Built once at startup through [`HandlerRegistryBuilder`] and frozen into a
//! [`HandlerRegistry`] before the worker starts. There is no way to add
//! handlers afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::JobQueueError;
use crate::handler::JobHandler;

/// Collects handlers during process initialization.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its [`job_name`](JobHandler::job_name).
    pub fn register<H: JobHandler + 'static>(&mut self, handler: H) -> Result<&mut Self, JobQueueError> {
        let name = handler.job_name().to_owned();
        if name.is_empty() {
            return Err(JobQueueError::EmptyJobName);
        }
        if self.handlers.contains_key(&name) {
            return Err(JobQueueError::DuplicateHandler(name));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }

    /// Build, failing if any of `expected` has no handler.
    pub fn build_checked(self, expected: &[&str]) -> Result<HandlerRegistry, JobQueueError> {
        let mut missing: Vec<String> = expected
            .iter()
            .filter(|name| !self.handlers.contains_key(**name))
            .map(|name| (*name).to_owned())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(JobQueueError::MissingHandlers(missing));
        }
        Ok(self.build())
    }
}

/// Immutable name-to-handler mapping shared by the worker.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_names", &self.job_names())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Look up the handler for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobHandler>, JobQueueError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| JobQueueError::UnknownJobType(name.to_owned()))
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
