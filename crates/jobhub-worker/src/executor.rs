//! Handler registry — maps job types to their handler implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing;

use jobhub_core::error::AppError;
use jobhub_entity::job::Job;

/// Trait for job handler implementations.
///
/// Delivery is at-least-once: a handler may see the same job again
/// after a worker crash and lease reclaim. Implementations must be
/// idempotent under re-execution, or carry a dedupe key in the payload.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Get the job type this handler processes.
    fn job_type(&self) -> &str;

    /// Execute the job with its payload.
    async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job execution.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure — dead-letter without retrying.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure — retried per the backoff policy.
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// The handler observed a cancellation request and aborted.
    #[error("Job aborted on cancellation request")]
    Cancelled,

    /// Internal error — treated as transient.
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

/// Registry dispatching jobs to the appropriate handler by job type.
#[derive(Debug, Default)]
pub struct JobExecutor {
    /// Registered job handlers by type.
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler. A later registration for the same type
    /// replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        tracing::info!("Registered job handler for type '{}'", job_type);
        self.handlers.insert(job_type, handler);
    }

    /// Resolve the handler for a job type.
    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a handler is registered for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Get the list of registered job types.
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        fn job_type(&self) -> &str {
            "noop"
        }

        async fn execute(&self, _job: &Job) -> Result<Option<Value>, JobExecutionError> {
            Ok(None)
        }
    }

    #[test]
    fn resolves_registered_types_only() {
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(NoopHandler));

        assert!(executor.has_handler("noop"));
        assert!(executor.resolve("noop").is_some());
        assert!(executor.resolve("unknown").is_none());
        assert_eq!(executor.registered_types(), vec!["noop".to_string()]);
    }
}
