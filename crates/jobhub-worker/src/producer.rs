//! Producer boundary — the entry point external callers use to submit
//! jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_entity::job::{JobPayload, JobPriority, NewJob};

use crate::queue::JobQueue;

/// Optional per-submission settings.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Attempt ceiling; defaults to the queue's configured ceiling.
    pub max_attempts: Option<i32>,
    /// Priority; defaults to `Normal`.
    pub priority: Option<JobPriority>,
    /// Hold the job back for this long before it becomes leasable.
    pub delay: Option<Duration>,
}

/// Submits jobs into the queue.
///
/// `submit` only guarantees durable acceptance into `Pending`; it never
/// executes the job, and it does not check that a handler is registered
/// for the type — an unroutable job fails fast at lease time instead.
pub struct JobProducer {
    queue: Arc<JobQueue>,
}

impl JobProducer {
    /// Create a producer over a queue.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// Submit a job with an opaque payload. Returns its id.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> AppResult<Uuid> {
        let available_at = match options.delay {
            Some(delay) => Some(
                Utc::now()
                    + chrono::Duration::from_std(delay)
                        .map_err(|_| AppError::validation("Submission delay is out of range"))?,
            ),
            None => None,
        };

        let job = self
            .queue
            .enqueue(NewJob {
                job_type: job_type.to_string(),
                priority: options.priority.unwrap_or_default(),
                payload,
                max_attempts: options
                    .max_attempts
                    .unwrap_or_else(|| self.queue.default_max_attempts()),
                available_at,
            })
            .await?;
        Ok(job.id)
    }

    /// Submit a typed payload; the job type string comes from the
    /// payload variant.
    pub async fn submit_payload(
        &self,
        payload: JobPayload,
        options: SubmitOptions,
    ) -> AppResult<Uuid> {
        let job_type = payload.job_type();
        self.submit(job_type, payload.into_value()?, options).await
    }
}
