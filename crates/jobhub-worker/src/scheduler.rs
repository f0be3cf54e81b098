//! Cron scheduler for periodic maintenance jobs.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use jobhub_core::config::queue::RetentionConfig;
use jobhub_core::error::AppError;
use jobhub_entity::job::{JobPayload, JobPriority};

use crate::producer::{JobProducer, SubmitOptions};

/// Cron-based scheduler that enqueues periodic maintenance work.
///
/// The scheduler is a producer like any other: it submits jobs through
/// the normal boundary and the worker pool executes them.
pub struct CronScheduler {
    /// The underlying job scheduler.
    scheduler: JobScheduler,
    /// Producer for enqueuing scheduled work.
    producer: Arc<JobProducer>,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").finish()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler.
    pub async fn new(producer: Arc<JobProducer>) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            producer,
        })
    }

    /// Retention sweep on the configured schedule.
    pub async fn register_retention_sweep(
        &self,
        config: &RetentionConfig,
    ) -> Result<(), AppError> {
        let producer = Arc::clone(&self.producer);
        let job = CronJob::new_async(config.schedule.as_str(), move |_uuid, _lock| {
            let producer = Arc::clone(&producer);
            Box::pin(async move {
                tracing::debug!("Scheduling retention sweep job");
                let options = SubmitOptions {
                    max_attempts: Some(1),
                    priority: Some(JobPriority::Low),
                    delay: None,
                };
                if let Err(e) = producer
                    .submit_payload(JobPayload::RetentionSweep, options)
                    .await
                {
                    tracing::error!("Failed to enqueue retention_sweep: {}", e);
                }
            })
        })
        .map_err(|e| {
            AppError::internal(format!("Failed to create retention_sweep schedule: {}", e))
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add retention_sweep schedule: {}", e))
        })?;

        tracing::info!("Registered: retention_sweep ({})", config.schedule);
        Ok(())
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
