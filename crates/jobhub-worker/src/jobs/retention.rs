//! Retention sweep job handler — purges old terminal jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing;

use jobhub_core::config::queue::RetentionConfig;
use jobhub_database::JobStore;
use jobhub_entity::job::Job;

use crate::executor::{JobExecutionError, JobHandler};

/// Handles `retention_sweep` jobs.
///
/// Deletes terminal jobs older than the retention window. Dead-lettered
/// jobs stay inspectable unless the configuration explicitly includes
/// them in the purge. Idempotent: a repeated sweep deletes nothing new.
pub struct RetentionSweepHandler {
    store: Arc<dyn JobStore>,
    config: RetentionConfig,
}

impl std::fmt::Debug for RetentionSweepHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweepHandler")
            .field("config", &self.config)
            .finish()
    }
}

impl RetentionSweepHandler {
    /// Create a new retention sweep handler.
    pub fn new(store: Arc<dyn JobStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl JobHandler for RetentionSweepHandler {
    fn job_type(&self) -> &str {
        "retention_sweep"
    }

    async fn execute(&self, _job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let cutoff = Utc::now() - Duration::days(self.config.days);
        let purged = self
            .store
            .purge_terminal_before(cutoff, self.config.purge_dead_lettered)
            .await?;

        tracing::info!(
            purged,
            cutoff = %cutoff,
            include_dead_lettered = self.config.purge_dead_lettered,
            "Retention sweep finished"
        );

        Ok(Some(serde_json::json!({
            "purged": purged,
            "cutoff": cutoff.to_rfc3339(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobhub_database::MemoryJobStore;
    use jobhub_entity::job::{JobPriority, JobState, NewJob};

    fn terminal_job(state: JobState, age_days: i64) -> Job {
        let mut job = Job::from_new(
            NewJob {
                job_type: "send_email".to_string(),
                priority: JobPriority::Normal,
                payload: serde_json::json!({}),
                max_attempts: 3,
                available_at: None,
            },
            Utc::now() - Duration::days(age_days),
        );
        job.state = state;
        job.updated_at = Utc::now() - Duration::days(age_days);
        job
    }

    #[tokio::test]
    async fn purges_old_terminal_jobs_but_keeps_dead_letters() {
        let store = Arc::new(MemoryJobStore::new());
        let old_completed = terminal_job(JobState::Completed, 30);
        let fresh_completed = terminal_job(JobState::Completed, 1);
        let old_dead = terminal_job(JobState::DeadLettered, 30);
        for job in [&old_completed, &fresh_completed, &old_dead] {
            store.put(job).await.unwrap();
        }

        let handler = RetentionSweepHandler::new(store.clone(), RetentionConfig::default());
        let sweep_job = terminal_job(JobState::Pending, 0);
        let result = handler.execute(&sweep_job).await.unwrap().unwrap();

        assert_eq!(result["purged"], 1);
        assert!(store.get(old_completed.id).await.unwrap().is_none());
        assert!(store.get(fresh_completed.id).await.unwrap().is_some());
        assert!(store.get(old_dead.id).await.unwrap().is_some());
    }
}
