//! Job queue: lease-based dispatch, retry policy, reclaim, and
//! cancellation over a [`JobStore`].
//!
//! The queue owns policy; the store owns records. Every transition goes
//! through the store's compare-and-swap, so a lost race surfaces here
//! as a `Conflict` and is translated into a silent abandon where the
//! contract requires one (a worker must never double-report).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing;
use uuid::Uuid;

use jobhub_core::config::queue::QueueConfig;
use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::types::pagination::{PageRequest, PageResponse};
use jobhub_database::JobStore;
use jobhub_entity::job::{Job, JobState, JobStateCounts, JobUpdate, NewJob};

use crate::backoff::RetryPolicy;
use crate::executor::JobExecutionError;

/// Outcome of reporting a failed execution.
#[derive(Debug, Clone, PartialEq)]
pub enum FailDisposition {
    /// The job will be retried once the backoff delay elapses.
    Retrying {
        /// When the job becomes eligible again.
        available_at: DateTime<Utc>,
    },
    /// The job exhausted its budget or failed permanently.
    DeadLettered,
    /// The handler aborted on a cancellation request.
    Cancelled,
    /// The lease was lost to a reclaim; another worker owns the outcome.
    LostLease,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was removed from the queue before execution.
    Cancelled,
    /// The job is executing; cancellation was requested cooperatively.
    CancelRequested,
    /// The job had already reached a terminal state.
    AlreadyTerminal,
}

/// Queue depth and lease observability surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of jobs per state.
    pub counts: JobStateCounts,
    /// Number of unexpired leases.
    pub active_leases: i64,
}

/// The job queue.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
    retry: RetryPolicy,
}

impl JobQueue {
    /// Create a queue over a store.
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        Self {
            store,
            config,
            retry,
        }
    }

    /// The configured lease duration.
    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.config.lease_ttl_seconds as i64)
    }

    /// The configured lease duration as a std `Duration`, for timeouts.
    pub fn lease_ttl_std(&self) -> StdDuration {
        StdDuration::from_secs(self.config.lease_ttl_seconds)
    }

    /// The configured reclaimer pass interval.
    pub fn reclaim_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.config.reclaim_interval_ms)
    }

    /// The default attempt ceiling for submissions without one.
    pub fn default_max_attempts(&self) -> i32 {
        self.config.default_max_attempts
    }

    /// Durably accept a job into `Pending`. Never blocks on execution.
    pub async fn enqueue(&self, new: NewJob) -> AppResult<Job> {
        if new.job_type.trim().is_empty() {
            return Err(AppError::validation("Job type must not be empty"));
        }
        if new.max_attempts < 1 {
            return Err(AppError::validation("max_attempts must be at least 1"));
        }

        let job = Job::from_new(new, Utc::now());
        self.store.put(&job).await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            max_attempts = job.max_attempts,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Lease the next eligible job for `worker_id`.
    pub async fn lease_next(&self, worker_id: &str) -> AppResult<Option<Job>> {
        let job = self
            .store
            .lease_next(worker_id, self.lease_ttl(), Utc::now())
            .await?;
        if let Some(job) = &job {
            tracing::debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                worker_id,
                "Job leased"
            );
        }
        Ok(job)
    }

    /// Move a leased job into `Running`, consuming one attempt.
    ///
    /// Returns `None` without starting when the job cannot run: a
    /// cancellation was requested while it waited, or an expired-lease
    /// reclaim already spent its final attempt. A `Conflict` error
    /// means the lease was lost; the caller abandons the job.
    pub async fn start(&self, job: &Job, worker_id: &str) -> AppResult<Option<Job>> {
        if job.cancel_requested {
            self.store
                .update_state(
                    job.id,
                    JobState::Leased,
                    Some(worker_id),
                    JobState::Cancelled,
                    JobUpdate {
                        clear_worker: true,
                        clear_lease: true,
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!(job_id = %job.id, "Job cancelled before start");
            return Ok(None);
        }

        if !job.can_retry() {
            self.store
                .update_state(
                    job.id,
                    JobState::Leased,
                    Some(worker_id),
                    JobState::DeadLettered,
                    JobUpdate {
                        last_error: Some(format!(
                            "Retry budget exhausted after lease reclaim ({} attempts)",
                            job.attempts
                        )),
                        clear_worker: true,
                        clear_lease: true,
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "Job dead-lettered: no retry budget left"
            );
            return Ok(None);
        }

        let running = self
            .store
            .update_state(
                job.id,
                JobState::Leased,
                Some(worker_id),
                JobState::Running,
                JobUpdate {
                    increment_attempts: true,
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(Some(running))
    }

    /// Report a successful execution. Returns `false` when the lease was
    /// lost and the outcome was abandoned.
    pub async fn complete(
        &self,
        job: &Job,
        worker_id: &str,
        result: Option<serde_json::Value>,
    ) -> AppResult<bool> {
        let outcome = self
            .store
            .update_state(
                job.id,
                JobState::Running,
                Some(worker_id),
                JobState::Completed,
                JobUpdate {
                    result,
                    clear_worker: true,
                    clear_lease: true,
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;

        match outcome {
            Ok(done) => {
                tracing::info!(
                    job_id = %done.id,
                    job_type = %done.job_type,
                    attempts = done.attempts,
                    "Job completed"
                );
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(job_id = %job.id, worker_id, "Lost lease; completion abandoned");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Report a failed execution and apply the retry policy.
    pub async fn fail(
        &self,
        job: &Job,
        worker_id: &str,
        error: &JobExecutionError,
    ) -> AppResult<FailDisposition> {
        let outcome = match error {
            JobExecutionError::Cancelled => {
                self.finish_cancelled(job, worker_id).await?;
                return Ok(FailDisposition::Cancelled);
            }
            JobExecutionError::Permanent(_) => self.dead_letter_running(job, worker_id, error).await,
            JobExecutionError::Transient(_) | JobExecutionError::Internal(_) => {
                if job.can_retry() {
                    self.schedule_retry(job, worker_id, error).await
                } else {
                    self.dead_letter_running(job, worker_id, error).await
                }
            }
        };

        match outcome {
            Ok(disposition) => Ok(disposition),
            Err(e) if e.is_conflict() => {
                tracing::debug!(job_id = %job.id, worker_id, "Lost lease; failure abandoned");
                Ok(FailDisposition::LostLease)
            }
            Err(e) => Err(e),
        }
    }

    async fn schedule_retry(
        &self,
        job: &Job,
        worker_id: &str,
        error: &JobExecutionError,
    ) -> AppResult<FailDisposition> {
        let delay = self.retry.delay(job.attempts);
        let available_at =
            Utc::now() + Duration::from_std(delay).unwrap_or_else(|_| Duration::days(365));
        self.store
            .update_state(
                job.id,
                JobState::Running,
                Some(worker_id),
                JobState::Retrying,
                JobUpdate {
                    last_error: Some(error.to_string()),
                    available_at: Some(available_at),
                    clear_worker: true,
                    clear_lease: true,
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(
            job_id = %job.id,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Job failed; retry scheduled"
        );
        Ok(FailDisposition::Retrying { available_at })
    }

    async fn dead_letter_running(
        &self,
        job: &Job,
        worker_id: &str,
        error: &JobExecutionError,
    ) -> AppResult<FailDisposition> {
        self.store
            .update_state(
                job.id,
                JobState::Running,
                Some(worker_id),
                JobState::DeadLettered,
                JobUpdate {
                    last_error: Some(error.to_string()),
                    clear_worker: true,
                    clear_lease: true,
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        tracing::error!(
            job_id = %job.id,
            attempts = job.attempts,
            error = %error,
            "Job dead-lettered"
        );
        Ok(FailDisposition::DeadLettered)
    }

    async fn finish_cancelled(&self, job: &Job, worker_id: &str) -> AppResult<()> {
        match self
            .store
            .update_state(
                job.id,
                JobState::Running,
                Some(worker_id),
                JobState::Cancelled,
                JobUpdate {
                    clear_worker: true,
                    clear_lease: true,
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(_) => {
                tracing::info!(job_id = %job.id, "Job cancelled cooperatively");
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Dead-letter a leased job that has no registered handler. Does not
    /// consume an attempt: no amount of retrying fixes an unregistered
    /// type. Returns `false` when the lease was lost first.
    pub async fn dead_letter_unroutable(
        &self,
        job: &Job,
        worker_id: &str,
        reason: &str,
    ) -> AppResult<bool> {
        let outcome = self
            .store
            .update_state(
                job.id,
                JobState::Leased,
                Some(worker_id),
                JobState::DeadLettered,
                JobUpdate {
                    last_error: Some(reason.to_string()),
                    clear_worker: true,
                    clear_lease: true,
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;

        match outcome {
            Ok(_) => {
                tracing::error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    reason,
                    "Job dead-lettered: unroutable"
                );
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Cancel a job.
    ///
    /// A job that is not executing (`Pending`, `Retrying`) is removed
    /// outright. An executing job (`Leased`, `Running`) only gets a
    /// cancellation request: interruption is cooperative and depends on
    /// the handler polling [`cancel_requested`](Self::cancel_requested).
    pub async fn cancel(&self, id: Uuid) -> AppResult<CancelOutcome> {
        let job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

        match job.state {
            JobState::Pending | JobState::Retrying => {
                let outcome = self
                    .store
                    .update_state(
                        id,
                        job.state,
                        None,
                        JobState::Cancelled,
                        JobUpdate {
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await;
                match outcome {
                    Ok(_) => {
                        tracing::info!(job_id = %id, "Job cancelled");
                        Ok(CancelOutcome::Cancelled)
                    }
                    // Leased in the meantime; fall back to a request.
                    Err(e) if e.is_conflict() => match self.store.request_cancel(id).await {
                        Ok(_) => Ok(CancelOutcome::CancelRequested),
                        Err(e) if e.is_conflict() => Ok(CancelOutcome::AlreadyTerminal),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                }
            }
            JobState::Leased | JobState::Running => {
                self.store.request_cancel(id).await?;
                tracing::info!(job_id = %id, "Cancellation requested for executing job");
                Ok(CancelOutcome::CancelRequested)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    /// Whether cancellation has been requested for a job. Cooperative
    /// handlers poll this during long executions.
    pub async fn cancel_requested(&self, id: Uuid) -> AppResult<bool> {
        Ok(self
            .store
            .get(id)
            .await?
            .is_some_and(|job| job.cancel_requested))
    }

    /// Force a live, non-executing job into terminal `Failed`. Operator
    /// surface; the retry policy never produces this state.
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> AppResult<Job> {
        let job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

        if !matches!(job.state, JobState::Running | JobState::Retrying) {
            return Err(AppError::conflict(format!(
                "Job {id} is {}; only running or retrying jobs can be force-failed",
                job.state
            )));
        }

        self.store
            .update_state(
                id,
                job.state,
                None,
                JobState::Failed,
                JobUpdate {
                    last_error: Some(reason.to_string()),
                    clear_worker: true,
                    clear_lease: true,
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    /// One reclaimer pass: return expired leases to `Pending` and
    /// promote due retries.
    ///
    /// Each expired lease is compare-and-swapped individually, so when
    /// several reclaimers race, every expiry is reclaimed exactly once;
    /// the losers observe `Conflict` and skip. The worker may simply
    /// have crashed, so the reclaim bumps `reclaims`, never `attempts`.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<ReclaimReport> {
        let mut reclaimed = 0;
        for job in self.store.find_expired_leases(now).await? {
            let outcome = self
                .store
                .update_state(
                    job.id,
                    job.state,
                    None,
                    JobState::Pending,
                    JobUpdate {
                        increment_reclaims: true,
                        clear_worker: true,
                        clear_lease: true,
                        ..Default::default()
                    },
                )
                .await;
            match outcome {
                Ok(_) => {
                    tracing::warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        worker_id = job.worker_id.as_deref().unwrap_or(""),
                        reclaims = job.reclaims + 1,
                        "Expired lease reclaimed"
                    );
                    reclaimed += 1;
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        let promoted = self.store.promote_due(now).await?;
        Ok(ReclaimReport {
            reclaimed,
            promoted,
        })
    }

    /// Queue depth per state, active lease count, dead-letter count.
    pub async fn stats(&self, now: DateTime<Utc>) -> AppResult<QueueStats> {
        Ok(QueueStats {
            counts: self.store.counts_by_state().await?,
            active_leases: self.store.active_lease_count(now).await?,
        })
    }

    /// Page through dead-lettered jobs for inspection.
    pub async fn list_dead_lettered(&self, page: &PageRequest) -> AppResult<PageResponse<Job>> {
        self.store.list_dead_lettered(page).await
    }
}

/// Result of one reclaimer pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReclaimReport {
    /// Expired leases returned to `Pending`.
    pub reclaimed: u64,
    /// Due retries promoted to `Pending`.
    pub promoted: u64,
}
