//! Worker pool — concurrent loops that lease, execute, and report jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing;

use jobhub_core::config::worker::WorkerConfig;
use jobhub_entity::job::Job;

use crate::executor::{JobExecutionError, JobExecutor};
use crate::queue::JobQueue;

/// How long shutdown waits for in-flight jobs before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A pool of independent worker loops over one queue.
///
/// Each loop holds at most one lease at a time; the queue's
/// compare-and-swap leasing is the only synchronization point, so the
/// loops need no coordination with each other. A reclaimer task runs
/// alongside them, returning expired leases to `Pending` and promoting
/// due retries.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    config: WorkerConfig,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(queue: Arc<JobQueue>, executor: Arc<JobExecutor>, config: WorkerConfig) -> Self {
        Self {
            queue,
            executor,
            config,
        }
    }

    /// Run the pool until the cancel signal flips to `true`.
    ///
    /// Returns after in-flight jobs drain (bounded by a 30s timeout);
    /// jobs still executing past that point will finish or be reclaimed
    /// once their lease expires.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            lease_ttl_secs = self.queue.lease_ttl_std().as_secs(),
            "Worker pool started"
        );

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut workers = Vec::with_capacity(self.config.concurrency);
        for index in 0..self.config.concurrency {
            let worker_id = format!("{}-{}-{}", self.config.id_prefix, std::process::id(), index);
            workers.push(tokio::spawn(worker_loop(
                Arc::clone(&self.queue),
                Arc::clone(&self.executor),
                worker_id,
                poll_interval,
                cancel.clone(),
            )));
        }

        let reclaimer = tokio::spawn(reclaim_loop(Arc::clone(&self.queue), cancel.clone()));

        // Wait for the shutdown signal, then drain.
        while !stopping(&cancel) {
            if cancel.changed().await.is_err() {
                break;
            }
        }
        tracing::info!("Worker pool draining in-flight jobs...");

        if tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(workers))
            .await
            .is_err()
        {
            tracing::warn!(
                "Worker pool drain timed out; in-flight jobs will be reclaimed after lease expiry"
            );
        }
        let _ = reclaimer.await;

        tracing::info!("Worker pool stopped");
    }
}

/// Whether the cancel signal says to stop (or the sender went away).
fn stopping(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn worker_loop(
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    worker_id: String,
    poll_interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    tracing::debug!(worker_id = %worker_id, "Worker started");

    loop {
        if stopping(&cancel) {
            break;
        }

        match queue.lease_next(&worker_id).await {
            Ok(Some(job)) => {
                process_leased(&queue, &executor, &worker_id, job).await;
            }
            Ok(None) => {
                // Bounded wait so shutdown and reclaim stay live.
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || stopping(&cancel) {
                            break;
                        }
                    }
                    _ = sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                // Store unavailability is operational, not job-level:
                // back off and retry the lease ourselves.
                tracing::error!(worker_id = %worker_id, error = %e, "Failed to lease job; backing off");
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || stopping(&cancel) {
                            break;
                        }
                    }
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }

    tracing::debug!(worker_id = %worker_id, "Worker stopped");
}

async fn process_leased(
    queue: &JobQueue,
    executor: &JobExecutor,
    worker_id: &str,
    job: Job,
) {
    let Some(handler) = executor.resolve(&job.job_type) else {
        let reason = format!("No handler registered for job type '{}'", job.job_type);
        if let Err(e) = queue.dead_letter_unroutable(&job, worker_id, &reason).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to dead-letter unroutable job");
        }
        return;
    };

    let running = match queue.start(&job, worker_id).await {
        Ok(Some(running)) => running,
        // Cancelled or out of budget; the queue already recorded it.
        Ok(None) => return,
        Err(e) if e.is_conflict() => {
            tracing::debug!(job_id = %job.id, worker_id, "Lost lease before start");
            return;
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Failed to start job");
            return;
        }
    };

    tracing::info!(
        job_id = %running.id,
        job_type = %running.job_type,
        attempt = running.attempts,
        max_attempts = running.max_attempts,
        worker_id,
        "Executing job"
    );

    // Bound execution by the lease: past the TTL the job is reclaimable
    // anyway, so letting the handler run on would only race its twin.
    let outcome = tokio::time::timeout(queue.lease_ttl_std(), handler.execute(&running)).await;

    let report = match outcome {
        Ok(Ok(result)) => queue.complete(&running, worker_id, result).await.map(|_| ()),
        Ok(Err(error)) => queue.fail(&running, worker_id, &error).await.map(|_| ()),
        Err(_elapsed) => {
            let error = JobExecutionError::Transient(format!(
                "Execution exceeded the {}s lease",
                queue.lease_ttl_std().as_secs()
            ));
            queue.fail(&running, worker_id, &error).await.map(|_| ())
        }
    };

    if let Err(e) = report {
        tracing::error!(job_id = %running.id, error = %e, "Failed to report job outcome");
    }
}

async fn reclaim_loop(queue: Arc<JobQueue>, mut cancel: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(queue.reclaim_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match queue.reclaim_expired(Utc::now()).await {
                    Ok(report) => {
                        if report.reclaimed > 0 || report.promoted > 0 {
                            tracing::info!(
                                reclaimed = report.reclaimed,
                                promoted = report.promoted,
                                "Reclaimer pass finished"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reclaimer pass failed");
                    }
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || stopping(&cancel) {
                    break;
                }
            }
        }
    }
}
