//! Shared helpers for integration tests.
//!
//! Tests run against the in-memory store with aggressive timing so the
//! full lease/retry/reclaim lifecycle plays out in milliseconds.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use jobhub_core::config::queue::{QueueConfig, RetryConfig};
use jobhub_core::config::worker::WorkerConfig;
use jobhub_database::MemoryJobStore;
use jobhub_entity::job::Job;
use jobhub_worker::{JobExecutionError, JobExecutor, JobHandler, JobProducer, JobQueue, WorkerPool};

/// Queue configuration with test-friendly timing: 1s leases, 50ms
/// reclaim passes, 10ms deterministic backoff.
pub fn queue_config() -> QueueConfig {
    QueueConfig {
        lease_ttl_seconds: 1,
        reclaim_interval_ms: 50,
        default_max_attempts: 3,
        retry: RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_ratio: 0.0,
        },
        retention: Default::default(),
    }
}

/// A queue over a fresh in-memory store.
pub fn test_queue() -> Arc<JobQueue> {
    Arc::new(JobQueue::new(
        Arc::new(MemoryJobStore::new()),
        queue_config(),
    ))
}

pub fn producer(queue: &Arc<JobQueue>) -> JobProducer {
    JobProducer::new(Arc::clone(queue))
}

/// Start a worker pool over `queue`; returns the shutdown sender and
/// the pool task handle.
pub fn spawn_pool(
    queue: &Arc<JobQueue>,
    executor: JobExecutor,
    concurrency: usize,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let config = WorkerConfig {
        enabled: true,
        concurrency,
        poll_interval_ms: 10,
        id_prefix: "test".to_string(),
    };
    let pool = WorkerPool::new(Arc::clone(queue), Arc::new(executor), config);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        pool.run(rx).await;
    });
    (tx, handle)
}

/// Poll until the job reaches a terminal state, or panic after 15s.
pub async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let job = queue
            .get(id)
            .await
            .expect("store failure while polling")
            .expect("job disappeared while polling");
        if job.state.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {id} still {} after 15s", job.state);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Fails with a transient error a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyHandler {
    failures_before_success: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    fn job_type(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, _job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures_before_success {
            Err(JobExecutionError::Transient(format!(
                "simulated failure on call {call}"
            )))
        } else {
            Ok(Some(serde_json::json!({ "succeeded_on_call": call })))
        }
    }
}

/// Always fails permanently.
#[derive(Debug)]
pub struct PermanentFailureHandler;

#[async_trait]
impl JobHandler for PermanentFailureHandler {
    fn job_type(&self) -> &str {
        "permanent"
    }

    async fn execute(&self, _job: &Job) -> Result<Option<Value>, JobExecutionError> {
        Err(JobExecutionError::Permanent(
            "simulated permanent failure".to_string(),
        ))
    }
}
