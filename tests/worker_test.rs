//! End-to-end tests: worker pool executing jobs against the in-memory
//! store, including retries, dead-lettering, and lease reclaim.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use jobhub_entity::job::JobState;
use jobhub_worker::{JobExecutor, SubmitOptions};

use helpers::{FlakyHandler, PermanentFailureHandler};

#[tokio::test]
async fn flaky_job_fails_twice_then_completes_on_third_lease() {
    let queue = helpers::test_queue();
    let producer = helpers::producer(&queue);

    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::new(2)));
    let (shutdown, pool) = helpers::spawn_pool(&queue, executor, 2);

    let job_id = producer
        .submit(
            "flaky",
            json!({"email": "a@x.com"}),
            SubmitOptions {
                max_attempts: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let job = helpers::wait_for_terminal(&queue, job_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.result.unwrap()["succeeded_on_call"], 3);

    let _ = shutdown.send(true);
    pool.await.unwrap();
}

#[tokio::test]
async fn unregistered_type_dead_letters_without_consuming_attempts() {
    let queue = helpers::test_queue();
    let producer = helpers::producer(&queue);

    let (shutdown, pool) = helpers::spawn_pool(&queue, JobExecutor::new(), 1);

    let job_id = producer
        .submit("unknown", json!({}), SubmitOptions::default())
        .await
        .unwrap();

    let job = helpers::wait_for_terminal(&queue, job_id).await;
    assert_eq!(job.state, JobState::DeadLettered);
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.unwrap().contains("No handler registered"));

    let _ = shutdown.send(true);
    pool.await.unwrap();
}

#[tokio::test]
async fn permanent_failure_dead_letters_on_the_first_attempt() {
    let queue = helpers::test_queue();
    let producer = helpers::producer(&queue);

    let mut executor = JobExecutor::new();
    executor.register(Arc::new(PermanentFailureHandler));
    let (shutdown, pool) = helpers::spawn_pool(&queue, executor, 1);

    let job_id = producer
        .submit(
            "permanent",
            json!({}),
            SubmitOptions {
                max_attempts: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let job = helpers::wait_for_terminal(&queue, job_id).await;
    assert_eq!(job.state, JobState::DeadLettered);
    assert_eq!(job.attempts, 1, "no retry budget is spent on retrying");

    let _ = shutdown.send(true);
    pool.await.unwrap();
}

#[tokio::test]
async fn transient_exhaustion_dead_letters_after_max_attempts() {
    let queue = helpers::test_queue();
    let producer = helpers::producer(&queue);

    let mut executor = JobExecutor::new();
    // Never succeeds within the budget.
    executor.register(Arc::new(FlakyHandler::new(u32::MAX)));
    let (shutdown, pool) = helpers::spawn_pool(&queue, executor, 1);

    let job_id = producer
        .submit(
            "flaky",
            json!({}),
            SubmitOptions {
                max_attempts: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let job = helpers::wait_for_terminal(&queue, job_id).await;
    assert_eq!(job.state, JobState::DeadLettered);
    assert_eq!(job.attempts, 2);

    let _ = shutdown.send(true);
    pool.await.unwrap();
}

#[tokio::test]
async fn abandoned_lease_is_reclaimed_and_executed_elsewhere() {
    let queue = helpers::test_queue();
    let producer = helpers::producer(&queue);

    let job_id = producer
        .submit("flaky", json!({}), SubmitOptions::default())
        .await
        .unwrap();

    // A worker leases the job and crashes without ever starting it.
    let ghost = queue.lease_next("ghost-worker").await.unwrap().unwrap();
    assert_eq!(ghost.id, job_id);

    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::new(0)));
    let (shutdown, pool) = helpers::spawn_pool(&queue, executor, 1);

    // After the 1s lease TTL plus a reclaim pass, the pool picks it up.
    let job = helpers::wait_for_terminal(&queue, job_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.reclaims, 1);
    assert_eq!(job.attempts, 1, "the abandoned lease consumed no attempt");

    let _ = shutdown.send(true);
    pool.await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_and_stops_the_pool() {
    let queue = helpers::test_queue();

    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::new(0)));
    let (shutdown, pool) = helpers::spawn_pool(&queue, executor, 4);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown.send(true);

    tokio::time::timeout(Duration::from_secs(5), pool)
        .await
        .expect("pool did not stop after shutdown")
        .unwrap();
}
