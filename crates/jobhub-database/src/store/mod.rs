//! The job store: the single source of truth for what work exists and
//! in what state.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use jobhub_core::result::AppResult;
use jobhub_core::types::pagination::{PageRequest, PageResponse};
use jobhub_entity::job::{Job, JobState, JobStateCounts, JobUpdate};

/// Durable, shared mapping from job id to job state.
///
/// The store exclusively owns job records. All mutation goes through
/// [`update_state`](JobStore::update_state), a compare-and-swap on the
/// stored state (and, when given, the lease holder): two workers racing
/// on the same job always have exactly one winner, and the loser
/// observes a `Conflict` error.
///
/// [`PgJobStore`](postgres::PgJobStore) survives process restarts.
/// [`MemoryJobStore`](memory::MemoryJobStore) does not; it is intended
/// for tests and deployments that explicitly opt out of durability.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record. A duplicate id is a `Conflict`.
    async fn put(&self, job: &Job) -> AppResult<()>;

    /// Fetch a job by id.
    async fn get(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Compare-and-swap the job from `expected` to `new`, applying
    /// `update` in the same atomic step.
    ///
    /// When `holder` is given, the stored lease holder must match as
    /// well — a worker that lost its lease cannot report on the job.
    /// Fails with `Conflict` on a state/holder mismatch, `NotFound` for
    /// an unknown id, and `Validation` for an illegal transition.
    async fn update_state(
        &self,
        id: Uuid,
        expected: JobState,
        holder: Option<&str>,
        new: JobState,
        update: JobUpdate,
    ) -> AppResult<Job>;

    /// Atomically lease the head eligible `Pending` job: highest
    /// priority first, then oldest enqueue time. Records the holder and
    /// `lease_expires_at = now + ttl`. Two concurrent callers never
    /// receive the same job.
    async fn lease_next(
        &self,
        worker_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>>;

    /// Jobs whose lease expired before `now` (`Leased` or `Running`).
    async fn find_expired_leases(&self, now: DateTime<Utc>) -> AppResult<Vec<Job>>;

    /// Move `Retrying` jobs whose backoff delay has elapsed back to
    /// `Pending`. Returns the number promoted.
    async fn promote_due(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Flag a live job for cooperative cancellation. Terminal jobs are
    /// a `Conflict`.
    async fn request_cancel(&self, id: Uuid) -> AppResult<Job>;

    /// Queue depth per state.
    async fn counts_by_state(&self) -> AppResult<JobStateCounts>;

    /// Number of unexpired leases at `now`.
    async fn active_lease_count(&self, now: DateTime<Utc>) -> AppResult<i64>;

    /// Page through dead-lettered jobs, most recently updated first.
    async fn list_dead_lettered(&self, page: &PageRequest) -> AppResult<PageResponse<Job>>;

    /// Delete terminal jobs last updated before `before`. Dead-lettered
    /// jobs are only purged when explicitly included. Returns the
    /// number deleted.
    async fn purge_terminal_before(
        &self,
        before: DateTime<Utc>,
        include_dead_lettered: bool,
    ) -> AppResult<u64>;
}
