//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::state::{JobPriority, JobState};

/// A background job.
///
/// The job store exclusively owns these records; workers hold a
/// time-bounded lease, never the record itself. All mutation goes
/// through the store's compare-and-swap `update_state`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier, assigned at enqueue time.
    pub id: Uuid,
    /// Job type identifier (e.g., `"send_email"`), selects the handler.
    pub job_type: String,
    /// Job priority.
    pub priority: JobPriority,
    /// Job-specific payload (JSON). Immutable after enqueue.
    pub payload: serde_json::Value,
    /// Result data on completion (JSON).
    pub result: Option<serde_json::Value>,
    /// Detail of the most recent failure.
    pub last_error: Option<String>,
    /// Current job state.
    pub state: JobState,
    /// Number of execution attempts so far.
    pub attempts: i32,
    /// Maximum allowed attempts.
    pub max_attempts: i32,
    /// Number of times an expired lease was reclaimed. Distinct from
    /// `attempts`: a reclaimed execution was not necessarily faulty.
    pub reclaims: i32,
    /// Set when cancellation was requested while the job was live.
    pub cancel_requested: bool,
    /// Identity of the current lease holder.
    pub worker_id: Option<String>,
    /// When the current lease expires and the job becomes reclaimable.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// When the job becomes eligible for leasing (submit delay, retry
    /// backoff).
    pub available_at: DateTime<Utc>,
    /// When the current attempt started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh `Pending` record from submission data.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: new.job_type,
            priority: new.priority,
            payload: new.payload,
            result: None,
            last_error: None,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: new.max_attempts,
            reclaims: 0,
            cancel_requested: false,
            worker_id: None,
            lease_expires_at: None,
            available_at: new.available_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the job still has retry budget.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Data required to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Job type identifier.
    pub job_type: String,
    /// Priority.
    pub priority: JobPriority,
    /// Job-specific payload.
    pub payload: serde_json::Value,
    /// Maximum attempts.
    pub max_attempts: i32,
    /// Eligibility time (`None` = immediately).
    pub available_at: Option<DateTime<Utc>>,
}

/// Field mutations applied together with a compare-and-swap state
/// change. Only the set fields are written; everything else is left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    /// Increment `attempts` by one.
    pub increment_attempts: bool,
    /// Increment `reclaims` by one.
    pub increment_reclaims: bool,
    /// Record the lease holder.
    pub worker_id: Option<String>,
    /// Clear the lease holder.
    pub clear_worker: bool,
    /// Record the lease expiry.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Clear the lease expiry.
    pub clear_lease: bool,
    /// Set the eligibility time (retry backoff).
    pub available_at: Option<DateTime<Utc>>,
    /// Record the failure detail.
    pub last_error: Option<String>,
    /// Record the handler result.
    pub result: Option<serde_json::Value>,
    /// Record the execution start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Record the terminal completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Number of jobs per state, the queue-depth observability surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobStateCounts {
    pub pending: i64,
    pub leased: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_lettered: i64,
    pub cancelled: i64,
}

impl JobStateCounts {
    /// Add one to the counter for `state`.
    pub fn record(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Pending => self.pending += count,
            JobState::Leased => self.leased += count,
            JobState::Running => self.running += count,
            JobState::Retrying => self.retrying += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::DeadLettered => self.dead_lettered += count,
            JobState::Cancelled => self.cancelled += count,
        }
    }
}
