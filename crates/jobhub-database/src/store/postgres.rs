//! Durable PostgreSQL job store.
//!
//! Leasing uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! claim the same row; every other mutation is a single `UPDATE`
//! guarded on the expected state (and lease holder), which is the
//! compare-and-swap the rest of the system relies on.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::result::AppResult;
use jobhub_core::types::pagination::{PageRequest, PageResponse};
use jobhub_entity::job::state::valid_transition;
use jobhub_entity::job::{Job, JobState, JobStateCounts, JobUpdate};

use super::JobStore;

/// PostgreSQL-backed [`JobStore`]. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Create a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish a failed CAS from a missing record.
    async fn cas_failure(&self, id: Uuid, expected: JobState) -> AppError {
        match self.get(id).await {
            Ok(Some(job)) => AppError::conflict(format!(
                "Job {id} is {} (expected {expected})",
                job.state
            )),
            Ok(None) => AppError::not_found(format!("Job {id} not found")),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn put(&self, job: &Job) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, job_type, priority, payload, result, last_error, state, \
             attempts, max_attempts, reclaims, cancel_requested, worker_id, lease_expires_at, \
             available_at, started_at, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(job.priority)
        .bind(&job.payload)
        .bind(&job.result)
        .bind(&job.last_error)
        .bind(job.state)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.reclaims)
        .bind(job.cancel_requested)
        .bind(&job.worker_id)
        .bind(job.lease_expires_at)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::conflict(format!("Job {} already exists", job.id))
            }
            _ => AppError::with_source(ErrorKind::Database, "Failed to insert job", e),
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fetch job", e))
    }

    async fn update_state(
        &self,
        id: Uuid,
        expected: JobState,
        holder: Option<&str>,
        new: JobState,
        update: JobUpdate,
    ) -> AppResult<Job> {
        if !valid_transition(expected, new) {
            return Err(AppError::validation(format!(
                "Illegal job transition {expected} -> {new}"
            )));
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE jobs SET state = ");
        qb.push_bind(new);
        qb.push(", updated_at = NOW()");
        if update.increment_attempts {
            qb.push(", attempts = attempts + 1");
        }
        if update.increment_reclaims {
            qb.push(", reclaims = reclaims + 1");
        }
        if let Some(worker_id) = &update.worker_id {
            qb.push(", worker_id = ");
            qb.push_bind(worker_id.clone());
        } else if update.clear_worker {
            qb.push(", worker_id = NULL");
        }
        if let Some(expires) = update.lease_expires_at {
            qb.push(", lease_expires_at = ");
            qb.push_bind(expires);
        } else if update.clear_lease {
            qb.push(", lease_expires_at = NULL");
        }
        if let Some(available_at) = update.available_at {
            qb.push(", available_at = ");
            qb.push_bind(available_at);
        }
        if let Some(last_error) = &update.last_error {
            qb.push(", last_error = ");
            qb.push_bind(last_error.clone());
        }
        if let Some(result) = &update.result {
            qb.push(", result = ");
            qb.push_bind(result.clone());
        }
        if let Some(started_at) = update.started_at {
            qb.push(", started_at = ");
            qb.push_bind(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            qb.push(", completed_at = ");
            qb.push_bind(completed_at);
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);
        qb.push(" AND state = ");
        qb.push_bind(expected);
        if let Some(holder) = holder {
            qb.push(" AND worker_id = ");
            qb.push_bind(holder.to_string());
        }
        qb.push(" RETURNING *");

        let updated = qb
            .build_query_as::<Job>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update job state", e)
            })?;

        match updated {
            Some(job) => Ok(job),
            None => Err(self.cas_failure(id, expected).await),
        }
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET state = 'leased', worker_id = $2, lease_expires_at = $3, \
             updated_at = NOW() \
             WHERE id = ( \
                SELECT id FROM jobs \
                WHERE state = 'pending' AND available_at <= $1 \
                ORDER BY \
                    CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 \
                                  WHEN 'normal' THEN 2 WHEN 'low' THEN 3 END, \
                    created_at ASC, id ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
             ) RETURNING *",
        )
        .bind(now)
        .bind(worker_id)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lease job", e))
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE state IN ('leased', 'running') AND lease_expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find expired leases", e)
        })
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', updated_at = NOW() \
             WHERE state = 'retrying' AND available_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to promote retrying jobs", e)
        })?;
        Ok(result.rows_affected())
    }

    async fn request_cancel(&self, id: Uuid) -> AppResult<Job> {
        let updated = sqlx::query_as::<_, Job>(
            "UPDATE jobs SET cancel_requested = TRUE, updated_at = NOW() \
             WHERE id = $1 AND state IN ('pending', 'leased', 'running', 'retrying') \
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to request cancellation", e)
        })?;

        match updated {
            Some(job) => Ok(job),
            None => match self.get(id).await? {
                Some(job) => Err(AppError::conflict(format!(
                    "Job {id} is already terminal ({})",
                    job.state
                ))),
                None => Err(AppError::not_found(format!("Job {id} not found"))),
            },
        }
    }

    async fn counts_by_state(&self) -> AppResult<JobStateCounts> {
        let rows =
            sqlx::query_as::<_, (JobState, i64)>("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to count jobs", e)
                })?;

        let mut counts = JobStateCounts::default();
        for (state, count) in rows {
            counts.record(state, count);
        }
        Ok(counts)
    }

    async fn active_lease_count(&self, now: DateTime<Utc>) -> AppResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs \
             WHERE state IN ('leased', 'running') AND lease_expires_at >= $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count leases", e))
    }

    async fn list_dead_lettered(&self, page: &PageRequest) -> AppResult<PageResponse<Job>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = 'dead_lettered'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to count dead letters", e)
                })?;

        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE state = 'dead_lettered' \
             ORDER BY updated_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list dead letters", e)
        })?;

        Ok(PageResponse::new(
            jobs,
            page.page,
            page.page_size,
            total as u64,
        ))
    }

    async fn purge_terminal_before(
        &self,
        before: DateTime<Utc>,
        include_dead_lettered: bool,
    ) -> AppResult<u64> {
        let sql = if include_dead_lettered {
            "DELETE FROM jobs WHERE state IN ('completed', 'failed', 'cancelled', 'dead_lettered') \
             AND updated_at < $1"
        } else {
            "DELETE FROM jobs WHERE state IN ('completed', 'failed', 'cancelled') \
             AND updated_at < $1"
        };
        let result = sqlx::query(sql)
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to purge terminal jobs", e)
            })?;
        Ok(result.rows_affected())
    }
}
