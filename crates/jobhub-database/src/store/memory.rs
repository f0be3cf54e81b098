//! In-memory job store.
//!
//! Keeps every record in process memory behind a single mutex; all
//! state is lost on restart. Intended for tests and single-process
//! deployments that explicitly opt out of durability — production
//! deployments should use [`PgJobStore`](super::postgres::PgJobStore).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::types::pagination::{PageRequest, PageResponse};
use jobhub_entity::job::state::valid_transition;
use jobhub_entity::job::{Job, JobState, JobStateCounts, JobUpdate};

use super::JobStore;

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    /// Enqueue sequence, the FIFO tiebreaker within a priority class.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, StoredJob>,
    next_seq: u64,
}

/// Mutex-guarded map [`JobStore`]. Non-persistent.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(job: &mut Job, update: JobUpdate, now: DateTime<Utc>) {
        if update.increment_attempts {
            job.attempts += 1;
        }
        if update.increment_reclaims {
            job.reclaims += 1;
        }
        if let Some(worker_id) = update.worker_id {
            job.worker_id = Some(worker_id);
        } else if update.clear_worker {
            job.worker_id = None;
        }
        if let Some(expires) = update.lease_expires_at {
            job.lease_expires_at = Some(expires);
        } else if update.clear_lease {
            job.lease_expires_at = None;
        }
        if let Some(available_at) = update.available_at {
            job.available_at = available_at;
        }
        if let Some(last_error) = update.last_error {
            job.last_error = Some(last_error);
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }
        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }
        job.updated_at = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic while holding it; job records are
        // only mutated after full validation, so the data is still sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job: &Job) -> AppResult<()> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(AppError::conflict(format!("Job {} already exists", job.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.lock().jobs.get(&id).map(|stored| stored.job.clone()))
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

        let mut inner = self.lock();
        let stored = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

        if stored.job.state != expected {
            return Err(AppError::conflict(format!(
                "Job {id} is {} (expected {expected})",
                stored.job.state
            )));
        }
        if let Some(holder) = holder
            && stored.job.worker_id.as_deref() != Some(holder)
        {
            return Err(AppError::conflict(format!(
                "Job {id} is not leased by {holder}"
            )));
        }

        stored.job.state = new;
        Self::apply(&mut stored.job, update, Utc::now());
        Ok(stored.job.clone())
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        let mut inner = self.lock();
        let head = inner
            .jobs
            .values()
            .filter(|stored| {
                stored.job.state == JobState::Pending && stored.job.available_at <= now
            })
            .min_by_key(|stored| {
                (
                    std::cmp::Reverse(stored.job.priority.numeric_priority()),
                    stored.seq,
                )
            })
            .map(|stored| stored.job.id);

        let Some(id) = head else {
            return Ok(None);
        };

        let Some(stored) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        stored.job.state = JobState::Leased;
        stored.job.worker_id = Some(worker_id.to_string());
        stored.job.lease_expires_at = Some(now + ttl);
        stored.job.updated_at = now;
        Ok(Some(stored.job.clone()))
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>) -> AppResult<Vec<Job>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|stored| {
                stored.job.state.is_leased()
                    && stored.job.lease_expires_at.is_some_and(|at| at < now)
            })
            .map(|stored| stored.job.clone())
            .collect())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut promoted = 0;
        for stored in self.lock().jobs.values_mut() {
            if stored.job.state == JobState::Retrying && stored.job.available_at <= now {
                stored.job.state = JobState::Pending;
                stored.job.updated_at = now;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn request_cancel(&self, id: Uuid) -> AppResult<Job> {
        let mut inner = self.lock();
        let stored = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        if stored.job.state.is_terminal() {
            return Err(AppError::conflict(format!(
                "Job {id} is already terminal ({})",
                stored.job.state
            )));
        }
        stored.job.cancel_requested = true;
        stored.job.updated_at = Utc::now();
        Ok(stored.job.clone())
    }

    async fn counts_by_state(&self) -> AppResult<JobStateCounts> {
        let mut counts = JobStateCounts::default();
        for stored in self.lock().jobs.values() {
            counts.record(stored.job.state, 1);
        }
        Ok(counts)
    }

    async fn active_lease_count(&self, now: DateTime<Utc>) -> AppResult<i64> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|stored| {
                stored.job.state.is_leased()
                    && stored.job.lease_expires_at.is_some_and(|at| at >= now)
            })
            .count() as i64)
    }

    async fn list_dead_lettered(&self, page: &PageRequest) -> AppResult<PageResponse<Job>> {
        let mut dead: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|stored| stored.job.state == JobState::DeadLettered)
            .map(|stored| stored.job.clone())
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = dead.len() as u64;
        let items = dead
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(PageResponse::new(items, page.page, page.page_size, total))
    }

    async fn purge_terminal_before(
        &self,
        before: DateTime<Utc>,
        include_dead_lettered: bool,
    ) -> AppResult<u64> {
        let mut inner = self.lock();
        let before_len = inner.jobs.len();
        inner.jobs.retain(|_, stored| {
            let purgeable = match stored.job.state {
                JobState::Completed | JobState::Failed | JobState::Cancelled => true,
                JobState::DeadLettered => include_dead_lettered,
                _ => false,
            };
            !(purgeable && stored.job.updated_at < before)
        });
        Ok((before_len - inner.jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhub_entity::job::{JobPriority, NewJob};

    fn job(job_type: &str, priority: JobPriority) -> Job {
        Job::from_new(
            NewJob {
                job_type: job_type.to_string(),
                priority,
                payload: serde_json::json!({}),
                max_attempts: 3,
                available_at: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryJobStore::new();
        let new = job("send_email", JobPriority::Normal);
        store.put(&new).await.unwrap();

        let fetched = store.get(new.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Pending);
        assert_eq!(fetched.payload, new.payload);
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let store = MemoryJobStore::new();
        let new = job("send_email", JobPriority::Normal);
        store.put(&new).await.unwrap();
        let err = store.put(&new).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn cas_rejects_wrong_expected_state() {
        let store = MemoryJobStore::new();
        let new = job("send_email", JobPriority::Normal);
        store.put(&new).await.unwrap();

        let err = store
            .update_state(
                new.id,
                JobState::Leased,
                None,
                JobState::Running,
                JobUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn cas_rejects_wrong_lease_holder() {
        let store = MemoryJobStore::new();
        let new = job("send_email", JobPriority::Normal);
        store.put(&new).await.unwrap();
        store
            .lease_next("worker-1", Duration::seconds(60), Utc::now())
            .await
            .unwrap()
            .unwrap();

        let err = store
            .update_state(
                new.id,
                JobState::Leased,
                Some("worker-2"),
                JobState::Running,
                JobUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn lease_prefers_priority_then_fifo() {
        let store = MemoryJobStore::new();
        let low = job("a", JobPriority::Low);
        let first_normal = job("b", JobPriority::Normal);
        let second_normal = job("c", JobPriority::Normal);
        let critical = job("d", JobPriority::Critical);
        for j in [&low, &first_normal, &second_normal, &critical] {
            store.put(j).await.unwrap();
        }

        let ttl = Duration::seconds(60);
        let order: Vec<Uuid> = [
            store.lease_next("w", ttl, Utc::now()).await.unwrap(),
            store.lease_next("w", ttl, Utc::now()).await.unwrap(),
            store.lease_next("w", ttl, Utc::now()).await.unwrap(),
            store.lease_next("w", ttl, Utc::now()).await.unwrap(),
        ]
        .into_iter()
        .map(|j| j.unwrap().id)
        .collect();

        assert_eq!(
            order,
            vec![critical.id, first_normal.id, second_normal.id, low.id]
        );
        assert!(
            store
                .lease_next("w", ttl, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn lease_skips_jobs_not_yet_available() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let mut delayed = job("later", JobPriority::Normal);
        delayed.available_at = now + Duration::seconds(30);
        store.put(&delayed).await.unwrap();

        assert!(
            store
                .lease_next("w", Duration::seconds(60), now)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .lease_next("w", Duration::seconds(60), now + Duration::seconds(31))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn promote_due_moves_only_elapsed_retries() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let due = job("due", JobPriority::Normal);
        let waiting = job("waiting", JobPriority::Normal);
        store.put(&due).await.unwrap();
        store.put(&waiting).await.unwrap();

        for (id, delay) in [(due.id, -1), (waiting.id, 60)] {
            let leased = store.lease_next("w", Duration::seconds(60), now).await;
            let leased = leased.unwrap().unwrap();
            assert_eq!(leased.id, id);
            store
                .update_state(
                    id,
                    JobState::Leased,
                    Some("w"),
                    JobState::Running,
                    JobUpdate {
                        increment_attempts: true,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            store
                .update_state(
                    id,
                    JobState::Running,
                    Some("w"),
                    JobState::Retrying,
                    JobUpdate {
                        available_at: Some(now + Duration::seconds(delay)),
                        clear_worker: true,
                        clear_lease: true,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(store.promote_due(now).await.unwrap(), 1);
        assert_eq!(
            store.get(due.id).await.unwrap().unwrap().state,
            JobState::Pending
        );
        assert_eq!(
            store.get(waiting.id).await.unwrap().unwrap().state,
            JobState::Retrying
        );
    }

    #[tokio::test]
    async fn purge_respects_dead_letter_flag() {
        let store = MemoryJobStore::new();
        let done = job("done", JobPriority::Normal);
        store.put(&done).await.unwrap();
        store
            .lease_next("w", Duration::seconds(60), Utc::now())
            .await
            .unwrap();
        store
            .update_state(
                done.id,
                JobState::Leased,
                Some("w"),
                JobState::DeadLettered,
                JobUpdate {
                    last_error: Some("no handler".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let cutoff = Utc::now() + Duration::seconds(1);
        assert_eq!(store.purge_terminal_before(cutoff, false).await.unwrap(), 0);
        assert_eq!(store.purge_terminal_before(cutoff, true).await.unwrap(), 1);
        assert!(store.get(done.id).await.unwrap().is_none());
    }
}
