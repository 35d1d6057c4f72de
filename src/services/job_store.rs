//! Job record store contract and an in-memory engine.
//!
//! Every mutation after creation goes through [`JobStore::claim`],
//! [`JobStore::renew_lease`] or [`JobStore::compare_and_set_status`], each of
//! which is a single atomic conditional update in every engine. Commits are
//! fenced by the attempt number handed out at claim time, so a worker that
//! lost its lease can never overwrite the attempt that replaced it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly built `pending` record.
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// All records, newest upload first.
    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Atomically take ownership of a job for one attempt.
    async fn claim(
        &self,
        id: Uuid,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Push the lease deadline out, as long as `attempt` still owns the job.
    /// Returns `false` once ownership is lost.
    async fn renew_lease(&self, id: Uuid, attempt: i32, lease: Duration)
        -> Result<bool, StoreError>;

    /// Commit a terminal outcome if the record is still in `expected` status
    /// and owned by `attempt`. Returns `false` when another attempt won.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        attempt: i32,
        outcome: &JobOutcome,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller owns the job; `record.attempt_count` is its fencing token.
    Claimed(JobRecord),
    /// The job's lease expired with no attempts left; it was failed instead.
    Exhausted(JobRecord),
    /// Someone else owns the job, or there is nothing to claim.
    Conflict(ClaimConflict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimConflict {
    NotFound,
    /// Another worker holds a live lease.
    Owned,
    /// Already `done` or `failed`.
    Terminal,
    /// Still `pending` but the attempt budget is spent.
    AttemptsSpent,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job already exists: {0}")]
    Conflict(Uuid),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + TimeDelta::from_std(lease).unwrap_or_else(|_| TimeDelta::days(1))
}

pub(crate) fn exhausted_reason(max_attempts: i32) -> String {
    format!(
        "attempts_exhausted: no result after {} processing attempts",
        max_attempts
    )
}

/// One observed status change, as recorded by [`MemoryJobStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: HashMap<Uuid, JobRecord>,
    transitions: Vec<Transition>,
}

/// Mutex-guarded in-process store; used by tests and single-node dev runs.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status change applied so far, in order.
    pub async fn transitions(&self) -> Vec<Transition> {
        self.inner.lock().await.transitions.clone()
    }
}

impl MemoryInner {
    fn record_transition(&mut self, job_id: Uuid, from: JobStatus, to: JobStatus) {
        if from != to {
            self.transitions.push(Transition { job_id, from, to });
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        inner.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<JobRecord> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
        Ok(records)
    }

    async fn claim(
        &self,
        id: Uuid,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(ClaimOutcome::Conflict(ClaimConflict::NotFound));
        };

        if record.status.is_terminal() {
            return Ok(ClaimOutcome::Conflict(ClaimConflict::Terminal));
        }
        if !record.is_claimable(now) {
            return Ok(ClaimOutcome::Conflict(ClaimConflict::Owned));
        }

        let from = record.status;
        if record.attempt_count >= max_attempts {
            if from == JobStatus::Pending {
                return Ok(ClaimOutcome::Conflict(ClaimConflict::AttemptsSpent));
            }
            record.status = JobStatus::Failed;
            record.error = Some(exhausted_reason(max_attempts));
            record.lease_expires_at = None;
            record.processed_time = Some(now);
            let snapshot = record.clone();
            inner.record_transition(id, from, JobStatus::Failed);
            return Ok(ClaimOutcome::Exhausted(snapshot));
        }

        record.status = JobStatus::Processing;
        record.attempt_count += 1;
        record.lease_expires_at = Some(lease_deadline(now, lease));
        let snapshot = record.clone();
        inner.record_transition(id, from, JobStatus::Processing);
        Ok(ClaimOutcome::Claimed(snapshot))
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        attempt: i32,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(&id) {
            Some(record)
                if record.status == JobStatus::Processing && record.attempt_count == attempt =>
            {
                record.lease_expires_at = Some(lease_deadline(Utc::now(), lease));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        attempt: i32,
        outcome: &JobOutcome,
    ) -> Result<bool, StoreError> {
        let to = outcome.status();
        if !expected.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from: expected, to });
        }

        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected || record.attempt_count != attempt {
            return Ok(false);
        }

        match outcome {
            JobOutcome::Done {
                duration,
                thumbnail_ref,
            } => {
                record.duration = Some(duration.clone());
                record.thumbnail_ref = Some(thumbnail_ref.clone());
            }
            JobOutcome::Failed { error } => {
                record.error = Some(error.clone());
            }
        }
        record.status = to;
        record.lease_expires_at = None;
        record.processed_time = Some(Utc::now());
        inner.record_transition(id, expected, to);
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
