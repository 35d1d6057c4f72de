use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Processing status of an uploaded video.
///
/// The four string forms (`pending`, `processing`, `done`, `failed`) are part of
/// the public status contract and are what gets stored in the database.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// `Processing -> Processing` is the lease takeover edge: a new worker
    /// claiming a job whose previous owner let its lease expire.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// A terminal result committed by the worker that owns the current attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done {
        duration: String,
        thumbnail_ref: String,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Done { .. } => JobStatus::Done,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// One uploaded video and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub filename: String,
    pub stored_path: String,
    pub upload_time: DateTime<Utc>,
    pub status: JobStatus,
    pub duration: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub error: Option<String>,
    pub attempt_count: i32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub processed_time: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Build a fresh `pending` record. The id is assigned here, before the
    /// record is handed to any store.
    pub fn new_pending(filename: impl Into<String>, stored_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            stored_path: stored_path.into(),
            upload_time: Utc::now(),
            status: JobStatus::Pending,
            duration: None,
            thumbnail_ref: None,
            error: None,
            attempt_count: 0,
            lease_expires_at: None,
            processed_time: None,
        }
    }

    /// True when a worker may claim this record at `now`: either it was never
    /// claimed, or the owning worker's lease ran out without a commit.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Processing => self.lease_expires_at.is_some_and(|at| at <= now),
            JobStatus::Done | JobStatus::Failed => false,
        }
    }

    /// Checks the field-level invariants tied to the status.
    pub fn is_consistent(&self) -> bool {
        let done_fields = self.duration.as_deref().is_some_and(|d| !d.is_empty())
            && self.thumbnail_ref.as_deref().is_some_and(|t| !t.is_empty());
        let has_error = self.error.as_deref().is_some_and(|e| !e.is_empty());

        match self.status {
            JobStatus::Done => done_fields && self.error.is_none(),
            JobStatus::Failed => {
                has_error && self.duration.is_none() && self.thumbnail_ref.is_none()
            }
            JobStatus::Pending | JobStatus::Processing => {
                self.duration.is_none() && self.thumbnail_ref.is_none() && self.error.is_none()
            }
        }
    }
}
