use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord, JobStatus};
use crate::services::job_store::{ClaimOutcome, JobStore, StoreError};
use crate::services::pipeline::failure_reason;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::storage::{MediaStorage, StorageError};

/// Enqueue tries before a submission is given up on.
const ENQUEUE_ATTEMPTS: u32 = 3;
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(50);

/// Short-lived claim taken only to fail a record that was never announced.
const ABANDON_LEASE: Duration = Duration::from_secs(30);

/// Store an upload, record it as `pending` and notify the workers.
///
/// The record is visible before the notification is sent, so a worker can
/// never dequeue an id it cannot look up. A submission that cannot finish
/// does not leave a `pending` record nobody will ever process: if the
/// record cannot be created the upload is deleted, and if the queue stays
/// unreachable the record is committed as `failed`.
pub async fn submit_video(
    store: &dyn JobStore,
    queue: &dyn JobQueue,
    storage: &dyn MediaStorage,
    filename: &str,
    data: &[u8],
) -> Result<JobRecord, SubmitError> {
    let stored_path = storage.save_upload(filename, data).await?;
    let record = JobRecord::new_pending(filename, stored_path.to_string_lossy());

    if let Err(e) = store.create(&record).await {
        discard_upload(storage, &record).await;
        return Err(e.into());
    }

    if let Err(e) = enqueue_with_retry(queue, record.id).await {
        error!(job_id = %record.id, error = %e, "Could not enqueue job, abandoning submission");
        abandon(store, storage, &record, &e).await;
        return Err(e.into());
    }

    metrics::counter!("video_jobs_submitted_total").increment(1);
    info!(
        job_id = %record.id,
        filename = %record.filename,
        stored_path = %record.stored_path,
        bytes = data.len(),
        "Video submitted for processing"
    );

    Ok(record)
}

async fn enqueue_with_retry(queue: &dyn JobQueue, job_id: Uuid) -> Result<(), QueueError> {
    let mut backoff = ENQUEUE_BACKOFF;
    let mut tries = 1;
    loop {
        match queue.enqueue(job_id).await {
            Ok(()) => return Ok(()),
            Err(e) if tries < ENQUEUE_ATTEMPTS => {
                warn!(job_id = %job_id, tries, error = %e, "Enqueue failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fail a record whose notification never went out.
///
/// The enqueue may still have reached the broker before erroring; if a
/// worker already owns the job it is left alone.
async fn abandon(
    store: &dyn JobStore,
    storage: &dyn MediaStorage,
    record: &JobRecord,
    cause: &QueueError,
) {
    let attempt = match store.claim(record.id, 1, ABANDON_LEASE).await {
        Ok(ClaimOutcome::Claimed(claimed)) => claimed.attempt_count,
        Ok(other) => {
            warn!(job_id = %record.id, ?other, "Unannounced job already picked up, leaving it");
            return;
        }
        Err(e) => {
            error!(job_id = %record.id, error = %e, "Could not claim unannounced job");
            return;
        }
    };

    let outcome = JobOutcome::Failed {
        error: failure_reason("enqueue_failure", cause),
    };
    match store
        .compare_and_set_status(record.id, JobStatus::Processing, attempt, &outcome)
        .await
    {
        Ok(true) => {
            metrics::counter!("video_jobs_failed_total").increment(1);
            discard_upload(storage, record).await;
        }
        Ok(false) => warn!(job_id = %record.id, "Unannounced job changed hands before it was failed"),
        Err(e) => error!(job_id = %record.id, error = %e, "Could not fail unannounced job"),
    }
}

async fn discard_upload(storage: &dyn MediaStorage, record: &JobRecord) {
    if let Err(e) = storage.remove_upload(&record.stored_path).await {
        warn!(job_id = %record.id, stored_path = %record.stored_path, error = %e, "Failed to remove upload");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to record job: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
}
