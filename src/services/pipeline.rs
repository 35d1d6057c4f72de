//! Worker-side processing of one job: claim, probe, thumbnail, commit.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord, JobStatus};
use crate::services::job_store::{ClaimConflict, ClaimOutcome, JobStore, StoreError};
use crate::services::probe::{MediaProber, ProbedDuration};
use crate::services::queue::{Delivery, JobQueue, QueueError};
use crate::services::storage::{MediaStorage, StorageError};
use crate::services::thumbnail::ThumbnailGenerator;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Claims allowed per job
    pub max_attempts: i32,
    /// How long a claim stays valid without renewal
    pub lease: Duration,
    /// How long one dequeue blocks
    pub poll_timeout: Duration,
    /// First pause after a store/queue failure
    pub backoff_initial: Duration,
    /// Cap for the doubling backoff
    pub backoff_max: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lease: Duration::from_secs(300),
            poll_timeout: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    fn heartbeat_interval(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(10))
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Done { duration: String, thumbnail_ref: String },
    Failed { error: String },
    /// Nothing to do for this delivery (duplicate, terminal or unknown job).
    Abandoned(ClaimConflict),
    /// The job ran out of attempts after its last owner went away.
    Exhausted,
    /// Our lease was taken over before we could commit.
    Superseded,
}

/// Store or queue unreachable; the run loop backs off and retries.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Thumbnail offset: 10% into the video, floored to whole seconds.
/// Anything under ten seconds, zero included, uses the first frame.
pub fn thumbnail_timestamp(duration: &ProbedDuration) -> u64 {
    duration.whole_seconds() / 10
}

pub(crate) fn failure_reason(class: &str, detail: impl Display) -> String {
    format!("{}: {}", class, detail)
}

/// Drains the job queue and drives each job through the state machine.
///
/// Cloning is cheap; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct WorkerPipeline {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    storage: Arc<dyn MediaStorage>,
    prober: Arc<dyn MediaProber>,
    thumbnailer: Arc<dyn ThumbnailGenerator>,
    config: PipelineConfig,
}

/// Keeps the claim alive while a job is being worked on. Stops on drop.
struct Heartbeat(JoinHandle<()>);

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl WorkerPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        storage: Arc<dyn MediaStorage>,
        prober: Arc<dyn MediaProber>,
        thumbnailer: Arc<dyn ThumbnailGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            storage,
            prober,
            thumbnailer,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Poll the queue and process deliveries until `shutdown` flips to true.
    /// A job already in progress is finished before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.config.backoff_initial;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.queue.dequeue(self.config.poll_timeout) => next,
            };

            let result = match next {
                Ok(Some(delivery)) => self.process(&delivery).await.map(|_| ()),
                Ok(None) => {
                    tracing::trace!("No jobs available");
                    Ok(())
                }
                Err(e) => Err(PipelineError::Queue(e)),
            };

            match result {
                Ok(()) => backoff = self.config.backoff_initial,
                Err(e) => {
                    error!(error = %e, backoff_ms = backoff.as_millis() as u64, "Pipeline dependency failure, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.config.backoff_max);
                }
            }
        }

        info!("Worker loop stopped");
    }

    /// Handle one delivery end to end.
    pub async fn process(&self, delivery: &Delivery) -> Result<ProcessOutcome, PipelineError> {
        let job_id = delivery.job_id;

        let record = match self
            .store
            .claim(job_id, self.config.max_attempts, self.config.lease)
            .await?
        {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::Exhausted(record) => {
                warn!(job_id = %job_id, attempts = record.attempt_count, "Job out of attempts, marked failed");
                metrics::counter!("video_jobs_failed_total").increment(1);
                self.queue.ack(delivery).await?;
                return Ok(ProcessOutcome::Exhausted);
            }
            ClaimOutcome::Conflict(ClaimConflict::Owned) => {
                // Leave the delivery with the queue: if the owner dies it
                // comes back once the lease runs out.
                debug!(job_id = %job_id, "Job owned by another worker, skipping delivery");
                metrics::counter!("video_jobs_claim_conflicts_total").increment(1);
                return Ok(ProcessOutcome::Abandoned(ClaimConflict::Owned));
            }
            ClaimOutcome::Conflict(conflict) => {
                debug!(job_id = %job_id, ?conflict, "Nothing to claim, dropping delivery");
                metrics::counter!("video_jobs_claim_conflicts_total").increment(1);
                self.queue.ack(delivery).await?;
                return Ok(ProcessOutcome::Abandoned(conflict));
            }
        };

        // The store lease started at claim time; restart the delivery's
        // redelivery clock to match so it never fires before the lease ends.
        if let Err(e) = self.queue.touch(delivery).await {
            warn!(job_id = %job_id, error = %e, "Delivery touch after claim failed");
        }

        let attempt = record.attempt_count;
        info!(
            job_id = %job_id,
            attempt,
            filename = %record.filename,
            "Processing video job"
        );

        let started = Instant::now();
        let outcome = {
            let _heartbeat = self.start_heartbeat(job_id, attempt, delivery.clone());
            self.run_attempt_isolated(record).await
        };

        let committed = match self
            .store
            .compare_and_set_status(job_id, JobStatus::Processing, attempt, &outcome)
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                self.discard_thumbnail(&outcome).await;
                return Err(e.into());
            }
        };

        if !committed {
            warn!(job_id = %job_id, attempt, "Lost ownership before commit, discarding result");
            self.discard_thumbnail(&outcome).await;
            return Ok(ProcessOutcome::Superseded);
        }

        self.queue.ack(delivery).await?;
        metrics::histogram!("video_processing_seconds").record(started.elapsed().as_secs_f64());

        Ok(match outcome {
            JobOutcome::Done {
                duration,
                thumbnail_ref,
            } => {
                info!(job_id = %job_id, attempt, duration = %duration, thumbnail = %thumbnail_ref, "Job completed");
                metrics::counter!("video_jobs_completed_total").increment(1);
                ProcessOutcome::Done {
                    duration,
                    thumbnail_ref,
                }
            }
            JobOutcome::Failed { error } => {
                warn!(job_id = %job_id, attempt, error = %error, "Job failed");
                metrics::counter!("video_jobs_failed_total").increment(1);
                ProcessOutcome::Failed { error }
            }
        })
    }

    /// Run the attempt on its own task so a panic inside a collaborator
    /// still ends in a `failed` commit.
    async fn run_attempt_isolated(&self, record: JobRecord) -> JobOutcome {
        let this = self.clone();
        match tokio::spawn(async move { this.run_attempt(&record).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Processing task aborted");
                JobOutcome::Failed {
                    error: failure_reason("tool_failure", "processing task aborted"),
                }
            }
        }
    }

    async fn run_attempt(&self, record: &JobRecord) -> JobOutcome {
        let path = match self.storage.read_path(&record.stored_path).await {
            Ok(path) => path,
            Err(StorageError::NotFound(_)) => {
                return JobOutcome::Failed {
                    error: failure_reason("not_found", "uploaded file is missing"),
                }
            }
            Err(e) => {
                return JobOutcome::Failed {
                    error: failure_reason("tool_failure", e),
                }
            }
        };

        let duration = match self.prober.probe(&path).await {
            Ok(d) => d,
            Err(e) => {
                return JobOutcome::Failed {
                    error: failure_reason(e.reason(), e),
                }
            }
        };
        debug!(job_id = %record.id, duration = %duration.formatted(), "Duration extracted");

        let timestamp = thumbnail_timestamp(&duration);
        match self.thumbnailer.generate(&path, timestamp).await {
            Ok(thumb) => JobOutcome::Done {
                duration: duration.formatted(),
                thumbnail_ref: thumb.into_string(),
            },
            Err(e) => JobOutcome::Failed {
                error: failure_reason(e.reason(), e),
            },
        }
    }

    fn start_heartbeat(&self, job_id: Uuid, attempt: i32, delivery: Delivery) -> Heartbeat {
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let lease = self.config.lease;
        let period = self.config.heartbeat_interval();

        Heartbeat(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.renew_lease(job_id, attempt, lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(job_id = %job_id, attempt, "Lease lost, stopping renewals");
                        return;
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "Lease renewal failed"),
                }
                if let Err(e) = queue.touch(&delivery).await {
                    warn!(job_id = %job_id, error = %e, "Delivery touch failed");
                }
            }
        }))
    }

    async fn discard_thumbnail(&self, outcome: &JobOutcome) {
        if let JobOutcome::Done { thumbnail_ref, .. } = outcome {
            if let Err(e) = self.storage.remove_thumbnail(thumbnail_ref).await {
                warn!(thumbnail = %thumbnail_ref, error = %e, "Failed to remove orphaned thumbnail");
            }
        }
    }
}
