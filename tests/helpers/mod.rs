//! Shared fakes and wiring for the pipeline and API tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

use video_processor::app_state::AppState;
use video_processor::models::job::{JobOutcome, JobRecord, JobStatus};
use video_processor::services::job_store::{ClaimOutcome, JobStore, MemoryJobStore, StoreError};
use video_processor::services::memory_queue::MemoryJobQueue;
use video_processor::services::pipeline::{PipelineConfig, WorkerPipeline};
use video_processor::services::probe::{MediaProber, ProbeError, ProbedDuration};
use video_processor::services::storage::{LocalStorage, MediaStorage};
use video_processor::services::submission::submit_video;
use video_processor::services::thumbnail::{ThumbnailError, ThumbnailGenerator, ThumbnailRef};

pub const FAKE_VIDEO: &[u8] = b"\x00\x00\x00\x18ftypmp42 not really a video";

/// What a [`FakeProber`] does when asked for a duration.
#[derive(Clone, Copy)]
pub enum ProbeBehavior {
    Seconds(f64),
    Fail(fn() -> ProbeError),
    Panic,
}

/// Scripted stand-in for ffprobe.
pub struct FakeProber {
    behavior: ProbeBehavior,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn returning(seconds: f64) -> Arc<Self> {
        Self::with(ProbeBehavior::Seconds(seconds), None)
    }

    pub fn failing(err: fn() -> ProbeError) -> Arc<Self> {
        Self::with(ProbeBehavior::Fail(err), None)
    }

    pub fn panicking() -> Arc<Self> {
        Self::with(ProbeBehavior::Panic, None)
    }

    /// Blocks every probe until `gate` is notified.
    pub fn gated(seconds: f64, gate: Arc<Notify>) -> Arc<Self> {
        Self::with(ProbeBehavior::Seconds(seconds), Some(gate))
    }

    fn with(behavior: ProbeBehavior, gate: Option<Arc<Notify>>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            gate,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> Result<ProbedDuration, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !path.exists() {
            return Err(ProbeError::NotFound);
        }

        match self.behavior {
            ProbeBehavior::Seconds(secs) => ProbedDuration::from_secs_f64(secs)
                .ok_or_else(|| ProbeError::Unparseable(format!("bad duration {}", secs))),
            ProbeBehavior::Fail(err) => Err(err()),
            ProbeBehavior::Panic => panic!("prober blew up"),
        }
    }
}

/// Stand-in for ffmpeg that writes a tiny file per thumbnail and remembers
/// the offsets it was asked for.
pub struct FakeThumbnailer {
    dir: PathBuf,
    fail: Option<fn(u64) -> ThumbnailError>,
    timestamps: Mutex<Vec<u64>>,
}

impl FakeThumbnailer {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            fail: None,
            timestamps: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(dir: impl Into<PathBuf>, fail: fn(u64) -> ThumbnailError) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            fail: Some(fail),
            timestamps: Mutex::new(Vec::new()),
        })
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.timestamps.lock().unwrap().clone()
    }
}

#[async_trait]
impl ThumbnailGenerator for FakeThumbnailer {
    async fn generate(
        &self,
        _path: &Path,
        timestamp_secs: u64,
    ) -> Result<ThumbnailRef, ThumbnailError> {
        self.timestamps.lock().unwrap().push(timestamp_secs);
        if let Some(fail) = self.fail {
            return Err(fail(timestamp_secs));
        }

        let thumb = ThumbnailRef::generate();
        tokio::fs::write(self.dir.join(thumb.as_str()), b"\xFF\xD8\xFF\xE0fake jpeg")
            .await
            .map_err(|e| ThumbnailError::WriteFailure(e.to_string()))?;
        Ok(thumb)
    }
}

/// Store wrapper whose lease renewals report success without extending
/// anything, as if the heartbeat's writes were being lost.
pub struct LeaseLosingStore(pub Arc<MemoryJobStore>);

#[async_trait]
impl JobStore for LeaseLosingStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.0.create(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        self.0.get(id).await
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.0.list().await
    }

    async fn claim(
        &self,
        id: Uuid,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        self.0.claim(id, max_attempts, lease).await
    }

    async fn renew_lease(
        &self,
        _id: Uuid,
        _attempt: i32,
        _lease: Duration,
    ) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        attempt: i32,
        outcome: &JobOutcome,
    ) -> Result<bool, StoreError> {
        self.0
            .compare_and_set_status(id, expected, attempt, outcome)
            .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.0.health_check().await
    }
}

/// In-memory store, queue and temp-dir storage wired together.
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub storage: Arc<LocalStorage>,
    pub config: PipelineConfig,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(lease: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("uploads"), dir.path().join("thumbnails"))
            .await
            .unwrap();

        Self {
            store: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryJobQueue::new(lease)),
            storage: Arc::new(storage),
            config: PipelineConfig {
                max_attempts: 3,
                lease,
                poll_timeout: Duration::from_millis(50),
                backoff_initial: Duration::from_millis(10),
                backoff_max: Duration::from_millis(100),
            },
            _dir: dir,
        }
    }

    pub fn thumbnail_dir(&self) -> &Path {
        self.storage.thumbnail_dir()
    }

    pub fn thumbnailer(&self) -> Arc<FakeThumbnailer> {
        FakeThumbnailer::new(self.thumbnail_dir())
    }

    pub fn pipeline(
        &self,
        prober: Arc<FakeProber>,
        thumbnailer: Arc<FakeThumbnailer>,
    ) -> WorkerPipeline {
        self.pipeline_with_store(self.store.clone(), prober, thumbnailer)
    }

    pub fn pipeline_with_store(
        &self,
        store: Arc<dyn JobStore>,
        prober: Arc<FakeProber>,
        thumbnailer: Arc<FakeThumbnailer>,
    ) -> WorkerPipeline {
        WorkerPipeline::new(
            store,
            self.queue.clone(),
            self.storage.clone(),
            prober,
            thumbnailer,
            self.config.clone(),
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.store.clone(), self.queue.clone(), self.storage.clone())
    }

    pub async fn submit(&self, filename: &str) -> JobRecord {
        submit_video(
            self.store.as_ref(),
            self.queue.as_ref(),
            self.storage.as_ref(),
            filename,
            FAKE_VIDEO,
        )
        .await
        .expect("submit failed")
    }

    pub async fn record(&self, id: Uuid) -> JobRecord {
        self.store
            .get(id)
            .await
            .expect("store read failed")
            .expect("job missing")
    }

    /// Names of the thumbnail files currently on disk.
    pub fn thumbnail_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.thumbnail_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Poll until `id` reaches a terminal status.
    pub async fn wait_terminal(&self, id: Uuid, within: Duration) -> JobRecord {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let record = self.record(id).await;
            if record.status.is_terminal() {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} still {} after {:?}",
                id,
                record.status,
                within
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
