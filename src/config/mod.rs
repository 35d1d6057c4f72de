use garde::Validate;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::pipeline::PipelineConfig;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Where the worker binary serves Prometheus metrics (e.g., "0.0.0.0:9100")
    #[serde(default = "default_worker_metrics_addr")]
    #[garde(custom(is_socket_addr))]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string
    #[garde(length(min = 1))]
    pub database_url: String,

    /// Upper bound on pooled PostgreSQL connections per process
    #[serde(default = "default_database_max_connections")]
    #[garde(range(min = 1, max = 200))]
    pub database_max_connections: u32,

    /// Redis connection string for job queue
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// Directory holding raw uploads
    #[serde(default = "default_upload_dir")]
    #[garde(skip)]
    pub upload_dir: PathBuf,

    /// Directory generated thumbnails are written to (and served from)
    #[serde(default = "default_thumbnail_dir")]
    #[garde(skip)]
    pub thumbnail_dir: PathBuf,

    /// Claims allowed per job before it is failed for good
    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 20))]
    pub max_attempts: i32,

    /// Seconds a claimed job stays owned without a lease renewal
    #[serde(default = "default_lease_secs")]
    #[garde(range(min = 5))]
    pub lease_secs: u64,

    /// Upper bound for a single ffprobe/ffmpeg run
    #[serde(default = "default_tool_timeout_secs")]
    #[garde(range(min = 1))]
    pub tool_timeout_secs: u64,

    /// How long a dequeue blocks before returning empty
    #[serde(default = "default_queue_poll_timeout_ms")]
    #[garde(range(min = 1))]
    pub queue_poll_timeout_ms: u64,

    /// Number of concurrent processing loops in the worker binary
    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub worker_concurrency: usize,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: usize,

    /// Redis stream carrying job notifications
    #[serde(default = "default_queue_stream")]
    #[garde(length(min = 1))]
    pub queue_stream: String,

    /// Redis consumer group shared by all workers
    #[serde(default = "default_queue_group")]
    #[garde(length(min = 1))]
    pub queue_group: String,

    #[serde(default = "default_ffprobe_bin")]
    #[garde(length(min = 1))]
    pub ffprobe_bin: String,

    #[serde(default = "default_ffmpeg_bin")]
    #[garde(length(min = 1))]
    pub ffmpeg_bin: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn is_socket_addr(value: &str, _ctx: &()) -> garde::Result {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| garde::Error::new(format!("not a socket address: {}", e)))
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_thumbnail_dir() -> PathBuf {
    PathBuf::from("./thumbnails")
}

fn default_max_attempts() -> i32 {
    3
}

fn default_lease_secs() -> u64 {
    300
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_queue_poll_timeout_ms() -> u64 {
    1000
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_queue_stream() -> String {
    "video_processor:jobs".to_string()
}

fn default_queue_group() -> String {
    "video_processor:workers".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Listener address for the worker's metrics exporter.
    pub fn worker_metrics_socket(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.worker_metrics_addr.parse()
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Settings consumed by the worker pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_attempts: self.max_attempts,
            lease: self.lease(),
            poll_timeout: Duration::from_millis(self.queue_poll_timeout_ms),
            ..PipelineConfig::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
