//! Duration extraction via ffprobe.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::services::tool::{ToolError, ToolRunner};

/// Extracts the playback duration of a media file.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbedDuration, ProbeError>;
}

/// Duration reported by the container, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbedDuration {
    seconds: f64,
}

impl ProbedDuration {
    pub fn from_secs_f64(seconds: f64) -> Option<Self> {
        (seconds.is_finite() && seconds >= 0.0).then_some(Self { seconds })
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds
    }

    pub fn whole_seconds(&self) -> u64 {
        self.seconds.floor() as u64
    }

    /// `HH:MM:SS`, sub-second part truncated.
    pub fn formatted(&self) -> String {
        format_duration(self.whole_seconds())
    }
}

pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("media file not found")]
    NotFound,

    #[error("media file unreadable: {0}")]
    Unreadable(String),

    #[error("probe tool failed: {0}")]
    ToolFailure(String),

    #[error("probe output has no usable duration: {0}")]
    Unparseable(String),
}

impl ProbeError {
    /// Stable class name stored in the job record.
    pub fn reason(&self) -> &'static str {
        match self {
            ProbeError::NotFound => "not_found",
            ProbeError::Unreadable(_) => "unreadable",
            ProbeError::ToolFailure(_) => "tool_failure",
            ProbeError::Unparseable(_) => "unparseable",
        }
    }
}

impl From<ToolError> for ProbeError {
    fn from(err: ToolError) -> Self {
        if let ToolError::NonZeroExit { stderr, .. } = &err {
            warn!(stderr = %stderr, "ffprobe exited with failure");
        }
        ProbeError::ToolFailure(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format` output.
pub fn parse_ffprobe_output(stdout: &[u8]) -> Result<ProbedDuration, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ProbeError::Unparseable(format!("invalid JSON: {}", e)))?;

    let raw = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| ProbeError::Unparseable("missing format.duration".to_string()))?;

    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(ProbedDuration::from_secs_f64)
        .ok_or_else(|| ProbeError::Unparseable(format!("bad duration value {:?}", raw)))
}

/// [`MediaProber`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    runner: ToolRunner,
}

impl FfprobeProber {
    pub fn new(runner: ToolRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbedDuration, ProbeError> {
        match tokio::fs::File::open(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ProbeError::NotFound),
            Err(e) => return Err(ProbeError::Unreadable(e.to_string())),
        }

        let output = self
            .runner
            .run([
                OsStr::new("-v"),
                OsStr::new("quiet"),
                OsStr::new("-print_format"),
                OsStr::new("json"),
                OsStr::new("-show_format"),
                path.as_os_str(),
            ])
            .await?;

        let duration = parse_ffprobe_output(&output.stdout)?;
        debug!(path = %path.display(), seconds = duration.as_secs_f64(), "Probed duration");
        Ok(duration)
    }
}
