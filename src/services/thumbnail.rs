//! Single-frame thumbnail extraction via ffmpeg.

use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::tool::{ToolError, ToolRunner};

pub const THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_HEIGHT: u32 = 240;

/// JPEG quality scale passed to `-q:v` (2 is near-lossless).
const JPEG_QUALITY: &str = "2";

/// Produces a still image from a video at a given offset.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(
        &self,
        path: &Path,
        timestamp_secs: u64,
    ) -> Result<ThumbnailRef, ThumbnailError>;
}

/// File name of a generated thumbnail inside the thumbnail directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailRef(String);

impl ThumbnailRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Fresh collision-free name.
    pub fn generate() -> Self {
        Self(format!("thumb_{}.jpg", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ThumbnailRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("no frame at {0}s")]
    SeekOutOfRange(u64),

    #[error("thumbnail tool failed: {0}")]
    ToolFailure(String),

    #[error("could not write thumbnail: {0}")]
    WriteFailure(String),
}

impl ThumbnailError {
    /// Stable class name stored in the job record.
    pub fn reason(&self) -> &'static str {
        match self {
            ThumbnailError::SeekOutOfRange(_) => "seek_out_of_range",
            ThumbnailError::ToolFailure(_) => "tool_failure",
            ThumbnailError::WriteFailure(_) => "write_failure",
        }
    }
}

/// [`ThumbnailGenerator`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    runner: ToolRunner,
    output_dir: PathBuf,
}

impl FfmpegThumbnailer {
    pub fn new(runner: ToolRunner, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            output_dir: output_dir.into(),
        }
    }

    /// Arguments for extracting one scaled frame at `timestamp_secs`.
    pub fn build_args(input: &Path, output: &Path, timestamp_secs: u64) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-v", "error", "-ss"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(timestamp_secs.to_string().into());
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-frames:v".to_string(),
                "1".to_string(),
                "-vf".to_string(),
                format!("scale={}:{}", THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT),
                "-q:v".to_string(),
                JPEG_QUALITY.to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }

    async fn extract(
        &self,
        input: &Path,
        output: &Path,
        timestamp_secs: u64,
    ) -> Result<(), ThumbnailError> {
        let args = Self::build_args(input, output, timestamp_secs);
        self.runner.run(args).await.map_err(|e| {
            if let ToolError::NonZeroExit { stderr, .. } = &e {
                warn!(stderr = %stderr, "ffmpeg exited with failure");
            }
            ThumbnailError::ToolFailure(e.to_string())
        })?;

        // ffmpeg exits cleanly but writes nothing when the seek lands past the
        // last frame.
        let mut file = match tokio::fs::File::open(output).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ThumbnailError::SeekOutOfRange(timestamp_secs))
            }
            Err(e) => return Err(ThumbnailError::WriteFailure(e.to_string())),
        };

        let mut header = [0u8; 16];
        let read = file
            .read(&mut header)
            .await
            .map_err(|e| ThumbnailError::WriteFailure(e.to_string()))?;
        if read == 0 {
            return Err(ThumbnailError::SeekOutOfRange(timestamp_secs));
        }

        match image::guess_format(&header[..read]) {
            Ok(image::ImageFormat::Jpeg) => Ok(()),
            _ => Err(ThumbnailError::WriteFailure(
                "output is not a JPEG image".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ThumbnailGenerator for FfmpegThumbnailer {
    async fn generate(
        &self,
        path: &Path,
        timestamp_secs: u64,
    ) -> Result<ThumbnailRef, ThumbnailError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ThumbnailError::WriteFailure(e.to_string()))?;

        let thumb = ThumbnailRef::generate();
        let output = self.output_dir.join(thumb.as_str());

        debug!(
            input = %path.display(),
            output = %output.display(),
            timestamp_secs,
            "Extracting thumbnail frame"
        );

        match self.extract(path, &output, timestamp_secs).await {
            Ok(()) => {
                info!(thumbnail = %thumb, "Thumbnail generated");
                Ok(thumb)
            }
            Err(e) => {
                remove_partial(&output).await;
                Err(e)
            }
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial thumbnail"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial thumbnail"),
    }
}
