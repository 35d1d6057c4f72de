use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{JobRecord, JobStatus};

/// URL prefix under which generated thumbnails are served.
pub const THUMBNAIL_URL_PREFIX: &str = "/thumbnails";

/// Response after uploading a video.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub filename: String,
    pub message: String,
}

/// Response for `GET /video-status/{id}`.
#[derive(Debug, Serialize)]
pub struct VideoStatusResponse {
    pub id: Uuid,
    pub status: JobStatus,
}

/// Response for `GET /video-metadata/{id}`.
#[derive(Debug, Serialize)]
pub struct VideoMetadataResponse {
    pub id: Uuid,
    pub filename: String,
    pub upload_time: String,
    pub status: JobStatus,
    pub duration: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
}

impl From<&JobRecord> for VideoMetadataResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
            upload_time: record.upload_time.to_rfc3339(),
            status: record.status,
            duration: record.duration.clone(),
            thumbnail_url: record
                .thumbnail_ref
                .as_ref()
                .map(|r| format!("{}/{}", THUMBNAIL_URL_PREFIX, r)),
            error: record.error.clone(),
        }
    }
}

/// Response for `GET /videos/`.
#[derive(Debug, Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<VideoMetadataResponse>,
}
