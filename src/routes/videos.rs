use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobRecord;
use crate::models::video::{
    UploadResponse, VideoListResponse, VideoMetadataResponse, VideoStatusResponse,
};
use crate::services::submission::submit_video;

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Error returned by the video routes as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "{}", context);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, context)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

/// GET /: liveness message.
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Video processing API is running" }))
}

/// POST /upload-video/: store a video and queue it for processing.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let is_video = field
            .content_type()
            .is_some_and(|ct| ct.starts_with("video/"));
        if !is_video {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "Only video files are allowed",
            ));
        }

        let filename = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or("upload")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

        let record = submit_video(
            state.store.as_ref(),
            state.queue.as_ref(),
            state.storage.as_ref(),
            &filename,
            &data,
        )
        .await
        .map_err(|e| ApiError::internal("Failed to upload video", e))?;

        return Ok(Json(UploadResponse {
            id: record.id,
            filename: record.filename,
            message: "Video uploaded successfully. Processing started.".to_string(),
        }));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "Missing multipart field 'file'",
    ))
}

async fn load_record(state: &AppState, video_id: &str) -> Result<JobRecord, ApiError> {
    let id = Uuid::parse_str(video_id)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "Invalid video ID format"))?;

    state
        .store
        .get(id)
        .await
        .map_err(|e| ApiError::internal("Failed to load video", e))?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Video not found"))
}

/// GET /video-status/{id}
pub async fn get_video_status(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<VideoStatusResponse>, ApiError> {
    let record = load_record(&state, &video_id).await?;
    Ok(Json(VideoStatusResponse {
        id: record.id,
        status: record.status,
    }))
}

/// GET /video-metadata/{id}
pub async fn get_video_metadata(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<VideoMetadataResponse>, ApiError> {
    let record = load_record(&state, &video_id).await?;
    Ok(Json(VideoMetadataResponse::from(&record)))
}

/// GET /videos/: every upload, newest first.
pub async fn list_videos(
    State(state): State<AppState>,
) -> Result<Json<VideoListResponse>, ApiError> {
    let records = state
        .store
        .list()
        .await
        .map_err(|e| ApiError::internal("Failed to list videos", e))?;

    Ok(Json(VideoListResponse {
        videos: records.iter().map(VideoMetadataResponse::from).collect(),
    }))
}
