use std::path::Path;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::models::video::THUMBNAIL_URL_PREFIX;

pub mod health;
pub mod metrics;
pub mod videos;

/// API routes plus the static thumbnail directory.
pub fn router(state: AppState, thumbnail_dir: &Path, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(videos::root))
        .route("/health", get(health::health_check))
        .route("/upload-video/", post(videos::upload_video))
        .route("/video-status/{id}", get(videos::get_video_status))
        .route("/video-metadata/{id}", get(videos::get_video_metadata))
        .route("/videos/", get(videos::list_videos))
        .with_state(state)
        .nest_service(THUMBNAIL_URL_PREFIX, ServeDir::new(thumbnail_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
