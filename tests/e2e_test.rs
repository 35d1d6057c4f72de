//! End-to-end tests against a deployed stack
//!
//! These tests require:
//! 1. PostgreSQL and Redis running
//! 2. API server running on the configured port
//! 3. Worker process running
//! 4. `ffmpeg` on the PATH (used to render the test clip)
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:8000)

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::time::sleep;
use uuid::Uuid;

use video_processor::services::tool::ToolRunner;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    status: String,
    duration: Option<String>,
    thumbnail_url: Option<String>,
    error: Option<String>,
}

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}

async fn render_clip(dir: &Path, seconds: u32) -> PathBuf {
    let path = dir.join("e2e.mp4");
    let source = format!("testsrc=duration={}:size=640x360:rate=10", seconds);
    let ffmpeg = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string());
    ToolRunner::new(ffmpeg, Duration::from_secs(60))
        .run([
            "-y",
            "-v",
            "error",
            "-f",
            "lavfi",
            "-i",
            source.as_str(),
            "-pix_fmt",
            "yuv420p",
            path.to_str().unwrap(),
        ])
        .await
        .expect("ffmpeg could not render the clip");
    path
}

async fn upload(client: &reqwest::Client, base_url: &str, bytes: Vec<u8>, mime: &str) -> reqwest::Response {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(bytes)
            .file_name("e2e.mp4")
            .mime_str(mime)
            .unwrap(),
    );
    client
        .post(format!("{}/upload-video/", base_url))
        .multipart(form)
        .send()
        .await
        .expect("Upload request failed")
}

/// Poll the metadata endpoint until the job is terminal.
async fn wait_for_completion(
    client: &reqwest::Client,
    base_url: &str,
    id: Uuid,
    max_wait: Duration,
) -> MetadataResponse {
    let started = std::time::Instant::now();
    loop {
        let metadata: MetadataResponse = client
            .get(format!("{}/video-metadata/{}", base_url, id))
            .send()
            .await
            .expect("Metadata request failed")
            .json()
            .await
            .expect("Metadata was not JSON");

        if metadata.status == "done" || metadata.status == "failed" {
            return metadata;
        }
        assert!(
            started.elapsed() < max_wait,
            "Job {} still {} after {:?}",
            id,
            metadata.status,
            max_wait
        );
        sleep(Duration::from_millis(500)).await;
    }
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );

    let metrics = client
        .get(format!("{}/metrics", base_url))
        .send()
        .await
        .expect("Metrics request failed")
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("video_queue_depth"));

    println!("✓ Health check passed");
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_video_is_processed() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();
    let dir = TempDir::new().unwrap();

    let clip = render_clip(dir.path(), 40).await;
    let response = upload(&client, &base_url, std::fs::read(&clip).unwrap(), "video/mp4").await;
    assert!(response.status().is_success(), "Upload failed: {}", response.status());
    let uploaded: UploadResponse = response.json().await.unwrap();
    println!("Uploaded job {}", uploaded.id);

    let metadata = wait_for_completion(&client, &base_url, uploaded.id, Duration::from_secs(120)).await;
    assert_eq!(metadata.status, "done", "job failed: {:?}", metadata.error);
    assert_eq!(metadata.duration.as_deref(), Some("00:00:40"));

    let thumbnail_url = metadata.thumbnail_url.expect("done job has no thumbnail");
    let thumbnail = client
        .get(format!("{}{}", base_url, thumbnail_url))
        .send()
        .await
        .expect("Thumbnail request failed");
    assert!(thumbnail.status().is_success());
    let bytes = thumbnail.bytes().await.unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);

    println!("✓ Processed in full: {}", thumbnail_url);
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_garbage_upload_fails_cleanly() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = upload(&client, &base_url, b"definitely not a video".to_vec(), "video/mp4").await;
    assert!(response.status().is_success());
    let uploaded: UploadResponse = response.json().await.unwrap();

    let metadata = wait_for_completion(&client, &base_url, uploaded.id, Duration::from_secs(60)).await;
    assert_eq!(metadata.status, "failed");
    assert!(metadata.duration.is_none());
    assert!(metadata.thumbnail_url.is_none());

    let error = metadata.error.expect("failed job has no error");
    assert!(
        error.starts_with("tool_failure: ") || error.starts_with("unparseable: "),
        "unexpected failure reason {}",
        error
    );

    println!("✓ Garbage upload failed with: {}", error);
}
