use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use video_processor::app_state::AppState;
use video_processor::config::AppConfig;
use video_processor::db::{self, queries::PgJobStore};
use video_processor::routes;
use video_processor::services::{
    queue::RedisJobQueue,
    storage::{LocalStorage, MediaStorage},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing video processing API");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        thumbnail_dir = %config.thumbnail_dir.display(),
        "Preparing local media storage"
    );
    let storage = LocalStorage::new(&config.upload_dir, &config.thumbnail_dir)
        .await
        .expect("Failed to create storage directories");

    tracing::info!("Connecting to Redis job queue");
    let queue = RedisJobQueue::new(
        &config.redis_url,
        &config.queue_stream,
        &config.queue_group,
        config.lease(),
    )
    .expect("Failed to initialize job queue");
    queue.init().await.expect("Failed to create queue consumer group");

    let storage = Arc::new(storage);
    let state = AppState::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(queue),
        storage.clone(),
    );

    let app = routes::router(state, storage.thumbnail_dir(), config.max_upload_bytes).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
