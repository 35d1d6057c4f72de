use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use video_processor::config::AppConfig;
use video_processor::db::{self, queries::PgJobStore};
use video_processor::routes;
use video_processor::services::{
    pipeline::WorkerPipeline,
    probe::FfprobeProber,
    queue::RedisJobQueue,
    storage::LocalStorage,
    thumbnail::FfmpegThumbnailer,
    tool::ToolRunner,
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

    tracing::info!("Starting video processing worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Pipeline counters and timings are recorded here, not in the API process
    let metrics_addr = config
        .worker_metrics_socket()
        .expect("Invalid WORKER_METRICS_ADDR");
    routes::metrics::install_exporter(metrics_addr)
        .expect("Failed to install Prometheus metrics exporter");
    tracing::info!(%metrics_addr, "Serving worker metrics");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = LocalStorage::new(&config.upload_dir, &config.thumbnail_dir)
        .await
        .expect("Failed to create storage directories");

    let queue = RedisJobQueue::new(
        &config.redis_url,
        &config.queue_stream,
        &config.queue_group,
        config.lease(),
    )
    .expect("Failed to initialize job queue");
    queue.init().await.expect("Failed to create queue consumer group");

    let prober = FfprobeProber::new(ToolRunner::new(&config.ffprobe_bin, config.tool_timeout()));
    let thumbnailer = FfmpegThumbnailer::new(
        ToolRunner::new(&config.ffmpeg_bin, config.tool_timeout()),
        &config.thumbnail_dir,
    );

    let pipeline = WorkerPipeline::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(queue),
        Arc::new(storage),
        Arc::new(prober),
        Arc::new(thumbnailer),
        config.pipeline_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!(
        concurrency = config.worker_concurrency,
        max_attempts = config.max_attempts,
        lease_secs = config.lease_secs,
        "Worker ready, starting job processing loops"
    );

    let loops: Vec<_> = (0..config.worker_concurrency)
        .map(|slot| {
            let pipeline = pipeline.clone();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                tracing::debug!(slot, "Processing loop started");
                pipeline.run(shutdown).await;
            })
        })
        .collect();

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown requested, finishing in-flight jobs");
    let _ = shutdown_tx.send(true);

    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Processing loop panicked");
        }
    }

    tracing::info!("Worker stopped");
}
