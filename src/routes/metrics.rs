use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Register descriptions for the pipeline's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "video_jobs_submitted_total",
        "Videos accepted for processing"
    );
    metrics::describe_counter!(
        "video_jobs_completed_total",
        "Jobs committed as done"
    );
    metrics::describe_counter!("video_jobs_failed_total", "Jobs committed as failed");
    metrics::describe_counter!(
        "video_jobs_claim_conflicts_total",
        "Deliveries dropped because the job was owned, finished or unknown"
    );
    metrics::describe_histogram!(
        "video_processing_seconds",
        "Wall time from claim to commit for one attempt"
    );
    metrics::describe_gauge!(
        "video_queue_depth",
        "Job notifications currently held by the broker"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}

/// Install the global recorder with its own HTTP listener on `addr`, for
/// processes that have no router to mount `/metrics` on.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}
