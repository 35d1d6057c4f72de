use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Jobs waiting or in flight, when the queue could be asked.
    pub queue_depth: Option<u64>,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn timed_check<F, E>(name: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    let started = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: "ok",
            latency_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(component = name, error = %e, "Health check failed");
            ComponentHealth {
                status: "error",
                latency_ms: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// GET /health: database, queue and media storage status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let checks = HealthChecks {
        database: timed_check("database", state.store.health_check()).await,
        queue: timed_check("queue", state.queue.health_check()).await,
        storage: timed_check("storage", state.storage.health_check()).await,
    };

    let queue_depth = state.queue.depth().await.ok();
    if let Some(depth) = queue_depth {
        metrics::gauge!("video_queue_depth").set(depth as f64);
    }

    let healthy = checks.database.is_ok() && checks.queue.is_ok() && checks.storage.is_ok();
    let (status_code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            queue_depth,
            checks,
        }),
    )
}
