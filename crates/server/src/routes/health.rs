use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use neuropixel_common::METRICS;
use neuropixel_engine::device::device_name;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the reconstruction model is loaded.
    pub model_loaded: bool,
    /// Device the model runs on.
    pub device: &'static str,
    /// Jobs waiting for a worker.
    pub queue_depth: usize,
    /// Queue bound; uploads are rejected once depth reaches it.
    pub queue_capacity: usize,
}

/// GET /health -- returns service and model health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = state.orchestrator.queue();
    let status = if queue.is_shutdown() { "shutting_down" } else { "ok" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        // The server never starts without a model.
        model_loaded: true,
        device: device_name(state.orchestrator.engine().model().device()),
        queue_depth: queue.depth(),
        queue_capacity: queue.capacity(),
    })
}

/// GET /metrics -- Prometheus text exposition.
async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.gather(),
    )
}

/// Mount health and metrics routes (root level, NOT under `/api/v1`).
pub fn router(enable_metrics: bool) -> Router<AppState> {
    let router = Router::new().route("/health", get(health_check));
    if enable_metrics {
        router.route("/metrics", get(metrics))
    } else {
        router
    }
}
