//! Liveness probe and pipeline statistics.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scanhook_ingest::PoolStats;
use serde::Serialize;

use crate::AppState;

/// Returns 204 while the process is healthy and 503 otherwise.
pub async fn healthz(State(state): State<AppState>) -> StatusCode {
    if state.liveness.is_healthy() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Snapshot served by `/debug/stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Jobs accepted but not yet taken by a worker
    pub queue_depth: usize,
    /// Queue capacity
    pub queue_capacity: usize,
    /// Whether the queue is refusing new jobs
    pub shutting_down: bool,
    /// Shared worker counters
    pub workers: PoolStats,
}

/// Returns queue depth and worker counters as JSON.
///
/// Responds 404 when diagnostics are disabled.
pub async fn debug_stats(State(state): State<AppState>) -> Response {
    let Some(stats) = &state.stats else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let workers = stats.read().await.clone();
    Json(StatsResponse {
        queue_depth: state.queue.len(),
        queue_capacity: state.queue.capacity(),
        shutting_down: state.queue.is_shutting_down(),
        workers,
    })
    .into_response()
}
