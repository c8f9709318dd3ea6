//! Liveness probe: unauthenticated, reports pool sizes and uptime.

use axum::{extract::State, Json};

use crate::api::dto::HealthResponse;
use crate::api::router::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "ok".to_string(),
        service: "roomcast".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        device_pool_size: state.pool.size(),
        record_ops_size: state.records.size(),
    })
}
