//! Room listing handlers.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    Extension, Json,
};
use serde_json::json;

use crate::api::dto::RoomsResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::request_id::RequestId;
use crate::api::router::AppState;
use crate::audit::AuditMeta;
use crate::auth::AuthenticatedUser;
use crate::domain::scope::scope_allows;
use crate::domain::ErrorKind;

/// `GET /rooms`: scope-filtered public projections plus warnings.
pub async fn list(
    State(state): State<AppState>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<RoomsResponse>> {
    let snapshot = state
        .rooms
        .snapshot()
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let scope = state
        .users
        .get(&user.username)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?
        .and_then(|u| u.scope);

    let rooms = snapshot
        .public_list
        .iter()
        .filter(|entry| scope_allows(scope.as_ref(), &entry.site, &entry.room))
        .map(|entry| serde_json::to_value(entry).unwrap_or_default())
        .collect();

    Ok(Json(RoomsResponse {
        ok: true,
        trace_id,
        counts: snapshot.counts.clone(),
        warnings: snapshot.warnings.clone(),
        rooms,
    }))
}

/// `GET /rooms/full`: unfiltered merged entries, including credentials.
/// Restricted to admins, or to loopback peers (operational tooling on the
/// host itself).
pub async fn list_full(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<RoomsResponse>> {
    if !user.is_admin() && !addr.ip().is_loopback() {
        return Err(ApiError::new(ErrorKind::AdminOnly, &trace_id));
    }

    let snapshot = state
        .rooms
        .snapshot()
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let rooms = snapshot
        .full_list
        .iter()
        .map(|entry| serde_json::to_value(entry).unwrap_or_default())
        .collect();

    Ok(Json(RoomsResponse {
        ok: true,
        trace_id,
        counts: snapshot.counts.clone(),
        warnings: snapshot.warnings.clone(),
        rooms,
    }))
}

/// `POST /admin/rooms/reload`: drop the snapshot cache so the next request
/// re-reads the config files.
pub async fn reload(
    State(state): State<AppState>,
) -> (Extension<AuditMeta>, Json<serde_json::Value>) {
    state.rooms.invalidate().await;
    (
        Extension(AuditMeta(json!({"action": "rooms_reload"}))),
        Json(json!({"ok": true, "reloaded": true})),
    )
}
