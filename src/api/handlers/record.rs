//! Record state-machine handlers.
//!
//! Start/stop return 202 while another caller is driving the same
//! transition, 200 with `started`/`stopped`/`already` on completion, and
//! 504 when convergence polling exhausts without confirmation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};

use super::open_room;
use crate::api::error::{ApiError, ApiResult};
use crate::api::request_id::RequestId;
use crate::api::router::AppState;
use crate::auth::AuthenticatedUser;
use crate::domain::ErrorKind;
use crate::record::ops::{self, PauseOutcome, StartOutcome, StopOutcome};
use crate::record::OpState;

/// `POST /rooms/{site}/{room}/record/start`
pub async fn start(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    let op = state.records.op(&site, &room);

    // Cheap short-circuit before touching the pool: someone is already
    // driving this start.
    if op.state() == OpState::Starting {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "ok": true, "status": "starting",
                "site": site, "room": room, "op": op.snapshot(),
            })),
        ));
    }

    let poll = state.poll.clone();
    let op_for_call = op.clone();
    let outcome = state
        .pool
        .with_connection(&target, |client| async move {
            ops::start(&op_for_call, client.as_ref(), &poll).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id));
    state.records.persist_soon();
    let outcome = outcome?;

    let response = match outcome {
        StartOutcome::Started { status } => (
            StatusCode::OK,
            Json(json!({
                "ok": true, "started": true,
                "status": status, "op": op.snapshot(),
            })),
        ),
        StartOutcome::Already { status, note } => (
            StatusCode::OK,
            Json(json!({
                "ok": true, "already": true,
                "status": status, "note": note, "op": op.snapshot(),
            })),
        ),
        StartOutcome::InProgress => (
            StatusCode::ACCEPTED,
            Json(json!({
                "ok": true, "status": "starting",
                "site": site, "room": room, "op": op.snapshot(),
            })),
        ),
    };
    Ok(response)
}

/// `POST /rooms/{site}/{room}/record/stop`
pub async fn stop(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    let op = state.records.op(&site, &room);

    if op.state() == OpState::Stopping {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "ok": true, "status": "stopping",
                "site": site, "room": room, "op": op.snapshot(),
            })),
        ));
    }

    let poll = state.poll.clone();
    let op_for_call = op.clone();
    let outcome = state
        .pool
        .with_connection(&target, |client| async move {
            ops::stop(&op_for_call, client.as_ref(), &poll).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id));
    state.records.persist_soon();
    let outcome = outcome?;

    let response = match outcome {
        StopOutcome::Stopped {
            status,
            output_path,
        } => (
            StatusCode::OK,
            Json(json!({
                "ok": true, "stopped": true,
                "status": status, "outputPath": output_path, "op": op.snapshot(),
            })),
        ),
        StopOutcome::Already { status, note } => (
            StatusCode::OK,
            Json(json!({
                "ok": true, "already": true,
                "status": status, "note": note, "op": op.snapshot(),
            })),
        ),
        StopOutcome::InProgress => (
            StatusCode::ACCEPTED,
            Json(json!({
                "ok": true, "status": "stopping",
                "site": site, "room": room, "op": op.snapshot(),
            })),
        ),
    };
    Ok(response)
}

/// `POST /rooms/{site}/{room}/record/pause` — no-op when not recording or
/// already paused.
pub async fn pause(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    let op = state.records.op(&site, &room);

    let op_for_call = op.clone();
    let outcome = state
        .pool
        .with_connection(&target, |client| async move {
            ops::pause(&op_for_call, client.as_ref()).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id));
    state.records.persist_soon();

    let body = match outcome? {
        PauseOutcome::Changed { status } => json!({
            "ok": true, "paused": true, "status": status, "op": op.snapshot(),
        }),
        PauseOutcome::Already { status, note } => json!({
            "ok": true, "already": true, "status": status, "note": note, "op": op.snapshot(),
        }),
    };
    Ok(Json(body))
}

/// `POST /rooms/{site}/{room}/record/resume` — no-op when not recording or
/// not paused.
pub async fn resume(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    let op = state.records.op(&site, &room);

    let op_for_call = op.clone();
    let outcome = state
        .pool
        .with_connection(&target, |client| async move {
            ops::resume(&op_for_call, client.as_ref()).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id));
    state.records.persist_soon();

    let body = match outcome? {
        PauseOutcome::Changed { status } => json!({
            "ok": true, "resumed": true, "status": status, "op": op.snapshot(),
        }),
        PauseOutcome::Already { status, note } => json!({
            "ok": true, "already": true, "status": status, "note": note, "op": op.snapshot(),
        }),
    };
    Ok(Json(body))
}

/// `GET /rooms/{site}/{room}/record/status` — pure read with the zero-byte
/// retry; reconciles the in-memory state as a side effect.
pub async fn status(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    let op = state.records.op(&site, &room);
    let poll = state.poll.clone();

    let op_for_call = op.clone();
    let status = state
        .pool
        .with_connection(&target, |client| async move {
            ops::status(&op_for_call, client.as_ref(), &poll).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(json!({
        "ok": true, "status": status, "op": op.snapshot(),
    })))
}
