//! Device-control handlers for the dynamic `/rooms/{site}/{room}/...`
//! namespace (everything except the record state machine).
//!
//! Scope is validated before any pool access; see `open_room`. Responses
//! wrap the switcher's own payloads, which stay dynamic.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::open_room;
use crate::api::error::{ApiError, ApiResult};
use crate::api::request_id::RequestId;
use crate::api::router::AppState;
use crate::auth::AuthenticatedUser;
use crate::device::DeviceClient;
use crate::domain::ErrorKind;
use crate::record::ops;
use std::sync::Arc;

/// Volume clamp bounds in dB, matching what the switcher UI allows.
const MIN_VOLUME_DB: f64 = -60.0;
const MAX_VOLUME_DB: f64 = 10.0;

async fn call(
    client: &DeviceClient,
    request_type: &str,
    data: Value,
) -> Result<Value, ErrorKind> {
    use crate::device::SwitcherCalls;
    client.call(request_type, data).await.map_err(Into::into)
}

/// `GET /rooms/{site}/{room}/status`
pub async fn status(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let status = state
        .pool
        .with_connection(&target, |client| async move {
            call(&client, "GetStreamStatus", json!({})).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(json!({"ok": true, "status": status})))
}

/// `POST /rooms/{site}/{room}/stream/start` — idempotent.
pub async fn stream_start(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let result = state
        .pool
        .with_connection(&target, |client| async move {
            let st = call(&client, "GetStreamStatus", json!({})).await?;
            if st.get("outputActive").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(json!({"ok": true, "already": true, "status": st}));
            }
            call(&client, "StartStream", json!({})).await?;
            let st2 = call(&client, "GetStreamStatus", json!({})).await?;
            Ok::<_, ErrorKind>(json!({"ok": true, "started": true, "status": st2}))
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(result))
}

/// `POST /rooms/{site}/{room}/stream/stop` — idempotent.
pub async fn stream_stop(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let result = state
        .pool
        .with_connection(&target, |client| async move {
            let st = call(&client, "GetStreamStatus", json!({})).await?;
            if !st.get("outputActive").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(json!({"ok": true, "already": true, "status": st}));
            }
            call(&client, "StopStream", json!({})).await?;
            let st2 = call(&client, "GetStreamStatus", json!({})).await?;
            Ok::<_, ErrorKind>(json!({"ok": true, "stopped": true, "status": st2}))
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(result))
}

/// `GET /rooms/{site}/{room}/inputs`
pub async fn inputs(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let inputs = state
        .pool
        .with_connection(&target, |client| async move {
            call(&client, "GetInputList", json!({})).await
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(json!({"ok": true, "inputs": inputs})))
}

#[derive(Debug, Deserialize)]
pub struct MuteToggleRequest {
    #[serde(rename = "inputName")]
    pub input_name: Option<String>,
}

/// `POST /rooms/{site}/{room}/audio/mute/toggle`
pub async fn audio_mute_toggle(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<MuteToggleRequest>,
) -> ApiResult<Json<Value>> {
    let input_name = request
        .input_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            ApiError::new(ErrorKind::Validation("inputName is required".into()), &trace_id)
        })?;

    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let result = state
        .pool
        .with_connection(&target, |client| {
            let input_name = input_name.clone();
            async move {
                let current =
                    call(&client, "GetInputMute", json!({"inputName": input_name})).await?;
                let next = !current
                    .get("inputMuted")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                call(
                    &client,
                    "SetInputMute",
                    json!({"inputName": input_name, "inputMuted": next}),
                )
                .await?;
                Ok::<_, ErrorKind>(json!({
                    "ok": true,
                    "inputName": input_name,
                    "inputMuted": next,
                }))
            }
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct VolumeSetRequest {
    #[serde(rename = "inputName")]
    pub input_name: Option<String>,
    #[serde(rename = "inputVolumeDb", alias = "db")]
    pub input_volume_db: Option<f64>,
}

/// `POST /rooms/{site}/{room}/audio/volume/set` — dB clamped to a sane
/// range before it reaches the device.
pub async fn audio_volume_set(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<VolumeSetRequest>,
) -> ApiResult<Json<Value>> {
    let input_name = request
        .input_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            ApiError::new(ErrorKind::Validation("inputName is required".into()), &trace_id)
        })?;
    let requested_db = request.input_volume_db.ok_or_else(|| {
        ApiError::new(
            ErrorKind::Validation("inputVolumeDb (number) is required".into()),
            &trace_id,
        )
    })?;
    if !requested_db.is_finite() {
        return Err(ApiError::new(
            ErrorKind::Validation("inputVolumeDb must be a finite number".into()),
            &trace_id,
        ));
    }
    let clamped = requested_db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);

    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let result = state
        .pool
        .with_connection(&target, |client| {
            let input_name = input_name.clone();
            async move {
                call(
                    &client,
                    "SetInputVolume",
                    json!({"inputName": input_name, "inputVolumeDb": clamped}),
                )
                .await?;
                let volume =
                    call(&client, "GetInputVolume", json!({"inputName": input_name})).await?;
                Ok::<_, ErrorKind>(json!({
                    "ok": true,
                    "inputName": input_name,
                    "volume": volume,
                    "clamped": clamped,
                }))
            }
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(result))
}

/// `GET /rooms/{site}/{room}/scenes`
pub async fn scenes(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let result = state
        .pool
        .with_connection(&target, |client| async move {
            let mut scenes = call(&client, "GetSceneList", json!({})).await?;
            let current = call(&client, "GetCurrentProgramScene", json!({})).await?;
            if let (Some(scenes_obj), Some(name)) =
                (scenes.as_object_mut(), current.get("currentProgramSceneName"))
            {
                scenes_obj.insert("currentProgramSceneName".to_string(), name.clone());
            }
            Ok::<_, ErrorKind>(scenes)
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    let mut body = json!({"ok": true});
    if let (Some(body_obj), Some(result_obj)) = (body.as_object_mut(), result.as_object()) {
        for (k, v) in result_obj {
            body_obj.insert(k.clone(), v.clone());
        }
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct SceneSetRequest {
    #[serde(rename = "sceneName")]
    pub scene_name: Option<String>,
}

/// `POST /rooms/{site}/{room}/scene/set`
pub async fn scene_set(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SceneSetRequest>,
) -> ApiResult<Json<Value>> {
    let scene_name = request
        .scene_name
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::new(ErrorKind::Validation("sceneName is required".into()), &trace_id)
        })?;

    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let result = state
        .pool
        .with_connection(&target, |client| {
            let scene_name = scene_name.clone();
            async move {
                call(
                    &client,
                    "SetCurrentProgramScene",
                    json!({"sceneName": scene_name}),
                )
                .await?;
                let current = call(&client, "GetCurrentProgramScene", json!({})).await?;
                Ok::<_, ErrorKind>(json!({
                    "ok": true,
                    "set": true,
                    "currentProgramSceneName": current.get("currentProgramSceneName"),
                }))
            }
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    Ok(Json(result))
}

/// `GET /rooms/{site}/{room}/state`: stream + record status plus the
/// in-memory operation, reconciled against the device.
pub async fn state(
    State(state): State<AppState>,
    Path((site, room)): Path<(String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    let target = open_room(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    let op = state.records.op(&site, &room);

    let op_for_call = Arc::clone(&op);
    let result = state
        .pool
        .with_connection(&target, |client| async move {
            let stream = call(&client, "GetStreamStatus", json!({})).await?;
            let record = call(&client, "GetRecordStatus", json!({})).await?;
            op_for_call.reconcile(
                record
                    .get("outputActive")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            );
            Ok::<_, ErrorKind>((stream, record))
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    let (stream, record) = result;
    Ok(Json(json!({
        "ok": true,
        "site": site,
        "room": room,
        "stream": stream,
        "record": record,
        "op": op.snapshot(),
    })))
}

/// `GET /rooms/{site}/{room}/summary`: stream status plus a record status
/// that retries through the zero-byte window after a fresh start.
pub async fn summary(
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

    let op_for_call = Arc::clone(&op);
    let result = state
        .pool
        .with_connection(&target, |client| async move {
            let stream = call(&client, "GetStreamStatus", json!({})).await?;
            let record = ops::status(&op_for_call, client.as_ref(), &poll).await?;
            Ok::<_, ErrorKind>((stream, record))
        })
        .await
        .map_err(|k: ErrorKind| ApiError::new(k, &trace_id))?;

    let (stream, record) = result;
    Ok(Json(json!({
        "ok": true,
        "traceId": trace_id,
        "site": site,
        "room": room,
        "state": op.snapshot(),
        "stream": stream,
        "record": record,
    })))
}

/// Fallback for unknown subpaths under a valid room: scope is still checked
/// first (no information leak about configured rooms to out-of-scope
/// callers), then a stable 404 code.
pub async fn not_implemented(
    State(state): State<AppState>,
    Path((site, room, rest)): Path<(String, String, String)>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Value>> {
    super::check_scope(&state, &user, &site, &room)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let snapshot = state
        .rooms
        .snapshot()
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    if snapshot.room_config(&site, &room).is_none() {
        return Err(ApiError::new(
            ErrorKind::RoomNotConfigured { site, room },
            &trace_id,
        ));
    }

    tracing::debug!(site, room, rest, "Unknown device route");
    Err(ApiError::new(ErrorKind::RouteNotImplemented, &trace_id))
}
