//! Admin user management. Every mutation attaches structured audit
//! metadata; the audit middleware journals it with the response status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;

use crate::api::dto::{UserResponse, UsersResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::request_id::RequestId;
use crate::api::router::AppState;
use crate::audit::AuditMeta;
use crate::users::{NewUser, UserUpdate};

/// `GET /admin/users`
pub async fn list(
    State(state): State<AppState>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
) -> ApiResult<Json<UsersResponse>> {
    let users = state
        .users
        .list()
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    Ok(Json(UsersResponse { ok: true, users }))
}

/// `POST /admin/users`
pub async fn create(
    State(state): State<AppState>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Json(request): Json<NewUser>,
) -> ApiResult<(StatusCode, Extension<AuditMeta>, Json<UserResponse>)> {
    let target = request.username.clone();
    let user = state
        .users
        .create(request)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let meta = AuditMeta(json!({
        "action": "create_user",
        "targetUser": target,
        "targetRole": user.role,
    }));
    Ok((
        StatusCode::CREATED,
        Extension(meta),
        Json(UserResponse { ok: true, user }),
    ))
}

/// `PUT /admin/users/{username}`
pub async fn update(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Json(request): Json<UserUpdate>,
) -> ApiResult<(Extension<AuditMeta>, Json<UserResponse>)> {
    let changed: Vec<&str> = [
        request.password.is_some().then_some("password"),
        request.role.is_some().then_some("role"),
        request.enabled.is_some().then_some("enabled"),
        request.note.is_some().then_some("note"),
        request.scope.is_some().then_some("scope"),
    ]
    .into_iter()
    .flatten()
    .collect();

    let user = state
        .users
        .update(&username, request)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let meta = AuditMeta(json!({
        "action": "update_user",
        "targetUser": username,
        "changes": changed,
    }));
    Ok((Extension(meta), Json(UserResponse { ok: true, user })))
}

/// `DELETE /admin/users/{username}`
pub async fn delete(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
) -> ApiResult<(Extension<AuditMeta>, Json<serde_json::Value>)> {
    state
        .users
        .delete(&username)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;

    let meta = AuditMeta(json!({
        "action": "delete_user",
        "targetUser": username,
    }));
    Ok((
        Extension(meta),
        Json(json!({"ok": true, "deleted": username})),
    ))
}
