//! Login and session handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tracing::info;
use validator::Validate;

use crate::api::dto::{LoginRequest, LoginResponse, MeResponse, SessionResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::request_id::RequestId;
use crate::api::router::AppState;
use crate::auth::jwt::create_token;
use crate::auth::{AuthenticatedUser, SESSION_COOKIE};
use crate::domain::ErrorKind;

/// `POST /login`. Unknown user and wrong password are indistinguishable to
/// the caller. On success the token is returned in the body and also set as
/// an HttpOnly cookie for browser clients.
pub async fn login(
    State(state): State<AppState>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::new(ErrorKind::Validation(e.to_string()), &trace_id))?;

    let verified = state
        .users
        .verify_password(&request.username, &request.password)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?;
    if !verified {
        return Err(ApiError::new(ErrorKind::AuthDenied, &trace_id));
    }

    let user = state
        .users
        .get(&request.username)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?
        .ok_or_else(|| ApiError::new(ErrorKind::AuthDenied, &trace_id))?;

    let token = create_token(&user.username, user.role.as_str(), &state.jwt_config)
        .map_err(|e| ApiError::new(ErrorKind::Internal(e.to_string()), &trace_id))?;

    let max_age = state.jwt_config.expiration_hours * 3600;
    let cookie = format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age}"
    );

    info!(username = %user.username, role = %user.role, "Login");

    let body = Json(LoginResponse {
        ok: true,
        token,
        role: user.role,
    });
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], body).into_response())
}

/// `GET /session`: cheap token check.
pub async fn session(Extension(user): Extension<AuthenticatedUser>) -> Json<SessionResponse> {
    Json(SessionResponse {
        ok: true,
        user: user.username,
        role: user.role,
    })
}

/// `GET /me`: token check plus the caller's scope from the store.
pub async fn me(
    State(state): State<AppState>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<MeResponse>> {
    let scope = state
        .users
        .get(&user.username)
        .await
        .map_err(|k| ApiError::new(k, &trace_id))?
        .and_then(|u| u.scope);

    Ok(Json(MeResponse {
        ok: true,
        user: user.username,
        role: user.role,
        scope,
    }))
}
