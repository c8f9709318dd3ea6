//! Authentication middleware for Axum
//!
//! Extracts a bearer credential from the `Authorization` header, falling back
//! to the session cookie when the header is absent. Any verification failure
//! yields an unauthenticated request; nothing here panics or bubbles a
//! token-parsing error to handlers.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::jwt::{verify_token, JwtConfig};
use crate::api::request_id::RequestId;
use crate::domain::Role;

/// Session cookie name, set on login and honored when no header is present.
pub const SESSION_COOKIE: &str = "roomcast_token";

/// State handed to the auth middleware layers.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_config: JwtConfig,
}

/// Authenticated caller, stored in request extensions.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "viewer" => Some(Role::Viewer),
        "operator" => Some(Role::Operator),
        "admin" => Some(Role::Admin),
        _ => None,
    }
}

/// Pull the token out of `Authorization: Bearer ...` or, failing that, the
/// session cookie.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let cookie_header = headers.get(header::COOKIE).and_then(|h| h.to_str().ok())?;
    cookie_header.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        if name == SESSION_COOKIE && !value.is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Resolve the caller from request headers. Returns `None` on any failure
/// (missing, malformed, expired, bad signature).
pub fn authenticate(headers: &HeaderMap, jwt_config: &JwtConfig) -> Option<AuthenticatedUser> {
    let token = extract_token(headers)?;
    let claims = verify_token(&token, jwt_config).ok()?;
    if claims.is_expired() {
        return None;
    }
    let role = parse_role(&claims.role)?;
    Some(AuthenticatedUser {
        username: claims.sub,
        role,
    })
}

fn deny(request: &Request<Body>, status: StatusCode, code: &str, message: &str) -> Response {
    let trace_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    (
        status,
        Json(json!({
            "ok": false,
            "code": code,
            "message": message,
            "traceId": trace_id,
        })),
    )
        .into_response()
}

/// Authentication middleware - requires a valid session.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(request.headers(), &auth_state.jwt_config) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => deny(
            &request,
            StatusCode::UNAUTHORIZED,
            "AUTH_DENIED",
            "Missing or invalid session token",
        ),
    }
}

/// Admin-only middleware - must run after `auth_middleware`.
pub async fn admin_middleware(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<AuthenticatedUser>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(_) => deny(
            &request,
            StatusCode::FORBIDDEN,
            "ADMIN_ONLY",
            "Admin role required",
        ),
        None => deny(
            &request,
            StatusCode::UNAUTHORIZED,
            "AUTH_DENIED",
            "Missing or invalid session token",
        ),
    }
}
