//! Request/response DTOs for the typed endpoints. Device-control responses
//! carry dynamic switcher payloads and are assembled with `json!` in their
//! handlers instead.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::user::PublicUser;
use crate::domain::{Role, Scope};
use crate::rooms::{Counts, Warning};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(alias = "user")]
    #[validate(length(min = 1))]
    pub username: String,
    #[serde(alias = "pass")]
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub token: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub user: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub ok: bool,
    pub user: String,
    pub role: Role,
    /// `null` means unrestricted access.
    pub scope: Option<Scope>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomsResponse {
    pub ok: bool,
    pub trace_id: String,
    pub counts: Counts,
    pub warnings: Vec<Warning>,
    pub rooms: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub ok: bool,
    pub users: Vec<PublicUser>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub ok: bool,
    pub user: PublicUser,
}

/// Query string for the audit read endpoint. Filter lengths are capped so a
/// hostile query cannot smuggle unbounded strings into the scan.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AuditQuery {
    pub date: Option<String>,
    pub limit: Option<usize>,
    #[validate(length(max = 128))]
    pub user: Option<String>,
    #[validate(length(max = 128))]
    pub action: Option<String>,
    #[validate(length(max = 128))]
    pub contains: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub ok: bool,
    pub date: String,
    pub count: usize,
    pub limit: usize,
    pub events: Vec<serde_json::Value>,
    pub available_dates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub device_pool_size: usize,
    pub record_ops_size: usize,
}
