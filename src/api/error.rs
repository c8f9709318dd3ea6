//! Thin dispatch layer mapping the error taxonomy to HTTP responses.
//!
//! Every error body has the same shape: `{ok, code, message, traceId}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::ErrorKind;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub trace_id: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, trace_id: impl Into<String>) -> Self {
        Self {
            kind,
            trace_id: trace_id.into(),
        }
    }
}

fn status_for(kind: &ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AuthDenied => StatusCode::UNAUTHORIZED,
        ErrorKind::ScopeDenied { .. } | ErrorKind::AdminOnly | ErrorKind::ExternalUserImmutable(_) => {
            StatusCode::FORBIDDEN
        }
        ErrorKind::ConfigLoadFailed(_) | ErrorKind::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ErrorKind::RoomNotConfigured { .. }
        | ErrorKind::RouteNotImplemented
        | ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
        ErrorKind::DeviceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::DeviceError(_) => StatusCode::BAD_GATEWAY,
        ErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateUser(_) => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.kind);
        (
            status,
            Json(json!({
                "ok": false,
                "code": self.kind.code(),
                "message": self.kind.to_string(),
                "traceId": self.trace_id,
            })),
        )
            .into_response()
    }
}
