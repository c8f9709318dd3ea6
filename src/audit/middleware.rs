//! Audit capture middleware.
//!
//! Runs inside the auth layer, so the authenticated caller is available in
//! request extensions. The event is assembled and handed to the sink after
//! the response is produced; the sink write happens off-path. Requests to
//! the audit-read endpoint and unauthenticated requests are never journaled.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use super::sink::{AuditEvent, AuditSink};
use crate::auth::AuthenticatedUser;

#[derive(Clone)]
pub struct AuditLayerState {
    pub sink: Arc<AuditSink>,
}

/// Structured metadata a handler attaches to its response for the journal
/// (e.g. `action`, `targetUser`). Returned as part of the handler response
/// tuple: `(Extension(AuditMeta(json!({...}))), Json(body))`.
#[derive(Clone, Debug)]
pub struct AuditMeta(pub Value);

fn client_ip(request: &Request<Body>, addr: &SocketAddr) -> String {
    for header_name in ["x-real-ip", "x-forwarded-for"] {
        if let Some(value) = request
            .headers()
            .get(header_name)
            .and_then(|v| v.to_str().ok())
        {
            let first = value.split(',').next().unwrap_or(value).trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    addr.ip().to_string()
}

pub async fn audit_middleware(
    State(state): State<AuditLayerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let user = request.extensions().get::<AuthenticatedUser>().cloned();
    let ip = client_ip(&request, &addr);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    // Reading the journal must not feed the journal.
    if path.starts_with("/admin/audit") {
        return response;
    }
    let Some(user) = user else {
        return response;
    };

    let meta = response
        .extensions()
        .get::<AuditMeta>()
        .map(|m| m.0.clone());

    state.sink.record(AuditEvent {
        ts: Utc::now(),
        user: user.username,
        role: Some(user.role.to_string()),
        method,
        path,
        status: response.status().as_u16(),
        ip: Some(ip),
        user_agent,
        duration_ms: Some(started.elapsed().as_millis() as u64),
        meta,
    });

    response
}
