//! Request ID middleware
//!
//! Assigns (or propagates) an `X-Request-Id` for every request, stores it in
//! request extensions, wraps processing in a tracing span, and echoes it in
//! the response. The same id doubles as the trace id in error bodies, so a
//! client-reported failure can be correlated with server logs.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use rand::Rng;

/// Header name for the request correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// New-type wrapper for the request ID, stored in request extensions.
#[derive(Clone, Debug, Default)]
pub struct RequestId(pub String);

/// Short correlation id: time component plus random suffix, compact enough
/// to read out loud from a log line.
fn generate_request_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen();
    format!("t{:x}-{:08x}", millis, suffix)
}

pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(generate_request_id);

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
    );
    let _guard = span.enter();

    let mut response = next.run(request).await;

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_enough() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with('t'));
    }
}
