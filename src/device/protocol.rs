//! Switcher WebSocket protocol (v5 framing)
//!
//! Frames are JSON envelopes `{op, d}`. The server opens with Hello (op 0),
//! optionally carrying an auth challenge; the client answers with Identify
//! (op 1) and receives Identified (op 2). After that, requests (op 6) are
//! answered by request-responses (op 7) correlated by `requestId`. Event
//! frames (op 5) are pushed by the device and ignored here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_EVENT: u8 = 5;
pub const OP_REQUEST: u8 = 6;
pub const OP_REQUEST_RESPONSE: u8 = 7;

pub const RPC_VERSION: u8 = 1;

/// Wire envelope shared by every frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

/// Challenge material from the Hello frame.
#[derive(Debug, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Status block of a request-response frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Authentication string for Identify:
/// base64(sha256(base64(sha256(password + salt)) + challenge)).
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

pub fn identify_frame(auth: Option<String>) -> Envelope {
    let mut d = json!({ "rpcVersion": RPC_VERSION });
    if let Some(auth) = auth {
        d["authentication"] = Value::String(auth);
    }
    Envelope {
        op: OP_IDENTIFY,
        d,
    }
}

pub fn request_frame(request_type: &str, request_id: &str, data: Value) -> Envelope {
    Envelope {
        op: OP_REQUEST,
        d: json!({
            "requestType": request_type,
            "requestId": request_id,
            "requestData": data,
        }),
    }
}

fn contains_any(message: &str, needles: &[&str]) -> bool {
    let lower = message.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Device complaint meaning "the output is already running". Start treats
/// these as idempotent successes.
pub fn is_already_active_message(message: &str) -> bool {
    contains_any(message, &["already", "in progress", "active"])
}

/// Device complaint meaning "the output is not running". Stop treats these
/// as idempotent successes.
pub fn is_not_active_message(message: &str) -> bool {
    contains_any(message, &["not recording", "already", "inactive"])
}

/// Device complaint on pause/resume when there is nothing to pause or the
/// output does not support it. Never an error for the caller.
pub fn is_pause_noop_message(message: &str) -> bool {
    contains_any(message, &["not recording", "does not support", "unsupported"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_is_deterministic() {
        let a = auth_response("pw", "salt", "challenge");
        let b = auth_response("pw", "salt", "challenge");
        assert_eq!(a, b);
        assert_ne!(a, auth_response("pw2", "salt", "challenge"));
        // base64 of a sha256 digest is 44 chars
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_request_frame_shape() {
        let frame = request_frame("GetRecordStatus", "id-1", json!({}));
        assert_eq!(frame.op, OP_REQUEST);
        assert_eq!(frame.d["requestType"], "GetRecordStatus");
        assert_eq!(frame.d["requestId"], "id-1");
    }

    #[test]
    fn test_identify_with_and_without_auth() {
        let plain = identify_frame(None);
        assert!(plain.d.get("authentication").is_none());

        let authed = identify_frame(Some("abc".into()));
        assert_eq!(authed.d["authentication"], "abc");
        assert_eq!(authed.d["rpcVersion"], 1);
    }

    #[test]
    fn test_idempotent_classification() {
        assert!(is_already_active_message("Output is already active"));
        assert!(is_already_active_message("start in progress"));
        assert!(!is_already_active_message("unknown failure"));

        assert!(is_not_active_message("The output is not recording"));
        assert!(is_not_active_message("output inactive"));
        assert!(!is_not_active_message("disk full"));

        assert!(is_pause_noop_message("output does not support pausing"));
        assert!(is_pause_noop_message("Not recording"));
        assert!(!is_pause_noop_message("hardware fault"));
    }

    #[test]
    fn test_envelope_round_trip() {
        let raw = r#"{"op":7,"d":{"requestId":"x","requestStatus":{"result":true,"code":100}}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.op, OP_REQUEST_RESPONSE);
        let status: RequestStatus =
            serde_json::from_value(env.d["requestStatus"].clone()).unwrap();
        assert!(status.result);
        assert_eq!(status.code, 100);
    }
}
