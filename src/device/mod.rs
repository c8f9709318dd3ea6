//! Remote switcher devices: wire protocol, persistent client and the
//! connection pool shared by all request handlers.

pub mod client;
pub mod pool;
pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use client::DeviceClient;
pub use pool::DevicePool;

use crate::domain::ErrorKind;

/// Full connection target for a switcher. The pool key includes the
/// credential, so two rooms sharing endpoint and password share one
/// physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub endpoint: String,
    pub password: String,
}

impl DeviceTarget {
    pub fn key(&self) -> String {
        format!("{}|{}", self.endpoint, self.password)
    }
}

/// Transport- and protocol-level failures talking to a switcher.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed")]
    Closed,

    #[error("request '{0}' timed out")]
    CallTimeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device rejected {request}: {comment} (code {code})")]
    Rejected {
        request: String,
        code: u16,
        comment: String,
    },
}

impl DeviceError {
    /// Human-readable rejection text, for the idempotent-success
    /// classification in the record state machine.
    pub fn rejection_comment(&self) -> Option<&str> {
        match self {
            Self::Rejected { comment, .. } => Some(comment),
            _ => None,
        }
    }
}

impl From<DeviceError> for ErrorKind {
    fn from(err: DeviceError) -> Self {
        ErrorKind::DeviceError(err.to_string())
    }
}

/// Request/response port against a live switcher connection. The record
/// state machine is written against this trait so it can be exercised with
/// a scripted device in tests.
#[async_trait]
pub trait SwitcherCalls: Send + Sync {
    async fn call(&self, request_type: &str, data: Value) -> Result<Value, DeviceError>;
}
