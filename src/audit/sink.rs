//! Audit write path: channel-fed writer task with daily files and
//! size-based continuation rotation.
//!
//! `record` is fire-and-forget: the event goes through an unbounded channel
//! to a single writer task, so a slow disk never delays the request that
//! produced the event, and a write failure is logged and swallowed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::redact::redact_value;
use crate::shared::ShutdownSignal;

/// One journaled action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub user: String,
    pub role: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Rotation limits, configurable mainly so tests can use small files.
#[derive(Debug, Clone)]
pub struct RotationLimits {
    pub max_file_bytes: u64,
    pub max_continuations: u32,
}

impl Default for RotationLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
            max_continuations: 20,
        }
    }
}

/// File name for a date, with an optional continuation suffix:
/// `audit-YYYY-MM-DD.jsonl` / `audit-YYYY-MM-DD_N.jsonl`.
pub fn audit_file_path(dir: &Path, date: &str, suffix: Option<u32>) -> PathBuf {
    let name = match suffix {
        Some(n) => format!("audit-{date}_{n}.jsonl"),
        None => format!("audit-{date}.jsonl"),
    };
    dir.join(name)
}

/// Pick the file the next event should append to, rotating into a numbered
/// continuation when the current one exceeds the size threshold. Exhausting
/// every continuation logs a warning and keeps appending to the last one:
/// events are never dropped for lack of a file.
async fn active_file_path(dir: &Path, date: &str, limits: &RotationLimits) -> PathBuf {
    let primary = audit_file_path(dir, date, None);
    match tokio::fs::metadata(&primary).await {
        Ok(meta) if meta.len() >= limits.max_file_bytes => {}
        _ => return primary,
    }

    for n in 2..=limits.max_continuations {
        let candidate = audit_file_path(dir, date, Some(n));
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.len() >= limits.max_file_bytes => continue,
            _ => return candidate,
        }
    }

    warn!(
        date,
        max = limits.max_continuations,
        "All audit continuations full; appending to the last one"
    );
    audit_file_path(dir, date, Some(limits.max_continuations))
}

/// Append one event. Exposed to the writer task and to tests, which drive
/// rotation deterministically without the channel.
pub(crate) async fn append_event(
    dir: &Path,
    limits: &RotationLimits,
    event: &AuditEvent,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let date = event.ts.format("%Y-%m-%d").to_string();
    let path = active_file_path(dir, &date, limits).await;

    let mut line = serde_json::to_string(event)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Handle used by request paths to journal events.
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditSink {
    /// Spawn the writer task and return the shared handle.
    pub fn start(dir: PathBuf, limits: RotationLimits, shutdown: ShutdownSignal) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        if let Err(e) = append_event(&dir, &limits, &event).await {
                            error!("Audit write failed: {e}");
                        }
                    }
                    _ = shutdown.wait() => {
                        // Drain whatever is already queued, then stop.
                        while let Ok(event) = rx.try_recv() {
                            if let Err(e) = append_event(&dir, &limits, &event).await {
                                error!("Audit write failed during drain: {e}");
                            }
                        }
                        debug!("Audit writer stopped");
                        break;
                    }
                }
            }
        });

        Arc::new(Self { tx })
    }

    /// Journal an event. Metadata is redacted here, before it leaves the
    /// request context. Never fails the caller.
    pub fn record(&self, mut event: AuditEvent) {
        if let Some(meta) = &event.meta {
            event.meta = Some(redact_value(meta));
        }
        if self.tx.send(event).is_err() {
            error!("Audit channel closed; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn event(ts: DateTime<Utc>, path: &str) -> AuditEvent {
        AuditEvent {
            ts,
            user: "ana".to_string(),
            role: Some("admin".to_string()),
            method: "POST".to_string(),
            path: path.to_string(),
            status: 200,
            ip: Some("127.0.0.1".to_string()),
            user_agent: None,
            duration_ms: Some(12),
            meta: None,
        }
    }

    #[tokio::test]
    async fn test_rotation_creates_continuation_files() {
        let dir = TempDir::new().unwrap();
        let limits = RotationLimits {
            max_file_bytes: 300,
            max_continuations: 20,
        };
        let ts = "2026-03-01T10:00:00Z".parse().unwrap();

        for i in 0..6 {
            let mut ev = event(ts, "/admin/users");
            ev.meta = Some(json!({"seq": i}));
            append_event(dir.path(), &limits, &ev).await.unwrap();
        }

        assert!(audit_file_path(dir.path(), "2026-03-01", None).exists());
        assert!(audit_file_path(dir.path(), "2026-03-01", Some(2)).exists());
    }

    #[tokio::test]
    async fn test_exhausted_continuations_keep_appending() {
        let dir = TempDir::new().unwrap();
        let limits = RotationLimits {
            max_file_bytes: 1,
            max_continuations: 2,
        };
        let ts = "2026-03-01T10:00:00Z".parse().unwrap();

        for _ in 0..5 {
            append_event(dir.path(), &limits, &event(ts, "/admin/users"))
                .await
                .unwrap();
        }

        // Never drops: the last continuation keeps growing past the limit.
        let last = audit_file_path(dir.path(), "2026-03-01", Some(2));
        let content = std::fs::read_to_string(last).unwrap();
        assert!(content.lines().count() >= 3);
    }
}
