//! Per-room recording operation state.
//!
//! One `RecordOp` exists per (site, room), created lazily and kept for the
//! life of the process. State checks and transitional writes happen under a
//! std mutex that is never held across an await, so concurrent requests for
//! the same room serialize on the claim and never double-issue a device
//! command. Terminal states are snapshotted to a durable file so a restart
//! does not forget the last output path.

pub mod ops;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpState {
    Idle,
    Starting,
    Active,
    Stopping,
    Error,
}

impl OpState {
    fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// Serializable view of an operation, embedded in responses and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpSnapshot {
    pub state: OpState,
    pub ts: DateTime<Utc>,
    pub last_output_path: Option<String>,
    pub last_error: Option<String>,
}

struct OpInner {
    state: OpState,
    ts: DateTime<Utc>,
    last_output_path: Option<String>,
    last_error: Option<String>,
}

/// Outcome of an atomic claim for a start/stop transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the transition and must drive it to completion.
    Claimed,
    /// Another caller is already driving the same transition.
    InProgress,
}

pub struct RecordOp {
    inner: StdMutex<OpInner>,
}

impl RecordOp {
    fn new() -> Self {
        Self::from_parts(OpState::Idle, None, None)
    }

    fn from_parts(
        state: OpState,
        last_output_path: Option<String>,
        last_error: Option<String>,
    ) -> Self {
        Self {
            inner: StdMutex::new(OpInner {
                state,
                ts: Utc::now(),
                last_output_path,
                last_error,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OpInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> OpState {
        self.lock().state
    }

    pub fn snapshot(&self) -> OpSnapshot {
        let inner = self.lock();
        OpSnapshot {
            state: inner.state,
            ts: inner.ts,
            last_output_path: inner.last_output_path.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Claim the starting transition. Atomic: of N concurrent callers
    /// exactly one gets `Claimed`; the rest observe `InProgress`.
    pub fn claim_start(&self) -> Claim {
        let mut inner = self.lock();
        if inner.state == OpState::Starting {
            return Claim::InProgress;
        }
        inner.state = OpState::Starting;
        inner.ts = Utc::now();
        inner.last_error = None;
        Claim::Claimed
    }

    /// Claim the stopping transition; same contract as [`claim_start`].
    pub fn claim_stop(&self) -> Claim {
        let mut inner = self.lock();
        if inner.state == OpState::Stopping {
            return Claim::InProgress;
        }
        inner.state = OpState::Stopping;
        inner.ts = Utc::now();
        inner.last_error = None;
        Claim::Claimed
    }

    pub fn finish_active(&self) {
        let mut inner = self.lock();
        inner.state = OpState::Active;
        inner.ts = Utc::now();
    }

    pub fn finish_idle(&self, output_path: Option<String>) {
        let mut inner = self.lock();
        inner.state = OpState::Idle;
        inner.ts = Utc::now();
        if let Some(path) = output_path {
            inner.last_output_path = Some(path);
        }
    }

    pub fn finish_error(&self, message: impl Into<String>) {
        let mut inner = self.lock();
        inner.state = OpState::Error;
        inner.ts = Utc::now();
        inner.last_error = Some(message.into());
    }

    /// Reconcile the in-memory state with a freshly observed device status.
    /// Self-healing against process restarts or missed transitions; also
    /// clears `error` on the first successful poll.
    pub fn reconcile(&self, device_active: bool) {
        let mut inner = self.lock();
        if device_active {
            if inner.state != OpState::Active {
                inner.state = OpState::Active;
                inner.ts = Utc::now();
            }
        } else if matches!(inner.state, OpState::Active | OpState::Error) {
            inner.state = OpState::Idle;
            inner.ts = Utc::now();
        }
    }
}

/// All record operations, keyed by `site:room`, plus the durable snapshot.
pub struct RecordRegistry {
    ops: DashMap<String, Arc<RecordOp>>,
    state_path: Option<PathBuf>,
}

impl RecordRegistry {
    pub fn new(state_path: Option<PathBuf>) -> Self {
        Self {
            ops: DashMap::new(),
            state_path,
        }
    }

    fn key(site: &str, room: &str) -> String {
        format!("{site}:{room}")
    }

    pub fn op(&self, site: &str, room: &str) -> Arc<RecordOp> {
        self.ops
            .entry(Self::key(site, room))
            .or_insert_with(|| Arc::new(RecordOp::new()))
            .clone()
    }

    pub fn size(&self) -> usize {
        self.ops.len()
    }

    /// Seed operations from the durable snapshot. Transitional states found
    /// on disk mean the process died mid-operation; they come back as idle
    /// and the next status poll reconciles against the device.
    pub async fn load(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), "Cannot read record state: {e}");
                return;
            }
        };
        let snapshots: BTreeMap<String, OpSnapshot> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), "Record state unparseable, starting clean: {e}");
                return;
            }
        };

        for (key, mut snap) in snapshots {
            if snap.state.is_transitional() {
                snap.state = OpState::Idle;
            }
            self.ops.insert(
                key,
                Arc::new(RecordOp::from_parts(
                    snap.state,
                    snap.last_output_path,
                    snap.last_error,
                )),
            );
        }
        debug!(count = self.ops.len(), "Record state loaded");
    }

    /// Persist the current snapshots, fire-and-forget. A write failure is
    /// logged and never affects the request that triggered it.
    pub fn persist_soon(&self) {
        let Some(path) = self.state_path.clone() else {
            return;
        };
        let snapshots: BTreeMap<String, OpSnapshot> = self
            .ops
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();

        tokio::spawn(async move {
            if let Err(e) = write_snapshots(&path, &snapshots).await {
                warn!(path = %path.display(), "Cannot persist record state: {e}");
            }
        });
    }
}

async fn write_snapshots(
    path: &PathBuf,
    snapshots: &BTreeMap<String, OpSnapshot>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let serialized = serde_json::to_string_pretty(snapshots)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serialized).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_start_is_exclusive() {
        let op = RecordOp::new();
        assert_eq!(op.claim_start(), Claim::Claimed);
        assert_eq!(op.claim_start(), Claim::InProgress);
        op.finish_active();
        // A new claim is possible once the transition completed.
        assert_eq!(op.claim_start(), Claim::Claimed);
    }

    #[test]
    fn test_reconcile_clears_error_on_successful_poll() {
        let op = RecordOp::new();
        op.finish_error("boom");
        assert_eq!(op.state(), OpState::Error);

        op.reconcile(false);
        assert_eq!(op.state(), OpState::Idle);

        op.reconcile(true);
        assert_eq!(op.state(), OpState::Active);
    }

    #[test]
    fn test_finish_idle_keeps_last_output_path() {
        let op = RecordOp::new();
        op.finish_idle(Some("/rec/a.mkv".into()));
        op.finish_idle(None);
        assert_eq!(op.snapshot().last_output_path.as_deref(), Some("/rec/a.mkv"));
    }

    #[tokio::test]
    async fn test_registry_persist_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("record-state.json");

        let registry = RecordRegistry::new(Some(path.clone()));
        let op = registry.op("central", "room1");
        op.finish_idle(Some("/rec/out.mkv".into()));
        registry.op("central", "room2").finish_error("lost device");

        // Write synchronously for the test.
        let snapshots: BTreeMap<String, OpSnapshot> = registry
            .ops
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        write_snapshots(&path, &snapshots).await.unwrap();

        let reloaded = RecordRegistry::new(Some(path));
        reloaded.load().await;
        assert_eq!(reloaded.size(), 2);
        let op = reloaded.op("central", "room1");
        assert_eq!(op.snapshot().last_output_path.as_deref(), Some("/rec/out.mkv"));
        assert_eq!(reloaded.op("central", "room2").state(), OpState::Error);
    }

    #[tokio::test]
    async fn test_load_resets_transitional_states() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("record-state.json");
        std::fs::write(
            &path,
            r#"{"central:room1": {"state": "starting", "ts": "2026-01-01T00:00:00Z",
                "lastOutputPath": null, "lastError": null}}"#,
        )
        .unwrap();

        let registry = RecordRegistry::new(Some(path));
        registry.load().await;
        assert_eq!(registry.op("central", "room1").state(), OpState::Idle);
    }
}
