//! Idempotent record operations, polled to convergence against the device.
//!
//! Every operation takes the per-room [`RecordOp`] plus a switcher port and
//! returns a typed outcome; device complaints that merely say "you already
//! did that" are mapped to idempotent successes rather than errors.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::{Claim, RecordOp};
use crate::config::DeviceConfig;
use crate::device::protocol::{
    is_already_active_message, is_not_active_message, is_pause_noop_message,
};
use crate::device::SwitcherCalls;
use crate::domain::ErrorKind;

/// Convergence polling bounds.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay after a start before the first status read.
    pub settle: Duration,
    pub interval: Duration,
    pub attempts: u32,
    /// Extra reads when the device reports active output with zero bytes.
    pub status_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            interval: Duration::from_millis(250),
            attempts: 40,
            status_retries: 6,
        }
    }
}

impl From<&DeviceConfig> for PollConfig {
    fn from(cfg: &DeviceConfig) -> Self {
        Self {
            settle: Duration::from_millis(cfg.settle_ms),
            interval: Duration::from_millis(cfg.poll_interval_ms),
            attempts: cfg.poll_attempts,
            status_retries: cfg.status_retries,
        }
    }
}

/// Parsed essentials of a device record status blob.
#[derive(Debug, Clone, Copy)]
pub struct StatusView {
    pub active: bool,
    pub paused: bool,
    pub bytes: u64,
    pub duration_ms: u64,
}

impl StatusView {
    pub fn parse(value: &Value) -> Self {
        Self {
            active: value
                .get("outputActive")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            paused: value
                .get("outputPaused")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            bytes: value.get("outputBytes").and_then(Value::as_u64).unwrap_or(0),
            duration_ms: value
                .get("outputDuration")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        }
    }

    /// The device is producing output: active flag up, or bytes/duration
    /// already advancing (covers the flag lagging right after a start).
    pub fn has_output(&self) -> bool {
        self.active || self.bytes > 0 || self.duration_ms > 0
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Started { status: Value },
    Already { status: Option<Value>, note: Option<String> },
    InProgress,
}

#[derive(Debug)]
pub enum StopOutcome {
    Stopped {
        status: Value,
        output_path: Option<String>,
    },
    Already {
        status: Option<Value>,
        note: Option<String>,
    },
    InProgress,
}

#[derive(Debug)]
pub enum PauseOutcome {
    Changed { status: Value },
    Already { status: Option<Value>, note: Option<String> },
}

async fn record_status(
    op: &RecordOp,
    dev: &dyn SwitcherCalls,
) -> Result<Value, ErrorKind> {
    match dev.call("GetRecordStatus", json!({})).await {
        Ok(status) => Ok(status),
        Err(e) => {
            op.finish_error(e.to_string());
            Err(e.into())
        }
    }
}

/// Start recording. Exactly one concurrent caller issues the device
/// command; the others observe `InProgress` (or `Already` once active).
pub async fn start(
    op: &RecordOp,
    dev: &dyn SwitcherCalls,
    poll: &PollConfig,
) -> Result<StartOutcome, ErrorKind> {
    if op.claim_start() == Claim::InProgress {
        return Ok(StartOutcome::InProgress);
    }

    // Claimed. Confirm against the device before issuing anything: the
    // in-memory state may lag a device restart.
    let before = record_status(op, dev).await?;
    if StatusView::parse(&before).active {
        op.finish_active();
        return Ok(StartOutcome::Already {
            status: Some(before),
            note: None,
        });
    }

    if let Err(e) = dev.call("StartRecord", json!({})).await {
        let comment = e.rejection_comment().map(str::to_string);
        match comment {
            Some(comment) if is_already_active_message(&comment) => {
                // The device's own duplicate-action complaint; treat as
                // running and let the poll confirm.
                debug!("StartRecord reported already active: {comment}");
            }
            _ => {
                op.finish_error(e.to_string());
                return Err(e.into());
            }
        }
    }

    tokio::time::sleep(poll.settle).await;

    let mut status = record_status(op, dev).await?;
    for _ in 0..poll.attempts {
        if StatusView::parse(&status).has_output() {
            break;
        }
        tokio::time::sleep(poll.interval).await;
        status = record_status(op, dev).await?;
    }

    if StatusView::parse(&status).has_output() {
        op.finish_active();
        Ok(StartOutcome::Started { status })
    } else {
        let message = "timed out waiting for record output to become active";
        op.finish_error(message);
        Err(ErrorKind::DeviceTimeout(message.to_string()))
    }
}

/// Stop recording, capturing the output artifact path when the device
/// reports one.
pub async fn stop(
    op: &RecordOp,
    dev: &dyn SwitcherCalls,
    poll: &PollConfig,
) -> Result<StopOutcome, ErrorKind> {
    if op.claim_stop() == Claim::InProgress {
        return Ok(StopOutcome::InProgress);
    }

    let before = record_status(op, dev).await?;
    if !StatusView::parse(&before).active {
        op.finish_idle(None);
        return Ok(StopOutcome::Already {
            status: Some(before),
            note: None,
        });
    }

    let output_path = match dev.call("StopRecord", json!({})).await {
        Ok(response) => response
            .get("outputPath")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(e) => {
            let comment = e.rejection_comment().map(str::to_string);
            match comment {
                Some(comment) if is_not_active_message(&comment) => {
                    op.finish_idle(None);
                    return Ok(StopOutcome::Already {
                        status: None,
                        note: Some(comment),
                    });
                }
                _ => {
                    op.finish_error(e.to_string());
                    return Err(e.into());
                }
            }
        }
    };

    let mut status = record_status(op, dev).await?;
    for _ in 0..poll.attempts {
        if !StatusView::parse(&status).active {
            break;
        }
        tokio::time::sleep(poll.interval).await;
        status = record_status(op, dev).await?;
    }

    op.finish_idle(output_path.clone());
    Ok(StopOutcome::Stopped {
        status,
        output_path,
    })
}

/// Pause: a no-op (never an error) when the device is not recording or is
/// already paused.
pub async fn pause(
    op: &RecordOp,
    dev: &dyn SwitcherCalls,
) -> Result<PauseOutcome, ErrorKind> {
    let before = record_status(op, dev).await?;
    let view = StatusView::parse(&before);
    if !view.active {
        op.reconcile(false);
        return Ok(PauseOutcome::Already {
            status: Some(before),
            note: Some("not recording".to_string()),
        });
    }
    if view.paused {
        return Ok(PauseOutcome::Already {
            status: Some(before),
            note: Some("already paused".to_string()),
        });
    }

    if let Err(e) = dev.call("PauseRecord", json!({})).await {
        let comment = e.rejection_comment().map(str::to_string);
        match comment {
            Some(comment) if is_pause_noop_message(&comment) => {
                return Ok(PauseOutcome::Already {
                    status: None,
                    note: Some(comment),
                });
            }
            _ => {
                op.finish_error(e.to_string());
                return Err(e.into());
            }
        }
    }

    let status = record_status(op, dev).await?;
    op.reconcile(StatusView::parse(&status).active);
    Ok(PauseOutcome::Changed { status })
}

/// Resume: a no-op when not recording or not paused.
pub async fn resume(
    op: &RecordOp,
    dev: &dyn SwitcherCalls,
) -> Result<PauseOutcome, ErrorKind> {
    let before = record_status(op, dev).await?;
    let view = StatusView::parse(&before);
    if !view.active {
        op.reconcile(false);
        return Ok(PauseOutcome::Already {
            status: Some(before),
            note: Some("not recording".to_string()),
        });
    }
    if !view.paused {
        return Ok(PauseOutcome::Already {
            status: Some(before),
            note: Some("not paused".to_string()),
        });
    }

    if let Err(e) = dev.call("ResumeRecord", json!({})).await {
        let comment = e.rejection_comment().map(str::to_string);
        match comment {
            Some(comment) if is_pause_noop_message(&comment) => {
                return Ok(PauseOutcome::Already {
                    status: None,
                    note: Some(comment),
                });
            }
            _ => {
                op.finish_error(e.to_string());
                return Err(e.into());
            }
        }
    }

    let status = record_status(op, dev).await?;
    op.reconcile(StatusView::parse(&status).active);
    Ok(PauseOutcome::Changed { status })
}

/// Pure status read, with a short retry while the device reports active
/// output with zero bytes (avoids a false "just started, no data" answer).
/// Reconciles the in-memory state as a side effect.
pub async fn status(
    op: &RecordOp,
    dev: &dyn SwitcherCalls,
    poll: &PollConfig,
) -> Result<Value, ErrorKind> {
    let mut status = record_status(op, dev).await?;
    let mut view = StatusView::parse(&status);

    let mut retries = 0;
    while view.active && view.bytes == 0 && view.duration_ms == 0 && retries < poll.status_retries {
        tokio::time::sleep(poll.interval).await;
        status = record_status(op, dev).await?;
        view = StatusView::parse(&status);
        retries += 1;
    }

    op.reconcile(view.active);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::record::OpState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted switcher with just enough behavior for the state machine.
    #[derive(Default)]
    struct MockDevice {
        active: AtomicBool,
        paused: AtomicBool,
        start_calls: AtomicU32,
        stop_calls: AtomicU32,
        pause_calls: AtomicU32,
        resume_calls: AtomicU32,
        status_calls: AtomicU32,
        /// Return zero bytes for this many status reads even while active.
        zero_byte_reads: AtomicU32,
        /// Rejection comment for StartRecord, if any.
        start_rejection: Option<String>,
        /// Whether StartRecord actually flips the device to active.
        start_has_effect: bool,
    }

    impl MockDevice {
        fn idle() -> Self {
            Self {
                start_has_effect: true,
                ..Default::default()
            }
        }

        fn recording() -> Self {
            let dev = Self::idle();
            dev.active.store(true, Ordering::SeqCst);
            dev
        }

        fn status_json(&self) -> Value {
            let active = self.active.load(Ordering::SeqCst);
            let zero = self
                .zero_byte_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            json!({
                "outputActive": active,
                "outputPaused": self.paused.load(Ordering::SeqCst),
                "outputBytes": if active && !zero { 2048 } else { 0 },
                "outputDuration": if active && !zero { 1500 } else { 0 },
            })
        }
    }

    #[async_trait]
    impl SwitcherCalls for MockDevice {
        async fn call(&self, request_type: &str, _data: Value) -> Result<Value, DeviceError> {
            match request_type {
                "GetRecordStatus" => {
                    self.status_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(self.status_json())
                }
                "StartRecord" => {
                    self.start_calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(comment) = &self.start_rejection {
                        return Err(DeviceError::Rejected {
                            request: "StartRecord".into(),
                            code: 500,
                            comment: comment.clone(),
                        });
                    }
                    if self.start_has_effect {
                        self.active.store(true, Ordering::SeqCst);
                    }
                    Ok(json!({}))
                }
                "StopRecord" => {
                    self.stop_calls.fetch_add(1, Ordering::SeqCst);
                    self.active.store(false, Ordering::SeqCst);
                    Ok(json!({"outputPath": "/recordings/out.mkv"}))
                }
                "PauseRecord" => {
                    self.pause_calls.fetch_add(1, Ordering::SeqCst);
                    self.paused.store(true, Ordering::SeqCst);
                    Ok(json!({}))
                }
                "ResumeRecord" => {
                    self.resume_calls.fetch_add(1, Ordering::SeqCst);
                    self.paused.store(false, Ordering::SeqCst);
                    Ok(json!({}))
                }
                other => Err(DeviceError::Protocol(format!("unexpected call {other}"))),
            }
        }
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            settle: Duration::from_millis(1),
            interval: Duration::from_millis(1),
            attempts: 3,
            status_retries: 6,
        }
    }

    #[tokio::test]
    async fn test_start_on_idle_device() {
        let op = RecordOp::new();
        let dev = MockDevice::idle();

        let out = start(&op, &dev, &fast_poll()).await.unwrap();
        assert!(matches!(out, StartOutcome::Started { .. }));
        assert_eq!(dev.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(op.state(), OpState::Active);
    }

    #[tokio::test]
    async fn test_start_when_device_already_recording_is_idempotent() {
        let op = RecordOp::new();
        let dev = MockDevice::recording();

        let out = start(&op, &dev, &fast_poll()).await.unwrap();
        assert!(matches!(out, StartOutcome::Already { .. }));
        assert_eq!(dev.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(op.state(), OpState::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_starts_issue_one_device_command() {
        let op = Arc::new(RecordOp::new());
        let dev = Arc::new(MockDevice::idle());
        let poll = fast_poll();

        let (a, b) = tokio::join!(
            {
                let (op, dev, poll) = (op.clone(), dev.clone(), poll.clone());
                tokio::spawn(async move { start(&op, dev.as_ref(), &poll).await })
            },
            {
                let (op, dev, poll) = (op.clone(), dev.clone(), poll.clone());
                tokio::spawn(async move { start(&op, dev.as_ref(), &poll).await })
            }
        );
        let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

        // Exactly one caller drove the device; the other saw the claim or
        // the already-active result, never a second command.
        assert_eq!(dev.start_calls.load(Ordering::SeqCst), 1);
        let started = outcomes
            .iter()
            .filter(|o| matches!(o, StartOutcome::Started { .. }))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_start_swallows_device_already_active_complaint() {
        let op = RecordOp::new();
        let mut dev = MockDevice::recording();
        // Memory and the first status read disagree with the device's
        // rejection; force the rejection path.
        dev.active.store(false, Ordering::SeqCst);
        dev.start_rejection = Some("an output is already in progress".to_string());
        dev.start_has_effect = false;

        // The rejected start falls through to polling, which never sees
        // output, so this surfaces as the poll timeout, not a device error.
        let err = start(&op, &dev, &fast_poll()).await.unwrap_err();
        assert!(matches!(err, ErrorKind::DeviceTimeout(_)));
    }

    #[tokio::test]
    async fn test_start_device_failure_transitions_to_error() {
        let op = RecordOp::new();
        let mut dev = MockDevice::idle();
        dev.start_rejection = Some("disk full".to_string());
        dev.start_has_effect = false;

        let err = start(&op, &dev, &fast_poll()).await.unwrap_err();
        assert!(matches!(err, ErrorKind::DeviceError(_)));
        assert_eq!(op.state(), OpState::Error);
    }

    #[tokio::test]
    async fn test_start_timeout_reports_timeout_not_device_error() {
        let op = RecordOp::new();
        let mut dev = MockDevice::idle();
        dev.start_has_effect = false; // command accepted, output never comes

        let err = start(&op, &dev, &fast_poll()).await.unwrap_err();
        assert!(matches!(err, ErrorKind::DeviceTimeout(_)));
        assert_eq!(op.state(), OpState::Error);
    }

    #[tokio::test]
    async fn test_stop_on_idle_room_is_already_not_error() {
        let op = RecordOp::new();
        let dev = MockDevice::idle();

        let out = stop(&op, &dev, &fast_poll()).await.unwrap();
        assert!(matches!(out, StopOutcome::Already { .. }));
        assert_eq!(dev.stop_calls.load(Ordering::SeqCst), 0);
        assert_eq!(op.state(), OpState::Idle);
    }

    #[tokio::test]
    async fn test_stop_captures_output_path() {
        let op = RecordOp::new();
        let dev = MockDevice::recording();

        let out = stop(&op, &dev, &fast_poll()).await.unwrap();
        match out {
            StopOutcome::Stopped { output_path, .. } => {
                assert_eq!(output_path.as_deref(), Some("/recordings/out.mkv"));
            }
            other => panic!("expected Stopped, got {other:?}"),
        }
        assert_eq!(op.state(), OpState::Idle);
        assert_eq!(
            op.snapshot().last_output_path.as_deref(),
            Some("/recordings/out.mkv")
        );
    }

    #[tokio::test]
    async fn test_pause_when_not_recording_is_noop() {
        let op = RecordOp::new();
        let dev = MockDevice::idle();

        let out = pause(&op, &dev).await.unwrap();
        assert!(matches!(out, PauseOutcome::Already { .. }));
        assert_eq!(dev.pause_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_and_resume_round_trip() {
        let op = RecordOp::new();
        let dev = MockDevice::recording();

        let out = pause(&op, &dev).await.unwrap();
        assert!(matches!(out, PauseOutcome::Changed { .. }));
        assert_eq!(dev.pause_calls.load(Ordering::SeqCst), 1);

        // Second pause is a no-op.
        let out = pause(&op, &dev).await.unwrap();
        assert!(matches!(out, PauseOutcome::Already { .. }));
        assert_eq!(dev.pause_calls.load(Ordering::SeqCst), 1);

        let out = resume(&op, &dev).await.unwrap();
        assert!(matches!(out, PauseOutcome::Changed { .. }));

        // Resume when not paused is a no-op.
        let out = resume(&op, &dev).await.unwrap();
        assert!(matches!(out, PauseOutcome::Already { .. }));
        assert_eq!(dev.resume_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_retries_through_zero_byte_window() {
        let op = RecordOp::new();
        let dev = MockDevice::recording();
        dev.zero_byte_reads.store(2, Ordering::SeqCst);

        let out = status(&op, &dev, &fast_poll()).await.unwrap();
        let view = StatusView::parse(&out);
        assert!(view.active);
        assert!(view.bytes > 0);
        // Initial read plus two retries.
        assert_eq!(dev.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(op.state(), OpState::Active);
    }

    #[tokio::test]
    async fn test_status_heals_error_state() {
        let op = RecordOp::new();
        op.finish_error("previous failure");
        let dev = MockDevice::idle();

        status(&op, &dev, &fast_poll()).await.unwrap();
        assert_eq!(op.state(), OpState::Idle);
    }
}
