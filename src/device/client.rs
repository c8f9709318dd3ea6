//! Persistent WebSocket client for one switcher device.
//!
//! One client owns one connection. Outbound frames go through an unbounded
//! channel to a writer task; a reader task routes request-responses back to
//! waiting callers through per-request oneshot channels. When the socket
//! closes, the client flips to `closed` and fails all in-flight calls; the
//! pool re-establishes on the next request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::protocol::{
    auth_response, identify_frame, request_frame, AuthChallenge, Envelope, RequestStatus,
    OP_HELLO, OP_IDENTIFIED, OP_REQUEST_RESPONSE,
};
use super::{DeviceError, DeviceTarget, SwitcherCalls};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = DashMap<String, oneshot::Sender<Result<Value, DeviceError>>>;

pub struct DeviceClient {
    out_tx: mpsc::UnboundedSender<Message>,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl DeviceClient {
    /// Establish a connection, bounded by `connect_timeout`. The bound is
    /// separate from the per-call timeout because an unreachable device
    /// should fail fast rather than tie up a request.
    pub async fn connect(
        target: &DeviceTarget,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, DeviceError> {
        match tokio::time::timeout(connect_timeout, Self::establish(target, call_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::ConnectTimeout(connect_timeout)),
        }
    }

    async fn establish(
        target: &DeviceTarget,
        call_timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let (ws, _) = connect_async(target.endpoint.as_str())
            .await
            .map_err(|e| DeviceError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // Hello → Identify → Identified
        let hello = read_handshake_frame(&mut stream).await?;
        if hello.op != OP_HELLO {
            return Err(DeviceError::Handshake(format!(
                "expected hello, got op {}",
                hello.op
            )));
        }

        let auth = match hello.d.get("authentication") {
            Some(challenge) => {
                let challenge: AuthChallenge = serde_json::from_value(challenge.clone())
                    .map_err(|e| DeviceError::Handshake(format!("bad auth challenge: {e}")))?;
                Some(auth_response(
                    &target.password,
                    &challenge.salt,
                    &challenge.challenge,
                ))
            }
            None => None,
        };

        send_frame(&mut sink, &identify_frame(auth)).await?;

        loop {
            let frame = read_handshake_frame(&mut stream).await?;
            if frame.op == OP_IDENTIFIED {
                break;
            }
            // Events may arrive before Identified; skip them.
        }

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, out_rx));
        tokio::spawn(read_loop(stream, pending.clone(), closed.clone()));

        debug!(endpoint = %target.endpoint, "Switcher connection identified");

        Ok(Self {
            out_tx,
            pending,
            closed,
            call_timeout,
        })
    }

    /// Whether the device side has closed the connection (observed
    /// asynchronously by the reader task).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the connection down; in-flight calls fail with `Closed`.
    pub fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.out_tx.send(Message::Close(None));
    }

    async fn call_inner(&self, request_type: &str, data: Value) -> Result<Value, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let frame = request_frame(request_type, &request_id, data);
        let text = serde_json::to_string(&frame)
            .map_err(|e| DeviceError::Protocol(format!("cannot encode request: {e}")))?;
        if self.out_tx.send(Message::Text(text.into())).is_err() {
            self.pending.remove(&request_id);
            return Err(DeviceError::Closed);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DeviceError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(DeviceError::CallTimeout(request_type.to_string()))
            }
        }
    }
}

#[async_trait]
impl SwitcherCalls for DeviceClient {
    async fn call(&self, request_type: &str, data: Value) -> Result<Value, DeviceError> {
        self.call_inner(request_type, data).await
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Envelope) -> Result<(), DeviceError> {
    let text = serde_json::to_string(frame)
        .map_err(|e| DeviceError::Protocol(format!("cannot encode frame: {e}")))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| DeviceError::Handshake(e.to_string()))
}

async fn read_handshake_frame(stream: &mut WsStream) -> Result<Envelope, DeviceError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|e| DeviceError::Handshake(format!("bad frame: {e}")));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(DeviceError::Handshake("closed during handshake".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(DeviceError::Handshake(e.to_string())),
        }
    }
}

async fn write_loop(mut sink: WsSink, mut out_rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = out_rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
}

async fn read_loop(mut stream: WsStream, pending: Arc<PendingMap>, closed: Arc<AtomicBool>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
                    warn!("Unparseable frame from switcher, ignoring");
                    continue;
                };
                if envelope.op != OP_REQUEST_RESPONSE {
                    continue;
                }
                route_response(&pending, envelope.d);
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("Switcher read error: {e}");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Fail everything still waiting; the pool reconnects on the next call.
    let ids: Vec<String> = pending.iter().map(|e| e.key().clone()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(DeviceError::Closed));
        }
    }
}

fn route_response(pending: &PendingMap, d: Value) {
    let Some(request_id) = d.get("requestId").and_then(Value::as_str) else {
        return;
    };
    let Some((_, tx)) = pending.remove(request_id) else {
        return;
    };

    let status: RequestStatus = match serde_json::from_value(
        d.get("requestStatus").cloned().unwrap_or(Value::Null),
    ) {
        Ok(status) => status,
        Err(e) => {
            let _ = tx.send(Err(DeviceError::Protocol(format!("bad request status: {e}"))));
            return;
        }
    };

    let outcome = if status.result {
        Ok(d.get("responseData")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new())))
    } else {
        Err(DeviceError::Rejected {
            request: d
                .get("requestType")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            code: status.code,
            comment: status.comment.unwrap_or_default(),
        })
    };
    let _ = tx.send(outcome);
}
