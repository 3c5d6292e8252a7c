// =============================================================================
// Signed Intent Client — the detection side of the fast path
// =============================================================================
//
// One worker task owns the socket; all sends serialize through it. Requests
// pipeline and responses match by correlation id. A per-message deadline
// fails the caller with IPC_TIMEOUT and releases the correlation slot; an
// operator disconnect cancels every pending correlation with CANCELLED and
// a later reconnect never retries them. The engine never auto-resends a
// PREPARE after a reconnect.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{EngineEvent, EventBus};
use crate::config::ConfigSnapshot;
use crate::intent::codec::Envelope;
use crate::intent::types::{
    AbortResponse, ConfirmResponse, IntentSignal, PrepareResponse, SignalType,
};
use crate::metrics::EngineMetrics;
use crate::net::{ConnectionState, Lifecycle, ReconnectPolicy};

/// Fast-path client tunables.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub addr: String,
    pub mac_key: Vec<u8>,
    pub message_timeout: Duration,
    pub connect_timeout: Duration,
    pub policy: ReconnectPolicy,
}

impl IpcConfig {
    pub fn from_snapshot(addr: impl Into<String>, mac_key: Vec<u8>, snap: &ConfigSnapshot) -> Self {
        Self {
            addr: addr.into(),
            mac_key,
            message_timeout: Duration::from_millis(
                snap.i64("ipc.message_timeout_ms").unwrap_or(500) as u64,
            ),
            connect_timeout: Duration::from_millis(
                snap.i64("ipc.connect_timeout_ms").unwrap_or(2_000) as u64,
            ),
            policy: ReconnectPolicy {
                base_delay: Duration::from_millis(snap.i64("ipc.base_delay_ms").unwrap_or(250) as u64),
                max_delay: Duration::from_millis(snap.i64("ipc.max_delay_ms").unwrap_or(8_000) as u64),
                max_attempts: snap.i64("ipc.max_attempts").unwrap_or(10) as u32,
                jitter: 0.1,
            },
        }
    }
}

/// Fast-path failures surfaced to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpcError {
    #[error("IPC_TIMEOUT")]
    Timeout,
    #[error("CANCELLED")]
    Cancelled,
    #[error("not connected")]
    NotConnected,
    #[error("connection failed permanently")]
    Failed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

enum Command {
    Request {
        correlation_id: String,
        signal_type: SignalType,
        signal_id: String,
        payload: Value,
        resp: oneshot::Sender<Result<Value, IpcError>>,
    },
    Release(String),
    Connect,
    Disconnect,
}

/// Handle to the fast-path worker. Cheap to clone.
#[derive(Clone)]
pub struct IntentClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<ConnectionState>>,
    message_timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl IntentClient {
    /// Spawn the worker and begin connecting immediately.
    pub fn spawn(cfg: IpcConfig, metrics: Arc<EngineMetrics>, bus: Arc<EventBus>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let message_timeout = cfg.message_timeout;

        tokio::spawn(worker(cfg, metrics.clone(), bus, cmd_rx, state.clone()));

        Self {
            cmd_tx,
            state,
            message_timeout,
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// `PREPARE(signal)`.
    pub async fn prepare(&self, signal: &IntentSignal) -> Result<PrepareResponse, IpcError> {
        let payload = serde_json::to_value(signal)
            .map_err(|e| IpcError::Protocol(format!("serialize signal: {e}")))?;
        let value = self
            .request(SignalType::Prepare, &signal.signal_id, payload)
            .await?;
        serde_json::from_value(value).map_err(|e| IpcError::Protocol(format!("prepare response: {e}")))
    }

    /// `CONFIRM(signal_id)`. Only call after `prepared == true`.
    pub async fn confirm(&self, signal_id: &str) -> Result<ConfirmResponse, IpcError> {
        let value = self
            .request(
                SignalType::Confirm,
                signal_id,
                serde_json::json!({ "signal_id": signal_id }),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| IpcError::Protocol(format!("confirm response: {e}")))
    }

    /// `ABORT(signal_id)`.
    pub async fn abort(&self, signal_id: &str) -> Result<AbortResponse, IpcError> {
        let value = self
            .request(
                SignalType::Abort,
                signal_id,
                serde_json::json!({ "signal_id": signal_id }),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| IpcError::Protocol(format!("abort response: {e}")))
    }

    /// Request a reconnect after a disconnect or permanent failure.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect);
    }

    /// Disconnect and cancel all pending correlations with CANCELLED.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    async fn request(
        &self,
        signal_type: SignalType,
        signal_id: &str,
        payload: Value,
    ) -> Result<Value, IpcError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let correlation_id = Uuid::new_v4().to_string();
        let signal_id = signal_id.to_string();
        self.cmd_tx
            .send(Command::Request {
                correlation_id: correlation_id.clone(),
                signal_type,
                signal_id,
                payload,
                resp: resp_tx,
            })
            .map_err(|_| IpcError::Failed)?;

        match tokio::time::timeout(self.message_timeout, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IpcError::Cancelled),
            Err(_) => {
                // Deadline hit: fail the caller and release the slot.
                let _ = self.cmd_tx.send(Command::Release(correlation_id));
                self.metrics.ipc_messages_failed.inc();
                Err(IpcError::Timeout)
            }
        }
    }
}

struct Pending {
    resp: oneshot::Sender<Result<Value, IpcError>>,
    sent_at: Instant,
}

enum LoopExit {
    ConnectionLost,
    Disconnect,
    CommandsClosed,
}

async fn worker(
    cfg: IpcConfig,
    metrics: Arc<EngineMetrics>,
    bus: Arc<EventBus>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let mut lifecycle = Lifecycle::new("intent-client", cfg.policy);
    let mut pending: HashMap<String, Pending> = HashMap::new();
    lifecycle.connect_requested();

    loop {
        *state.write() = lifecycle.state();

        match lifecycle.state() {
            ConnectionState::Connecting => {
                match tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(&cfg.addr)).await
                {
                    Ok(Ok(stream)) => {
                        lifecycle.connected();
                        *state.write() = ConnectionState::Connected;
                        info!(addr = %cfg.addr, "fast path connected");

                        let exit =
                            connected_loop(stream, &cfg, &metrics, &mut cmd_rx, &mut pending).await;
                        match exit {
                            LoopExit::Disconnect => {
                                cancel_all(&mut pending);
                                lifecycle.disconnect();
                            }
                            LoopExit::ConnectionLost => {
                                metrics.ipc_reconnect_attempts.inc();
                                if !backoff(&mut lifecycle, &mut cmd_rx, &mut pending).await {
                                    bus.publish(EngineEvent::IpcConnectionFailed {
                                        attempts: lifecycle.attempts(),
                                    });
                                }
                            }
                            LoopExit::CommandsClosed => return,
                        }
                    }
                    _ => {
                        warn!(addr = %cfg.addr, "fast path connect failed");
                        metrics.ipc_reconnect_attempts.inc();
                        if !backoff(&mut lifecycle, &mut cmd_rx, &mut pending).await {
                            bus.publish(EngineEvent::IpcConnectionFailed {
                                attempts: lifecycle.attempts(),
                            });
                        }
                    }
                }
            }

            ConnectionState::Disconnected | ConnectionState::Failed => {
                let failed = lifecycle.state() == ConnectionState::Failed;
                match cmd_rx.recv().await {
                    Some(Command::Connect) => {
                        if failed {
                            // A fresh connect resets the attempt budget.
                            lifecycle = Lifecycle::new("intent-client", cfg.policy);
                        }
                        lifecycle.connect_requested();
                    }
                    Some(Command::Disconnect) => {
                        cancel_all(&mut pending);
                        lifecycle.disconnect();
                    }
                    Some(Command::Request { resp, .. }) => {
                        let _ = resp.send(Err(if failed {
                            IpcError::Failed
                        } else {
                            IpcError::NotConnected
                        }));
                    }
                    Some(Command::Release(id)) => {
                        pending.remove(&id);
                    }
                    None => return,
                }
            }

            // `backoff` and `connected_loop` drive these transitions.
            ConnectionState::Reconnecting | ConnectionState::Connected => unreachable!(),
        }
    }
}

/// Sleep the backoff while still servicing commands. Returns `false` once
/// attempts are exhausted (FAILED).
async fn backoff(
    lifecycle: &mut Lifecycle,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    pending: &mut HashMap<String, Pending>,
) -> bool {
    let Some(delay) = lifecycle.connection_lost() else {
        return false;
    };

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => {
                lifecycle.retrying();
                return true;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Disconnect) => {
                    cancel_all(pending);
                    lifecycle.disconnect();
                    return true;
                }
                Some(Command::Request { resp, .. }) => {
                    let _ = resp.send(Err(IpcError::NotConnected));
                }
                Some(Command::Release(id)) => {
                    pending.remove(&id);
                }
                Some(Command::Connect) | None => {}
            },
        }
    }
}

async fn connected_loop(
    stream: TcpStream,
    cfg: &IpcConfig,
    metrics: &Arc<EngineMetrics>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    pending: &mut HashMap<String, Pending>,
) -> LoopExit {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Request { correlation_id, signal_type, signal_id, payload, resp }) => {
                    let envelope = Envelope::sealed(
                        correlation_id.clone(),
                        chrono::Utc::now().timestamp_millis(),
                        signal_id,
                        signal_type,
                        payload,
                        &cfg.mac_key,
                    );
                    let mut line = envelope.encode();
                    line.push('\n');

                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        warn!(error = %e, "fast path write failed");
                        let _ = resp.send(Err(IpcError::NotConnected));
                        return LoopExit::ConnectionLost;
                    }
                    metrics.ipc_messages_sent.inc();
                    pending.insert(correlation_id, Pending { resp, sent_at: Instant::now() });
                }
                Some(Command::Release(id)) => { pending.remove(&id); }
                Some(Command::Disconnect) => return LoopExit::Disconnect,
                Some(Command::Connect) => {}
                None => return LoopExit::CommandsClosed,
            },

            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_response(&line, metrics, pending),
                Ok(None) => {
                    warn!("fast path socket closed by server");
                    return LoopExit::ConnectionLost;
                }
                Err(e) => {
                    warn!(error = %e, "fast path read error");
                    return LoopExit::ConnectionLost;
                }
            },
        }
    }
}

fn handle_response(line: &str, metrics: &Arc<EngineMetrics>, pending: &mut HashMap<String, Pending>) {
    let envelope = match Envelope::decode(line) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "undecodable fast path response");
            return;
        }
    };

    match pending.remove(&envelope.correlation_id) {
        Some(entry) => {
            metrics.ipc_messages_received.inc();
            metrics
                .ipc_latency
                .observe(entry.sent_at.elapsed().as_secs_f64());
            let _ = entry.resp.send(Ok(envelope.payload));
        }
        None => {
            // The caller already timed out and released the slot.
            debug!(correlation_id = %envelope.correlation_id, "late response discarded");
        }
    }
}

fn cancel_all(pending: &mut HashMap<String, Pending>) {
    for (_, entry) in pending.drain() {
        let _ = entry.resp.send(Err(IpcError::Cancelled));
    }
}
