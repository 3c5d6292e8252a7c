// =============================================================================
// Signed Intent Server — the execution side of the fast path
// =============================================================================
//
// Accepts stream connections, rejects frames failing MAC or clock-skew
// checks, and drives the three-phase handshake against an injected handler.
// CONFIRM and ABORT are idempotent per signal_id: the first terminal outcome
// is cached and replayed. Unknown signal ids are authorization failures.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::intent::codec::{Envelope, WireError};
use crate::intent::types::{
    AbortResponse, ConfirmResponse, IntentSignal, PrepareResponse, SignalType,
};
use crate::metrics::EngineMetrics;

/// The execution service behind the handshake. PREPARE validates and sizes;
/// CONFIRM executes; ABORT releases.
#[async_trait]
pub trait IntentHandler: Send + Sync + 'static {
    async fn prepare(&self, signal: IntentSignal) -> PrepareResponse;
    async fn confirm(&self, signal_id: &str) -> ConfirmResponse;
    async fn abort(&self, signal_id: &str) -> AbortResponse;
}

/// Cached terminal outcome per signal_id.
#[derive(Debug, Clone)]
enum Terminal {
    Confirmed(ConfirmResponse),
    Aborted(AbortResponse),
}

struct Shared<H> {
    handler: H,
    mac_key: Vec<u8>,
    clock_skew_ms: i64,
    metrics: Arc<EngineMetrics>,
    /// signal_id → prepared flag, set by PREPARE.
    prepared: Mutex<HashMap<String, bool>>,
    /// signal_id → terminal outcome, making CONFIRM/ABORT idempotent.
    terminals: Mutex<HashMap<String, Terminal>>,
}

/// Newline-delimited JSON listener for the fast path.
pub struct IntentServer<H> {
    shared: Arc<Shared<H>>,
}

impl<H: IntentHandler> IntentServer<H> {
    pub fn new(
        handler: H,
        mac_key: impl Into<Vec<u8>>,
        clock_skew_ms: i64,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                mac_key: mac_key.into(),
                clock_skew_ms,
                metrics,
                prepared: Mutex::new(HashMap::new()),
                terminals: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Accept connections forever. Each connection gets its own task.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "intent server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(peer = %peer, "fast path connection accepted");
            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, shared).await {
                    debug!(error = %e, "fast path connection ended");
                }
            });
        }
    }
}

async fn handle_connection<H: IntentHandler>(
    stream: TcpStream,
    shared: Arc<Shared<H>>,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match Envelope::decode(&line) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "undecodable fast path frame — dropped");
                continue;
            }
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Err(e) = request.verify(&shared.mac_key, now_ms, shared.clock_skew_ms) {
            shared.metrics.auth_failures.inc();
            warn!(
                correlation_id = %request.correlation_id,
                error = %e,
                "fast path frame rejected"
            );
            // MAC failures get no response at all; a stale-but-authentic
            // frame gets a typed rejection.
            if matches!(e, WireError::StaleTimestamp(_)) {
                let payload = serde_json::json!({
                    "prepared": false,
                    "signal_id": request.signal_id,
                    "reason": "stale timestamp",
                });
                write_response(&mut write_half, &request, payload, &shared.mac_key).await?;
            }
            continue;
        }

        let payload = dispatch(&request, &shared).await;
        write_response(&mut write_half, &request, payload, &shared.mac_key).await?;
    }
    Ok(())
}

async fn dispatch<H: IntentHandler>(request: &Envelope, shared: &Shared<H>) -> Value {
    match request.signal_type {
        SignalType::Prepare => {
            let signal: IntentSignal = match serde_json::from_value(request.payload.clone()) {
                Ok(signal) => signal,
                Err(e) => {
                    return serde_json::json!({
                        "prepared": false,
                        "signal_id": request.signal_id,
                        "reason": format!("malformed signal: {e}"),
                    });
                }
            };
            let response = shared.handler.prepare(signal).await;
            shared
                .prepared
                .lock()
                .insert(request.signal_id.clone(), response.prepared);
            serde_json::to_value(&response).expect("response serializes")
        }

        SignalType::Confirm => {
            // Idempotent: replay the cached terminal outcome.
            if let Some(terminal) = shared.terminals.lock().get(&request.signal_id) {
                return match terminal {
                    Terminal::Confirmed(r) => serde_json::to_value(r).expect("serializes"),
                    Terminal::Aborted(_) => serde_json::json!({
                        "executed": false,
                        "reason": "already aborted",
                    }),
                };
            }
            if !shared
                .prepared
                .lock()
                .get(&request.signal_id)
                .copied()
                .unwrap_or(false)
            {
                shared.metrics.auth_failures.inc();
                return serde_json::json!({
                    "executed": false,
                    "reason": "unknown signal_id",
                });
            }

            let response = shared.handler.confirm(&request.signal_id).await;
            shared
                .terminals
                .lock()
                .insert(request.signal_id.clone(), Terminal::Confirmed(response.clone()));
            serde_json::to_value(&response).expect("response serializes")
        }

        SignalType::Abort => {
            if let Some(terminal) = shared.terminals.lock().get(&request.signal_id) {
                return match terminal {
                    Terminal::Aborted(r) => serde_json::to_value(r).expect("serializes"),
                    Terminal::Confirmed(_) => serde_json::json!({ "aborted": false }),
                };
            }
            if !shared.prepared.lock().contains_key(&request.signal_id) {
                shared.metrics.auth_failures.inc();
                return serde_json::json!({ "aborted": false });
            }

            let response = shared.handler.abort(&request.signal_id).await;
            shared
                .terminals
                .lock()
                .insert(request.signal_id.clone(), Terminal::Aborted(response));
            serde_json::to_value(&response).expect("response serializes")
        }
    }
}

async fn write_response(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    request: &Envelope,
    payload: Value,
    mac_key: &[u8],
) -> anyhow::Result<()> {
    let response = Envelope::sealed(
        request.correlation_id.clone(),
        chrono::Utc::now().timestamp_millis(),
        request.signal_id.clone(),
        request.signal_type,
        payload,
        mac_key,
    );
    let mut line = response.encode();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    Ok(())
}
