// =============================================================================
// Candle Buffer — per-(symbol, interval) OHLCV rings fed by kline streams
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::types::Candle;

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Thread-safe ring buffer that stores the most recent closed candles per
/// `(symbol, interval)` pair, oldest first.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles: max_candles.max(1),
        }
    }

    /// Append a closed candle. A candle with the same timestamp as the
    /// current tail replaces it (finalized update after a restart); stale
    /// out-of-order candles are ignored.
    pub fn push(&self, key: CandleKey, candle: Candle) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles));

        match ring.back() {
            Some(last) if last.timestamp_ms == candle.timestamp_ms => {
                ring.pop_back();
                ring.push_back(candle);
            }
            Some(last) if last.timestamp_ms > candle.timestamp_ms => {
                // Replay from a reconnect; the ring already has newer data.
            }
            _ => {
                ring.push_back(candle);
                while ring.len() > self.max_candles {
                    ring.pop_front();
                }
            }
        }
    }

    /// The most recent `count` closed candles, oldest first.
    pub fn recent(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).copied().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn latest(&self, key: &CandleKey) -> Option<Candle> {
        self.buffers.read().get(key).and_then(|r| r.back().copied())
    }

    pub fn len(&self, key: &CandleKey) -> usize {
        self.buffers.read().get(key).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Kline WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the kline WebSocket stream for one `(symbol, interval)` and
/// push closed candles into `buffer`.
///
/// Runs until the stream disconnects or errors, then returns so the
/// supervising task can apply its reconnect policy.
pub async fn run_kline_stream(
    symbol: &str,
    interval: &str,
    buffer: &Arc<CandleBuffer>,
) -> Result<()> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@kline_{interval}");
    info!(url = %url, symbol = %symbol, interval, "connecting to kline WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to kline WebSocket")?;
    info!(symbol = %symbol, interval, "kline WebSocket connected");

    let (_write, mut read) = ws_stream.split();
    let key = CandleKey::new(symbol, interval);

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_kline(&text) {
                        Ok(Some(candle)) => buffer.push(key.clone(), candle),
                        Ok(None) => {} // in-progress candle, wait for close
                        Err(e) => warn!(error = %e, "failed to parse kline message"),
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, interval, error = %e, "kline WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, interval, "kline WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a kline message; returns `Ok(None)` while the candle is still open.
///
/// Expected shape:
/// ```json
/// { "e": "kline", "k": { "t": 1700000000000, "o": "100", "h": "101",
///   "l": "99", "c": "100.5", "v": "12.3", "x": true } }
/// ```
fn parse_kline(text: &str) -> Result<Option<Candle>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;
    let k = &root["k"];

    let closed = k["x"].as_bool().context("missing field x")?;
    if !closed {
        return Ok(None);
    }

    let parse = |field: &str| -> Result<f64> {
        k[field]
            .as_str()
            .with_context(|| format!("missing field {field}"))?
            .parse::<f64>()
            .with_context(|| format!("failed to parse field {field}"))
    };

    Ok(Some(Candle {
        timestamp_ms: k["t"].as_i64().context("missing field t")?,
        open: parse("o")?,
        high: parse("h")?,
        low: parse("l")?,
        close: parse("c")?,
        volume: parse("v")?,
    }))
}
