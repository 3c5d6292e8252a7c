// =============================================================================
// Trade Stream — venue WebSocket adapter producing normalized trades
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::net::{Lifecycle, ReconnectPolicy};
use crate::types::Trade;

/// Connect to the aggTrade WebSocket stream for one symbol and hand each
/// normalized [`Trade`] to `sink`.
///
/// Runs until the stream disconnects or errors, then returns so the caller
/// can apply its reconnect policy.
pub async fn run_trade_stream<F>(symbol: &str, sink: &F) -> Result<()>
where
    F: Fn(Trade) + Send + Sync,
{
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@aggTrade");
    info!(url = %url, symbol = %symbol, "connecting to trade WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to trade WebSocket")?;
    info!(symbol = %symbol, "trade WebSocket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_agg_trade(symbol, &text) {
                        Ok(trade) => sink(trade),
                        Err(e) => warn!(error = %e, "failed to parse aggTrade message"),
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "trade WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "trade WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Supervise a trade stream under the shared reconnect lifecycle. Returns
/// only when the policy's attempts are exhausted (FAILED).
pub async fn supervise_trade_stream<F>(
    symbol: Arc<str>,
    policy: ReconnectPolicy,
    sink: Arc<F>,
) -> Result<()>
where
    F: Fn(Trade) + Send + Sync + 'static,
{
    let mut lifecycle = Lifecycle::new(format!("trade:{symbol}"), policy);
    lifecycle.connect_requested();

    loop {
        let outcome = run_trade_stream(&symbol, sink.as_ref()).await;
        if outcome.is_ok() {
            // Orderly close still counts as a connection loss for backoff.
            warn!(symbol = %symbol, "trade stream closed by remote");
        }
        match lifecycle.connection_lost() {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                lifecycle.retrying();
            }
            None => {
                error!(symbol = %symbol, "trade stream reconnects exhausted");
                anyhow::bail!("trade stream for {symbol} failed permanently");
            }
        }
    }
}

/// Parse an aggTrade message into a normalized [`Trade`].
///
/// Expected shape:
/// ```json
/// { "e": "aggTrade", "s": "BTCUSDT", "p": "50000.00", "q": "0.123",
///   "T": 1700000000000, "m": true }
/// ```
/// `T` is the exchange trade time; `m` is buyer-is-maker.
fn parse_agg_trade(symbol: &str, text: &str) -> Result<Trade> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;

    let price = Decimal::from_str(root["p"].as_str().context("missing field p")?)
        .context("failed to parse price")?;
    let qty = Decimal::from_str(root["q"].as_str().context("missing field q")?)
        .context("failed to parse quantity")?;
    let timestamp_ms = root["T"].as_i64().context("missing field T")?;
    let buyer_is_maker = root["m"].as_bool().context("missing field m")?;

    Ok(Trade {
        symbol: symbol.to_string(),
        price,
        qty,
        timestamp_ms,
        buyer_is_maker,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_agg_trade_normalizes_fields() {
        let text = r#"{"e":"aggTrade","s":"BTCUSDT","p":"50000.50","q":"0.123","T":1700000000123,"m":true}"#;
        let trade = parse_agg_trade("BTCUSDT", text).unwrap();
        assert_eq!(trade.price, dec!(50000.50));
        assert_eq!(trade.qty, dec!(0.123));
        assert_eq!(trade.timestamp_ms, 1_700_000_000_123);
        assert!(trade.buyer_is_maker);
    }

    #[test]
    fn parse_agg_trade_rejects_missing_fields() {
        let text = r#"{"e":"aggTrade","s":"BTCUSDT","p":"50000.50"}"#;
        assert!(parse_agg_trade("BTCUSDT", text).is_err());
    }
}
