// =============================================================================
// Derived Inputs — funding rate, open-interest delta, spot-perp basis
// =============================================================================
//
// Event-driven tripwire calculators (OI wipeout, funding squeeze, basis arb)
// consume these REST-polled inputs rather than raw trades. One poller task
// per phase refreshes the store; calculators read snapshots.
// =============================================================================

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Latest derived inputs for one symbol.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DerivedSnapshot {
    /// Current funding rate as a decimal (0.0001 = 0.01%).
    pub funding_rate: f64,
    /// Open interest in contracts.
    pub open_interest: f64,
    /// Percent change of open interest since the previous poll.
    pub oi_delta_pct: f64,
    /// (perp − spot) / spot.
    pub basis_pct: f64,
    /// Exchange timestamp of the newest contributing poll (ms).
    pub updated_ms: i64,
}

/// Thread-safe store of per-symbol derived inputs.
#[derive(Default)]
pub struct DerivedStore {
    inner: RwLock<HashMap<String, DerivedSnapshot>>,
}

impl DerivedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<DerivedSnapshot> {
        self.inner.read().get(symbol).copied()
    }

    pub fn update_funding(&self, symbol: &str, rate: f64, ts_ms: i64) {
        let mut map = self.inner.write();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.funding_rate = rate;
        entry.updated_ms = entry.updated_ms.max(ts_ms);
    }

    /// Record a fresh open-interest reading, deriving the delta from the
    /// prior one.
    pub fn update_open_interest(&self, symbol: &str, open_interest: f64, ts_ms: i64) {
        let mut map = self.inner.write();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.oi_delta_pct = if entry.open_interest > 0.0 {
            (open_interest - entry.open_interest) / entry.open_interest * 100.0
        } else {
            0.0
        };
        entry.open_interest = open_interest;
        entry.updated_ms = entry.updated_ms.max(ts_ms);
    }

    pub fn update_basis(&self, symbol: &str, spot: f64, perp: f64, ts_ms: i64) {
        if spot <= 0.0 {
            return;
        }
        let mut map = self.inner.write();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.basis_pct = (perp - spot) / spot * 100.0;
        entry.updated_ms = entry.updated_ms.max(ts_ms);
    }
}

// ---------------------------------------------------------------------------
// REST pollers
// ---------------------------------------------------------------------------

/// Polls funding, open interest, and mark/spot prices for the watched
/// symbols and feeds the store.
pub struct DerivedPoller {
    client: reqwest::Client,
    futures_base: String,
    spot_base: String,
}

impl DerivedPoller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for DerivedPoller"),
            futures_base: "https://fapi.binance.com".to_string(),
            spot_base: "https://api.binance.com".to_string(),
        }
    }

    /// Override endpoints (tests point these at a local server).
    pub fn with_base_urls(futures_base: impl Into<String>, spot_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            futures_base: futures_base.into(),
            spot_base: spot_base.into(),
        }
    }

    /// One poll round for `symbol`: funding, OI, and basis. Partial
    /// failures are logged and skipped; the store keeps prior values.
    pub async fn poll_symbol(&self, symbol: &str, store: &DerivedStore) {
        match self.fetch_funding(symbol).await {
            Ok((rate, ts)) => store.update_funding(symbol, rate, ts),
            Err(e) => warn!(symbol, error = %e, "funding poll failed"),
        }
        match self.fetch_open_interest(symbol).await {
            Ok((oi, ts)) => store.update_open_interest(symbol, oi, ts),
            Err(e) => warn!(symbol, error = %e, "open-interest poll failed"),
        }
        match self.fetch_basis(symbol).await {
            Ok((spot, perp, ts)) => store.update_basis(symbol, spot, perp, ts),
            Err(e) => warn!(symbol, error = %e, "basis poll failed"),
        }
        debug!(symbol, "derived inputs refreshed");
    }

    /// GET /fapi/v1/fundingRate?symbol=..&limit=1
    async fn fetch_funding(&self, symbol: &str) -> Result<(f64, i64)> {
        let url = format!(
            "{}/fapi/v1/fundingRate?symbol={symbol}&limit=1",
            self.futures_base
        );
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("funding request failed")?
            .json()
            .await
            .context("failed to parse funding response")?;

        let entry = body
            .as_array()
            .and_then(|a| a.last())
            .context("funding response empty")?;
        let rate: f64 = entry["fundingRate"]
            .as_str()
            .context("missing fundingRate")?
            .parse()
            .context("failed to parse fundingRate")?;
        let ts = entry["fundingTime"].as_i64().unwrap_or(0);
        Ok((rate, ts))
    }

    /// GET /fapi/v1/openInterest?symbol=..
    async fn fetch_open_interest(&self, symbol: &str) -> Result<(f64, i64)> {
        let url = format!("{}/fapi/v1/openInterest?symbol={symbol}", self.futures_base);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("open-interest request failed")?
            .json()
            .await
            .context("failed to parse open-interest response")?;

        let oi: f64 = body["openInterest"]
            .as_str()
            .context("missing openInterest")?
            .parse()
            .context("failed to parse openInterest")?;
        let ts = body["time"].as_i64().unwrap_or(0);
        Ok((oi, ts))
    }

    /// Spot and perp mark prices for the basis calculation.
    async fn fetch_basis(&self, symbol: &str) -> Result<(f64, f64, i64)> {
        let spot_url = format!("{}/api/v3/ticker/price?symbol={symbol}", self.spot_base);
        let spot_body: serde_json::Value = self
            .client
            .get(&spot_url)
            .send()
            .await
            .context("spot price request failed")?
            .json()
            .await
            .context("failed to parse spot price response")?;
        let spot: f64 = spot_body["price"]
            .as_str()
            .context("missing spot price")?
            .parse()
            .context("failed to parse spot price")?;

        let perp_url = format!("{}/fapi/v1/premiumIndex?symbol={symbol}", self.futures_base);
        let perp_body: serde_json::Value = self
            .client
            .get(&perp_url)
            .send()
            .await
            .context("mark price request failed")?
            .json()
            .await
            .context("failed to parse mark price response")?;
        let perp: f64 = perp_body["markPrice"]
            .as_str()
            .context("missing markPrice")?
            .parse()
            .context("failed to parse markPrice")?;
        let ts = perp_body["time"].as_i64().unwrap_or(0);

        Ok((spot, perp, ts))
    }
}

impl Default for DerivedPoller {
    fn default() -> Self {
        Self::new()
    }
}
