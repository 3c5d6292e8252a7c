// =============================================================================
// Venue Adapters — HMAC-signed REST clients behind one trait
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// send the API key as a header and a recvWindow to tolerate minor clock
// drift against venue servers.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use crate::execution::router::OrderIntent;
use crate::secrets::VenueKeys;
use crate::types::VenueId;

type HmacSha256 = Hmac<Sha256>;

/// recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5_000;

/// Acknowledgement from a venue round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueAck {
    pub client_order_id: String,
    pub venue_order_id: String,
    pub fill_price: Option<Decimal>,
    pub status: String,
}

/// Venue failures. Timeouts never cancel sibling orders.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("ORDER_TIMEOUT")]
    Timeout,
    #[error("rate limit budget exhausted")]
    RateLimited,
    #[error("venue rejected order: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// The router talks to every venue through this seam.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> VenueId;
    async fn place_order(&self, order: &OrderIntent) -> Result<VenueAck, VenueError>;
    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> Result<(), VenueError>;
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Hard ceiling at which requests are refused locally.
const WEIGHT_HARD_LIMIT: u32 = 1_000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Tracks the venue's used-weight header so we refuse before a 429 does.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
        }
    }

    pub fn update_from_headers(&self, headers: &HeaderMap) {
        if let Some(weight) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        {
            let prev = self.used_weight_1m.swap(weight, Ordering::Relaxed);
            if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
                warn!(used_weight = weight, "venue rate-limit weight crossed warning threshold");
            }
        }
    }

    pub fn can_send(&self) -> bool {
        self.used_weight_1m.load(Ordering::Relaxed) < WEIGHT_HARD_LIMIT
    }

    pub fn used_weight(&self) -> u32 {
        self.used_weight_1m.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Signed REST venue
// ---------------------------------------------------------------------------

/// HMAC-SHA256-signed REST adapter. The same shape serves every venue whose
/// API follows the signed-query convention; `base_url` and `venue` select
/// the target.
pub struct SignedRestVenue {
    venue: VenueId,
    keys: VenueKeys,
    base_url: String,
    client: reqwest::Client,
    limiter: RateLimitTracker,
}

impl SignedRestVenue {
    pub fn new(venue: VenueId, keys: VenueKeys, base_url: impl Into<String>) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&keys.api_key) {
            default_headers.insert("X-MBX-APIKEY", value);
        }
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            venue,
            keys,
            base_url: base_url.into(),
            client,
            limiter: RateLimitTracker::new(),
        }
    }

    /// HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.keys.api_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = chrono::Utc::now().timestamp_millis();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let signature = self.sign(&base);
        format!("{base}&signature={signature}")
    }

    pub fn limiter(&self) -> &RateLimitTracker {
        &self.limiter
    }
}

#[async_trait]
impl VenueClient for SignedRestVenue {
    fn venue(&self) -> VenueId {
        self.venue
    }

    async fn place_order(&self, order: &OrderIntent) -> Result<VenueAck, VenueError> {
        if !self.limiter.can_send() {
            return Err(VenueError::RateLimited);
        }

        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}&newClientOrderId={}",
            order.symbol,
            order.side,
            order.order_type.as_str(),
            order.qty,
            order.client_order_id,
        );
        if let Some(price) = order.price {
            params.push_str(&format!("&price={price}&timeInForce=GTC"));
        }

        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        debug!(venue = %self.venue, symbol = %order.symbol, qty = %order.qty, "placing order");

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.into()))?;

        self.limiter.update_from_headers(response.headers());

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VenueError::Transport(e.into()))?;

        if !status.is_success() {
            return Err(VenueError::Rejected(format!("{status}: {body}")));
        }

        let venue_order_id = body["orderId"]
            .as_u64()
            .map(|id| id.to_string())
            .or_else(|| body["orderId"].as_str().map(str::to_string))
            .unwrap_or_default();
        let fill_price = body["avgPrice"]
            .as_str()
            .or_else(|| body["price"].as_str())
            .and_then(|s| s.parse().ok());

        Ok(VenueAck {
            client_order_id: order.client_order_id.clone(),
            venue_order_id,
            fill_price,
            status: body["status"].as_str().unwrap_or("NEW").to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> Result<(), VenueError> {
        let params = format!("symbol={symbol}&orderId={venue_order_id}");
        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.into()))?;
        self.limiter.update_from_headers(response.headers());

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SignedRestVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedRestVenue")
            .field("venue", &self.venue)
            .field("keys", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Paper venue
// ---------------------------------------------------------------------------

/// Demo-mode venue: fills instantly at the order's limit price (or the
/// configured mark) and records every order for inspection.
pub struct PaperVenue {
    venue: VenueId,
    mark_price: Mutex<Decimal>,
    orders: Mutex<Vec<OrderIntent>>,
}

impl PaperVenue {
    pub fn new(venue: VenueId) -> Arc<Self> {
        Arc::new(Self {
            venue,
            mark_price: Mutex::new(Decimal::ZERO),
            orders: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mark(&self, price: Decimal) {
        *self.mark_price.lock() = price;
    }

    pub fn orders(&self) -> Vec<OrderIntent> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn venue(&self) -> VenueId {
        self.venue
    }

    async fn place_order(&self, order: &OrderIntent) -> Result<VenueAck, VenueError> {
        let mark = *self.mark_price.lock();
        let fill = order.price.unwrap_or(mark);
        self.orders.lock().push(order.clone());
        Ok(VenueAck {
            client_order_id: order.client_order_id.clone(),
            venue_order_id: format!("paper-{}", self.orders.lock().len()),
            fill_price: Some(if fill.is_zero() { mark } else { fill }),
            status: "FILLED".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, _venue_order_id: &str) -> Result<(), VenueError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fan-out dispatch
// ---------------------------------------------------------------------------

/// Place every child concurrently with a per-venue timeout. A timeout on
/// one venue does not cancel its siblings; each child reports its own
/// outcome in input order.
pub async fn dispatch_children(
    children: &[OrderIntent],
    venues: &HashMap<VenueId, Arc<dyn VenueClient>>,
    timeout: Duration,
) -> Vec<Result<VenueAck, VenueError>> {
    let futures = children.iter().map(|child| {
        let client = venues.get(&child.venue).cloned();
        async move {
            let Some(client) = client else {
                return Err(VenueError::Rejected(format!(
                    "no client for venue {}",
                    child.venue
                )));
            };
            match tokio::time::timeout(timeout, client.place_order(child)).await {
                Ok(result) => result,
                Err(_) => Err(VenueError::Timeout),
            }
        }
    });
    futures_util::future::join_all(futures).await
}
