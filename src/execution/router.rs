// =============================================================================
// Execution Router — venue resolution, fan-out, child IDs, hard gates
// =============================================================================
//
// Resolution order: explicit intent venue, then the per-source rule, then
// the default mapping. Gates fail fast and never silently drop: master-arm,
// circuit breaker, schema validation (dead-letter), TTL expiry.
//
// Size split: weights normalize, each child floors to the symbol lot, and
// the largest share absorbs the residual so |Σ qty − size| ≤ one lot.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::{EngineEvent, EventBus};
use crate::config::{ConfigSnapshot, RouteRule, RoutingConfig};
use crate::intent::types::IntentSignal;
use crate::metrics::EngineMetrics;
use crate::types::{Side, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "MARKET")]
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "IOC")]
    Ioc,
}

/// One venue-bound child order derived from a parent intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub parent_signal_id: String,
    pub venue: VenueId,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub qty: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub leverage: u8,
    pub time_in_force: TimeInForce,
}

/// Routing refusals. Every variant is surfaced, never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("EXECUTION_GATED({0})")]
    Gated(&'static str),
    #[error("invalid intent: {0}")]
    Invalid(String),
    #[error("no venue resolves for source '{0}'")]
    NoVenue(String),
}

/// Router tunables sampled from a config snapshot.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub master_arm: bool,
    pub circuit_breaker: bool,
    pub intent_ttl_ms: i64,
    pub lot_size: Decimal,
    pub routing: RoutingConfig,
}

impl RouterConfig {
    pub fn from_snapshot(snap: &ConfigSnapshot) -> Self {
        Self {
            master_arm: snap.bool("execution.master_arm").unwrap_or(false),
            circuit_breaker: snap.bool("execution.circuit_breaker").unwrap_or(false),
            intent_ttl_ms: snap.i64("execution.intent_ttl_ms").unwrap_or(5_000),
            lot_size: Decimal::try_from(snap.f64("execution.lot_size").unwrap_or(0.01))
                .unwrap_or_else(|_| Decimal::new(1, 2)),
            routing: snap.routing.clone(),
        }
    }
}

pub struct ExecutionRouter {
    bus: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
}

impl ExecutionRouter {
    pub fn new(bus: Arc<EventBus>, metrics: Arc<EngineMetrics>) -> Self {
        Self { bus, metrics }
    }

    /// Resolve an intent into venue-bound children, or refuse loudly.
    pub fn route(
        &self,
        signal: &IntentSignal,
        cfg: &RouterConfig,
        now_ms: i64,
    ) -> Result<Vec<OrderIntent>, RouteError> {
        // ── Gates, cheapest first ───────────────────────────────────────
        if !cfg.master_arm {
            self.gate("master_arm")?;
        }
        if cfg.circuit_breaker {
            self.gate("circuit_breaker")?;
        }

        if let Err(reason) = signal.validate() {
            self.metrics.invalid_intents_total.inc();
            self.bus.publish(EngineEvent::DeadLetter {
                reason: reason.clone(),
                payload: serde_json::to_string(signal).unwrap_or_default(),
            });
            return Err(RouteError::Invalid(reason));
        }
        let Some(size) = signal.size else {
            self.metrics.invalid_intents_total.inc();
            self.bus.publish(EngineEvent::DeadLetter {
                reason: "size missing after prepare".into(),
                payload: serde_json::to_string(signal).unwrap_or_default(),
            });
            return Err(RouteError::Invalid("size missing after prepare".into()));
        };

        if now_ms > signal.timestamp_ms + cfg.intent_ttl_ms {
            self.gate("expired")?;
        }

        // ── Venue resolution ────────────────────────────────────────────
        let rule = match signal.venue {
            Some(venue) => RouteRule::single(venue),
            None => cfg.routing.rule_for(&signal.source),
        };
        if !rule.is_valid() {
            return Err(RouteError::NoVenue(signal.source.clone()));
        }

        let shares: Vec<(VenueId, Decimal)> = if rule.fanout {
            split_size(size, &rule.weights.iter().map(|(v, w)| (*v, *w)).collect::<Vec<_>>(), cfg.lot_size)
        } else {
            // Exactly one child: the heaviest venue wins, ties by venue order.
            let mut venue = None;
            let mut best = f64::NEG_INFINITY;
            for (v, w) in &rule.weights {
                if *w > best {
                    best = *w;
                    venue = Some(*v);
                }
            }
            let venue = venue.ok_or_else(|| RouteError::NoVenue(signal.source.clone()))?;
            vec![(venue, size)]
        };

        let children: Vec<OrderIntent> = shares
            .into_iter()
            .filter(|(_, qty)| *qty > Decimal::ZERO)
            .enumerate()
            .map(|(seq, (venue, qty))| {
                self.metrics
                    .intents_routed
                    .with_label_values(&[venue.as_str()])
                    .inc();
                OrderIntent {
                    client_order_id: format!("{}-{}-{}", signal.signal_id, venue.suffix(), seq),
                    parent_signal_id: signal.signal_id.clone(),
                    venue,
                    symbol: signal.symbol.clone(),
                    side: signal.direction.entry_side(),
                    order_type: OrderType::Limit,
                    qty,
                    price: Some((signal.entry_zone.min + signal.entry_zone.max) / Decimal::TWO),
                    leverage: signal.leverage,
                    time_in_force: TimeInForce::Gtc,
                }
            })
            .collect();

        if children.is_empty() {
            return Err(RouteError::Invalid("size rounds to zero lots".into()));
        }

        debug!(
            signal_id = %signal.signal_id,
            children = children.len(),
            "intent routed"
        );
        Ok(children)
    }

    fn gate(&self, gate: &'static str) -> Result<(), RouteError> {
        warn!(gate, "intent refused by gate");
        self.metrics.execution_gated.with_label_values(&[gate]).inc();
        Err(RouteError::Gated(gate))
    }
}

/// Split `size` across weighted venues: normalize, floor each share to the
/// lot, then hand the residual (in whole lots) to the largest share.
pub fn split_size(
    size: Decimal,
    weights: &[(VenueId, f64)],
    lot: Decimal,
) -> Vec<(VenueId, Decimal)> {
    let positive: Vec<(VenueId, f64)> = weights
        .iter()
        .copied()
        .filter(|(_, w)| *w > 0.0)
        .collect();
    if positive.is_empty() || size <= Decimal::ZERO || lot <= Decimal::ZERO {
        return Vec::new();
    }

    let total: f64 = positive.iter().map(|(_, w)| w).sum();
    let mut shares: Vec<(VenueId, Decimal)> = positive
        .iter()
        .map(|(venue, w)| {
            let fraction = Decimal::try_from(w / total).unwrap_or(Decimal::ZERO);
            let raw = size * fraction;
            ((raw / lot).floor() * lot, *venue)
        })
        .map(|(qty, venue)| (venue, qty))
        .collect();

    let allocated: Decimal = shares.iter().map(|(_, q)| *q).sum();
    let residual_lots = ((size - allocated) / lot).floor();
    if residual_lots > Decimal::ZERO {
        // Largest weight takes the remainder; ties resolve to the first.
        let mut largest = 0;
        for (i, (_, w)) in positive.iter().enumerate().skip(1) {
            if *w > positive[largest].1 {
                largest = i;
            }
        }
        shares[largest].1 += residual_lots * lot;
    }

    shares
}
