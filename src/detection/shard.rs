// =============================================================================
// Symbol Shard — exclusive owner of tripwire state for a set of symbols
// =============================================================================
//
// One worker per shard; trades are processed in arrival order and every
// state mutation happens here. Intents carry a monotonic (shard_id, seq) so
// the execution side can reason about intra-shard ordering. Cross-shard
// consumers only ever see snapshot copies.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditKind, AuditLog, AuditRecord};
use crate::bus::{EngineEvent, EventBus};
use crate::detection::engine::{self, DetectionConfig, Effect, MarketContext};
use crate::intent::types::{EntryZone, IntentSignal};
use crate::metrics::EngineMetrics;
use crate::tripwire::indicators::TrendReading;
use crate::tripwire::types::{Tripwire, TripwireKey};
use crate::tripwire::watchlist::TripwireMap;
use crate::types::{Direction, PhaseId, Trade};

/// Price points kept per symbol for the acceleration veto.
const PRICE_HISTORY_CAP: usize = 512;
/// Window the acceleration estimate reads (exchange time).
const ACCEL_WINDOW_MS: i64 = 1_000;

pub struct SymbolShard {
    shard_id: u32,
    source: PhaseId,
    cfg: DetectionConfig,
    wires: HashMap<TripwireKey, Tripwire>,
    seq: u64,
    price_history: HashMap<String, VecDeque<(i64, f64)>>,
    trend: HashMap<String, TrendReading>,
    bus: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
    audit: Option<Arc<AuditLog>>,
    intent_tx: mpsc::UnboundedSender<IntentSignal>,
}

impl SymbolShard {
    pub fn new(
        shard_id: u32,
        source: PhaseId,
        cfg: DetectionConfig,
        bus: Arc<EventBus>,
        metrics: Arc<EngineMetrics>,
        audit: Option<Arc<AuditLog>>,
        intent_tx: mpsc::UnboundedSender<IntentSignal>,
    ) -> Self {
        Self {
            shard_id,
            source,
            cfg,
            wires: HashMap::new(),
            seq: 0,
            price_history: HashMap::new(),
            trend: HashMap::new(),
            bus,
            metrics,
            audit,
            intent_tx,
        }
    }

    /// Refresh tunables at a cycle boundary (never mid-trade).
    pub fn update_config(&mut self, cfg: DetectionConfig) {
        self.cfg = cfg;
    }

    /// Latest trend reading for a symbol, refreshed by the watchlist cycle.
    pub fn update_trend(&mut self, symbol: &str, reading: TrendReading) {
        self.trend.insert(symbol.to_string(), reading);
    }

    /// Fold a refreshed tripwire map into owned state. Existing non-terminal
    /// tripwires keep their state (frozen attributes are re-derived only on
    /// fresh keys); terminal wires are dropped.
    pub fn apply_map(&mut self, map: &TripwireMap, owns_symbol: impl Fn(&str) -> bool) {
        self.wires.retain(|_, w| !w.state.is_terminal());

        let mut added = 0usize;
        for (symbol, wires) in &map.by_symbol {
            if !owns_symbol(symbol) {
                continue;
            }
            for wire in wires {
                let key = wire.key();
                if !self.wires.contains_key(&key) {
                    self.wires.insert(key, wire.clone());
                    added += 1;
                }
            }
        }
        self.metrics.tripwires_armed.set(self.wires.len() as i64);
        debug!(
            shard = self.shard_id,
            generation = map.generation,
            added,
            total = self.wires.len(),
            "tripwire map applied"
        );
    }

    pub fn tripwire_count(&self) -> usize {
        self.wires.len()
    }

    /// Snapshot copy for cross-shard readers.
    pub fn tripwires(&self) -> Vec<Tripwire> {
        self.wires.values().cloned().collect()
    }

    /// Whether `trade` is within arming proximity of any live trigger —
    /// the tick queue uses this to decide what backpressure may drop.
    pub fn matches_any(&self, trade: &Trade) -> bool {
        self.wires.values().any(|w| {
            w.symbol == trade.symbol
                && engine::within_proximity(trade.price, w.trigger_price, self.cfg.proximity_pct)
        })
    }

    /// Process one trade through every tripwire on its symbol. Returns the
    /// number of intents emitted.
    pub fn on_trade(&mut self, trade: &Trade, cvd_delta: Decimal) -> usize {
        self.metrics.trades_processed.inc();
        self.push_price(trade);

        let ctx = MarketContext {
            cvd_delta,
            acceleration: self.acceleration(&trade.symbol, trade.timestamp_ms),
            trend: self.trend.get(&trade.symbol).copied(),
        };

        let keys: Vec<TripwireKey> = self
            .wires
            .iter()
            .filter(|(k, _)| k.symbol == trade.symbol)
            .map(|(k, _)| k.clone())
            .collect();

        let mut emitted = 0usize;
        for key in keys {
            let Some(wire) = self.wires.remove(&key) else {
                continue;
            };
            let (mut wire, effects) = engine::step(wire, trade, &self.cfg, &ctx);

            for effect in effects {
                match effect {
                    Effect::Activated { ghost } => {
                        let signal = self.build_signal(&wire, trade);
                        wire = engine::fire(wire, trade.timestamp_ms, &self.cfg);
                        emitted += usize::from(self.dispatch(signal, ghost, &wire));
                    }
                    Effect::Disarmed { veto } => {
                        if let Some(veto) = veto {
                            debug!(
                                shard = self.shard_id,
                                symbol = %wire.symbol,
                                veto = %veto,
                                attempts = wire.attempts,
                                "candidate vetoed"
                            );
                        }
                    }
                    Effect::Expired | Effect::Mitigated => {
                        debug!(
                            shard = self.shard_id,
                            symbol = %wire.symbol,
                            state = %wire.state,
                            "tripwire reached terminal state"
                        );
                    }
                }
            }

            if wire.state.is_terminal() {
                // Dropped; the next cycle may re-derive the level.
            } else {
                self.wires.insert(key, wire);
            }
        }

        self.metrics.tripwires_armed.set(self.wires.len() as i64);
        emitted
    }

    fn push_price(&mut self, trade: &Trade) {
        let history = self
            .price_history
            .entry(trade.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(PRICE_HISTORY_CAP));
        history.push_back((trade.timestamp_ms, trade.price_f64()));
        while history.len() > PRICE_HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Short-window price acceleration in %/s²: the change in velocity
    /// between the two halves of the trailing window. Positive = upward
    /// momentum building.
    fn acceleration(&self, symbol: &str, now_ms: i64) -> f64 {
        let Some(history) = self.price_history.get(symbol) else {
            return 0.0;
        };
        let cutoff = now_ms - ACCEL_WINDOW_MS;
        let points: Vec<(i64, f64)> = history
            .iter()
            .copied()
            .filter(|(ts, _)| *ts >= cutoff)
            .collect();
        if points.len() < 4 {
            return 0.0;
        }
        let span_ms = points.last().expect("non-empty").0 - points[0].0;
        if span_ms < 100 {
            return 0.0;
        }

        let mid = points.len() / 2;
        let v1 = segment_velocity(&points[..mid]);
        let v2 = segment_velocity(&points[mid..]);
        let half_span_s = span_ms as f64 / 2_000.0;
        (v2 - v1) / half_span_s
    }

    fn build_signal(&mut self, wire: &Tripwire, trade: &Trade) -> IntentSignal {
        self.seq += 1;
        let band = Decimal::from_f64(self.cfg.proximity_pct).unwrap_or(Decimal::ZERO);
        let stop_mult =
            Decimal::from_f64(wire.volatility.stop_multiplier).unwrap_or(Decimal::ONE);
        let trigger = wire.trigger_price;

        let (stop_loss, take_profit) = match wire.direction {
            Direction::Long => (
                trigger * (Decimal::ONE - wire.stop_loss_pct * stop_mult),
                trigger * (Decimal::ONE + wire.target_pct),
            ),
            Direction::Short => (
                trigger * (Decimal::ONE + wire.stop_loss_pct * stop_mult),
                trigger * (Decimal::ONE - wire.target_pct),
            ),
        };

        IntentSignal {
            signal_id: Uuid::new_v4().to_string(),
            source: self.source.as_str().to_string(),
            symbol: wire.symbol.clone(),
            direction: wire.direction,
            entry_zone: EntryZone {
                min: trigger * (Decimal::ONE - band),
                max: trigger * (Decimal::ONE + band),
            },
            stop_loss: stop_loss.round_dp(8),
            take_profits: vec![take_profit.round_dp(8)],
            confidence: wire.confidence,
            leverage: wire.leverage,
            timestamp_ms: trade.timestamp_ms,
            size: None,
            venue: None,
            phase_id: Some(self.source.as_str().to_string()),
            shard_id: self.shard_id,
            seq: self.seq,
        }
    }

    /// Hand the signal to the fast path (or record a ghost activation).
    /// Returns whether an intent actually left the shard.
    fn dispatch(&self, signal: IntentSignal, ghost: bool, wire: &Tripwire) -> bool {
        self.metrics
            .tripwires_fired
            .with_label_values(&[wire.kind.as_str()])
            .inc();
        self.bus.publish(EngineEvent::TripwireSprung {
            signal_id: signal.signal_id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            ghost,
        });

        if let Some(audit) = &self.audit {
            let record = AuditRecord::new(
                AuditKind::Signal,
                "detection",
                serde_json::json!({
                    "signal_id": signal.signal_id,
                    "symbol": signal.symbol,
                    "direction": signal.direction,
                    "trigger_price": wire.trigger_price,
                    "tripwire_type": wire.kind.as_str(),
                    "ghost": ghost,
                    "shard_id": signal.shard_id,
                    "seq": signal.seq,
                }),
            );
            if let Err(e) = audit.append(&record) {
                warn!(error = %e, "failed to append signal audit record");
            }
        }

        if ghost {
            info!(
                signal_id = %signal.signal_id,
                symbol = %signal.symbol,
                "ghost activation — intent suppressed"
            );
            return false;
        }

        if self.intent_tx.send(signal).is_err() {
            warn!(shard = self.shard_id, "intent channel closed — signal dropped");
            return false;
        }
        true
    }
}

/// Price velocity of a segment in %/s relative to its first price.
fn segment_velocity(points: &[(i64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let (t0, p0) = points[0];
    let (t1, p1) = points[points.len() - 1];
    if p0 <= 0.0 || t1 <= t0 {
        return 0.0;
    }
    let pct = (p1 - p0) / p0 * 100.0;
    pct / ((t1 - t0) as f64 / 1_000.0)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tripwire::types::{TripwireType, VolatilityMetrics};
    use rust_decimal_macros::dec;

    fn cfg() -> DetectionConfig {
        DetectionConfig {
            proximity_pct: 0.001,
            volume_window_ms: 100,
            min_trades_in_window: 50,
            cvd_window_ms: 5_000,
            strong_trend_adx_threshold: 25.0,
            acceleration_veto_threshold: 1.5,
            max_attempts: 5,
            cooldown_ms: 300_000,
            max_age_ms: 24 * 3_600_000,
            ghost_mode: false,
            master_arm: true,
            circuit_breaker: false,
            global_halt: false,
        }
    }

    fn map_with_wire() -> TripwireMap {
        let wire = Tripwire::new(
            "BTCUSDT",
            dec!(50000),
            Direction::Long,
            TripwireType::Liquidation,
            95,
            20,
            dec!(0.01),
            dec!(0.03),
            0,
            VolatilityMetrics::default(),
        );
        let mut by_symbol = HashMap::new();
        by_symbol.insert("BTCUSDT".to_string(), vec![wire]);
        TripwireMap {
            generation: 1,
            symbols: vec!["BTCUSDT".to_string()],
            by_symbol,
        }
    }

    fn shard(cfg: DetectionConfig) -> (SymbolShard, mpsc::UnboundedReceiver<IntentSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shard = SymbolShard::new(
            0,
            PhaseId::Scavenger,
            cfg,
            EventBus::new(),
            EngineMetrics::new().unwrap(),
            None,
            tx,
        );
        (shard, rx)
    }

    fn trade(ts: i64, price: Decimal) -> Trade {
        Trade {
            symbol: "BTCUSDT".into(),
            price,
            qty: dec!(0.002),
            timestamp_ms: ts,
            buyer_is_maker: false,
        }
    }

    #[test]
    fn fifty_trades_in_window_emit_one_intent() {
        let (mut shard, mut rx) = shard(cfg());
        shard.apply_map(&map_with_wire(), |_| true);
        assert_eq!(shard.tripwire_count(), 1);

        // 50 trades in 80 ms within ±0.1% of 50000.
        let mut emitted = 0;
        for i in 0..50 {
            let price = dec!(49998) + Decimal::from(i % 5);
            emitted += shard.on_trade(&trade(1_000 + (i * 80 / 49) as i64, price), dec!(1000));
        }
        assert_eq!(emitted, 1);

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.source, "scavenger");
        assert_eq!(signal.shard_id, 0);
        assert_eq!(signal.seq, 1);
        assert!(signal.entry_zone.min < dec!(50000) && signal.entry_zone.max > dec!(50000));
        assert!(signal.stop_loss < dec!(50000));
        assert!(signal.take_profits[0] > dec!(50000));
        assert!(signal.validate().is_ok());

        // The tripwire is now FIRED→COOLDOWN; no further intent.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ghost_mode_suppresses_intent_but_fires_state() {
        let mut c = cfg();
        c.ghost_mode = true;
        let (mut shard, mut rx) = shard(c);
        shard.apply_map(&map_with_wire(), |_| true);

        let mut emitted = 0;
        for i in 0..50 {
            emitted += shard.on_trade(&trade(1_000 + i, dec!(50000)), dec!(1000));
        }
        assert_eq!(emitted, 0);
        assert!(rx.try_recv().is_err());

        // Still cooled down exactly as a live fire would be.
        let wires = shard.tripwires();
        assert_eq!(wires.len(), 1);
        assert!(wires[0].cooldown_until_ms > 0);
    }

    #[test]
    fn apply_map_preserves_live_state() {
        let (mut shard, _rx) = shard(cfg());
        shard.apply_map(&map_with_wire(), |_| true);

        // Arm the candidate.
        shard.on_trade(&trade(1_000, dec!(50000)), dec!(0));
        let before = shard.tripwires()[0].clone();
        assert_eq!(before.state.to_string(), "CANDIDATE");

        // A refresh with the same key must not reset the live wire.
        shard.apply_map(&map_with_wire(), |_| true);
        let after = shard.tripwires()[0].clone();
        assert_eq!(after.state, before.state);
        assert_eq!(after.volume_counter, before.volume_counter);
    }

    #[test]
    fn matches_any_tracks_proximity() {
        let (mut shard, _rx) = shard(cfg());
        shard.apply_map(&map_with_wire(), |_| true);
        assert!(shard.matches_any(&trade(1, dec!(50010))));
        assert!(!shard.matches_any(&trade(1, dec!(51000))));
        assert!(!shard.matches_any(&Trade {
            symbol: "ETHUSDT".into(),
            ..trade(1, dec!(50000))
        }));
    }

    #[test]
    fn seq_is_monotonic_per_shard() {
        let (mut shard, mut rx) = shard(cfg());

        // Two tripwires on different symbols under one shard.
        let mut map = map_with_wire();
        let eth = Tripwire::new(
            "ETHUSDT",
            dec!(2000),
            Direction::Long,
            TripwireType::DailyLevel,
            85,
            12,
            dec!(0.01),
            dec!(0.03),
            0,
            VolatilityMetrics::default(),
        );
        map.by_symbol.insert("ETHUSDT".to_string(), vec![eth]);
        shard.apply_map(&map, |_| true);

        for i in 0..50 {
            shard.on_trade(&trade(1_000 + i, dec!(50000)), dec!(1));
        }
        for i in 0..50 {
            shard.on_trade(
                &Trade {
                    symbol: "ETHUSDT".into(),
                    ..trade(2_000 + i, dec!(2000))
                },
                dec!(1),
            );
        }

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(first.shard_id, second.shard_id);
    }
}
