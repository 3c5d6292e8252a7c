// =============================================================================
// Watchlist Builder — the periodic tripwire pre-computation cycle
// =============================================================================
//
// Every `tripwire.update_interval_ms` the builder recomputes tripwires for
// the configured universe, merges colocated levels, ranks symbols, and
// publishes the refreshed top-N map. Detection shards fold the new map into
// their owned state at the next trade boundary.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{EngineEvent, EventBus};
use crate::config::ConfigSnapshot;
use crate::market_data::{CandleBuffer, CandleKey, DerivedStore};
use crate::tripwire::calculators::{self, CalcParams};
use crate::tripwire::ranking::{self, RankWeights};
use crate::tripwire::types::Tripwire;

/// The output of one pre-computation cycle.
#[derive(Debug, Clone, Default)]
pub struct TripwireMap {
    pub generation: u64,
    /// Ranked watchlist, best first.
    pub symbols: Vec<String>,
    pub by_symbol: HashMap<String, Vec<Tripwire>>,
}

impl TripwireMap {
    pub fn total_tripwires(&self) -> usize {
        self.by_symbol.values().map(Vec::len).sum()
    }
}

/// Recomputes the tripwire map from candles and derived inputs.
pub struct WatchlistBuilder {
    candles: Arc<CandleBuffer>,
    derived: Arc<DerivedStore>,
    bus: Arc<EventBus>,
    /// Candle interval the calculators read, e.g. "1m".
    interval: String,
    /// When set, only this phase's calculator families survive.
    phase: Option<crate::types::PhaseId>,
    generation: AtomicU64,
}

impl WatchlistBuilder {
    pub fn new(
        candles: Arc<CandleBuffer>,
        derived: Arc<DerivedStore>,
        bus: Arc<EventBus>,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            candles,
            derived,
            bus,
            interval: interval.into(),
            phase: None,
            generation: AtomicU64::new(0),
        }
    }

    /// Restrict the map to one phase's calculator families.
    pub fn for_phase(mut self, phase: crate::types::PhaseId) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Run one cycle over `universe` and publish the result.
    pub fn build(&self, universe: &[String], config: &ConfigSnapshot, now_ms: i64) -> TripwireMap {
        let params = CalcParams {
            now_ms,
            volume_std_threshold: config.f64("tripwire.volume_std_threshold").unwrap_or(2.0),
        };
        let weights = RankWeights {
            volume: config.f64("tripwire.score_w_volume").unwrap_or(0.4),
            confidence: config.f64("tripwire.score_w_confidence").unwrap_or(0.4),
            cluster: config.f64("tripwire.score_w_cluster").unwrap_or(0.2),
        };
        let top_n = config.i64("tripwire.top_n").unwrap_or(20) as usize;

        let mut all_wires = Vec::new();
        let mut quote_volumes: HashMap<String, f64> = HashMap::new();

        for symbol in universe {
            let key = CandleKey::new(symbol.clone(), self.interval.clone());
            let candles = self.candles.recent(&key, 200);
            if candles.is_empty() {
                debug!(symbol, "no candles yet — skipping symbol this cycle");
                continue;
            }

            // Malformed candle rejects the whole symbol for this cycle.
            if let Some(bad) = candles.iter().find(|c| !c.is_valid()) {
                warn!(symbol, timestamp_ms = bad.timestamp_ms, "malformed candle — symbol rejected");
                self.bus.publish(EngineEvent::Diagnostic {
                    component: "watchlist".into(),
                    message: format!("{symbol}: malformed candle at {}", bad.timestamp_ms),
                });
                continue;
            }

            quote_volumes.insert(
                symbol.clone(),
                candles.iter().map(|c| c.close * c.volume).sum(),
            );

            let derived = self.derived.get(symbol);
            let mut wires = calculators::compute_all(symbol, &candles, derived, params);
            if let Some(phase) = self.phase {
                wires.retain(|w| w.kind.phase() == phase);
            }
            all_wires.extend(wires);
        }

        let (merged, colocated) = ranking::merge_nearby(all_wires);
        let symbols = ranking::rank_symbols(&merged, &quote_volumes, &colocated, weights, top_n);

        let mut by_symbol: HashMap<String, Vec<Tripwire>> = HashMap::new();
        for wire in merged {
            if symbols.contains(&wire.symbol) {
                by_symbol.entry(wire.symbol.clone()).or_default().push(wire);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let map = TripwireMap {
            generation,
            symbols,
            by_symbol,
        };

        info!(
            generation,
            symbols = map.symbols.len(),
            tripwires = map.total_tripwires(),
            "tripwire map refreshed"
        );
        self.bus.publish(EngineEvent::TripwireMapUpdated {
            generation,
            symbols: map.symbols.len(),
            tripwires: map.total_tripwires(),
        });
        map
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::ConfigRegistry;
    use crate::types::Candle;

    fn seeded_buffer(symbol: &str, base: f64) -> Arc<CandleBuffer> {
        let buffer = Arc::new(CandleBuffer::new(300));
        let key = CandleKey::new(symbol, "1m");
        let day = 86_400_000i64;
        // Two days of history so the daily-level calculator has a prior day.
        for i in 0..48 {
            buffer.push(
                key.clone(),
                Candle {
                    timestamp_ms: day + i * 3_600_000,
                    open: base,
                    high: base + 5.0,
                    low: base - 5.0,
                    close: base + (i % 3) as f64,
                    volume: 10.0,
                },
            );
        }
        buffer
    }

    fn snapshot() -> Arc<ConfigSnapshot> {
        ConfigRegistry::new(EventBus::new(), b"k".to_vec()).snapshot()
    }

    #[test]
    fn build_produces_ranked_map() {
        let buffer = seeded_buffer("BTCUSDT", 50_000.0);
        let builder = WatchlistBuilder::new(
            buffer,
            Arc::new(DerivedStore::new()),
            EventBus::new(),
            "1m",
        );
        let map = builder.build(&["BTCUSDT".to_string()], &snapshot(), 0);

        assert_eq!(map.generation, 1);
        assert_eq!(map.symbols, vec!["BTCUSDT".to_string()]);
        assert!(map.total_tripwires() > 0, "expected daily levels at minimum");
    }

    #[test]
    fn malformed_candle_rejects_symbol_and_emits_diagnostic() {
        let buffer = Arc::new(CandleBuffer::new(300));
        let key = CandleKey::new("BTCUSDT", "1m");
        buffer.push(
            key,
            Candle {
                timestamp_ms: 0,
                open: 100.0,
                high: 90.0, // high < low: malformed
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            },
        );

        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();
        let builder =
            WatchlistBuilder::new(buffer, Arc::new(DerivedStore::new()), bus, "1m");
        let map = builder.build(&["BTCUSDT".to_string()], &snapshot(), 0);

        assert!(map.by_symbol.is_empty());
        // Diagnostic first, then the map-updated event.
        let first = rx.try_recv().unwrap();
        assert_eq!(first.subject(), "evt.diagnostic");
    }

    #[test]
    fn generation_increments_per_cycle() {
        let buffer = seeded_buffer("BTCUSDT", 50_000.0);
        let builder = WatchlistBuilder::new(
            buffer,
            Arc::new(DerivedStore::new()),
            EventBus::new(),
            "1m",
        );
        let snap = snapshot();
        let first = builder.build(&["BTCUSDT".to_string()], &snap, 0);
        let second = builder.build(&["BTCUSDT".to_string()], &snap, 60_000);
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
    }

    #[test]
    fn empty_universe_builds_empty_map() {
        let builder = WatchlistBuilder::new(
            Arc::new(CandleBuffer::new(10)),
            Arc::new(DerivedStore::new()),
            EventBus::new(),
            "1m",
        );
        let map = builder.build(&[], &snapshot(), 0);
        assert!(map.symbols.is_empty());
        assert_eq!(map.total_tripwires(), 0);
    }
}
