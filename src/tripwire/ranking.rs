// =============================================================================
// Merge & Ranking — dedupe colocated tripwires, rank the top-N watchlist
// =============================================================================
//
// Merge rule: two tripwires of the same symbol and direction within 0.1% of
// the same trigger collapse into one, preferring the higher confidence;
// equal confidence keeps the earlier one. A confluence of three or more
// calculators at one level upgrades the survivor to ULTIMATE_BULGARIA.
//
// Watchlist rule: symbols are scored
//   score = w_vol · volume_rank + w_conf · confidence + w_cluster · colocated
// and the top N win; ties break symbol-ascending.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

use crate::tripwire::types::{Tripwire, TripwireType};

/// Relative tolerance for "the same trigger".
const MERGE_TOLERANCE: f64 = 0.001;
/// Group size at which a merge is upgraded to a confluence tripwire.
const CONFLUENCE_SIZE: usize = 3;

/// Collapse colocated tripwires per (symbol, direction). Returns the merged
/// set plus, per symbol, the largest pre-merge group size (the colocation
/// count the ranking score uses).
pub fn merge_nearby(wires: Vec<Tripwire>) -> (Vec<Tripwire>, HashMap<String, usize>) {
    let mut by_group: HashMap<(String, crate::types::Direction), Vec<Tripwire>> = HashMap::new();
    for w in wires {
        by_group
            .entry((w.symbol.clone(), w.direction))
            .or_default()
            .push(w);
    }

    let mut merged = Vec::new();
    let mut colocated: HashMap<String, usize> = HashMap::new();

    for ((symbol, _direction), mut group) in by_group {
        group.sort_by(|a, b| a.trigger_price.cmp(&b.trigger_price));

        let mut cluster: Vec<Tripwire> = Vec::new();
        let mut flush = |cluster: &mut Vec<Tripwire>,
                         merged: &mut Vec<Tripwire>,
                         colocated: &mut HashMap<String, usize>| {
            if cluster.is_empty() {
                return;
            }
            let size = cluster.len();
            let entry = colocated.entry(symbol.clone()).or_insert(0);
            *entry = (*entry).max(size);

            // Higher confidence wins; equal confidence keeps the earlier.
            let mut winner = cluster
                .drain(..)
                .reduce(|best, candidate| {
                    if candidate.confidence > best.confidence
                        || (candidate.confidence == best.confidence
                            && candidate.created_at_ms < best.created_at_ms)
                    {
                        candidate
                    } else {
                        best
                    }
                })
                .expect("cluster is non-empty");

            if size >= CONFLUENCE_SIZE {
                winner.kind = TripwireType::UltimateBulgaria;
                winner.confidence = 99;
                winner.leverage = winner.leverage.max(25);
            }
            merged.push(winner);
        };

        for wire in group {
            let in_cluster = cluster.first().is_some_and(|anchor| {
                let a = anchor.trigger_price.to_f64().unwrap_or(0.0);
                let b = wire.trigger_price.to_f64().unwrap_or(0.0);
                a > 0.0 && ((b - a) / a).abs() <= MERGE_TOLERANCE
            });
            if in_cluster || cluster.is_empty() {
                cluster.push(wire);
            } else {
                flush(&mut cluster, &mut merged, &mut colocated);
                cluster.push(wire);
            }
        }
        flush(&mut cluster, &mut merged, &mut colocated);
    }

    (merged, colocated)
}

/// Scoring weights (see the `tripwire.score_w_*` config items).
#[derive(Debug, Clone, Copy)]
pub struct RankWeights {
    pub volume: f64,
    pub confidence: f64,
    pub cluster: f64,
}

/// Rank symbols for the watchlist and keep the top `n`.
///
/// `quote_volumes` maps symbol → recent quote volume; the volume rank is a
/// 0..100 percentile (highest volume = 100). Confidence is the symbol's best
/// tripwire. Ties break symbol-ascending.
pub fn rank_symbols(
    wires: &[Tripwire],
    quote_volumes: &HashMap<String, f64>,
    colocated: &HashMap<String, usize>,
    weights: RankWeights,
    n: usize,
) -> Vec<String> {
    let mut best_confidence: HashMap<&str, u8> = HashMap::new();
    for w in wires {
        let entry = best_confidence.entry(w.symbol.as_str()).or_insert(0);
        *entry = (*entry).max(w.confidence);
    }
    if best_confidence.is_empty() {
        return Vec::new();
    }

    // Volume percentile across the candidate symbols.
    let mut by_volume: Vec<(&str, f64)> = best_confidence
        .keys()
        .map(|s| (*s, quote_volumes.get(*s).copied().unwrap_or(0.0)))
        .collect();
    by_volume.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("volumes are finite"));
    let denom = (by_volume.len().max(2) - 1) as f64;
    let volume_rank: HashMap<&str, f64> = by_volume
        .iter()
        .enumerate()
        .map(|(i, (s, _))| (*s, i as f64 / denom * 100.0))
        .collect();

    let mut scored: Vec<(f64, &str)> = best_confidence
        .iter()
        .map(|(symbol, conf)| {
            let vol = volume_rank.get(symbol).copied().unwrap_or(0.0);
            let cluster = colocated.get(*symbol).copied().unwrap_or(0) as f64;
            let score = weights.volume * vol
                + weights.confidence * f64::from(*conf)
                + weights.cluster * cluster * 10.0;
            (score, *symbol)
        })
        .collect();

    // Descending score; ties symbol-ascending.
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .expect("scores are finite")
            .then_with(|| a.1.cmp(b.1))
    });
    scored.into_iter().take(n).map(|(_, s)| s.to_string()).collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tripwire::types::VolatilityMetrics;
    use crate::types::Direction;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn wire(
        symbol: &str,
        trigger: Decimal,
        direction: Direction,
        kind: TripwireType,
        confidence: u8,
        created: i64,
    ) -> Tripwire {
        Tripwire::new(
            symbol,
            trigger,
            direction,
            kind,
            confidence,
            10,
            dec!(0.01),
            dec!(0.03),
            created,
            VolatilityMetrics::default(),
        )
    }

    #[test]
    fn merge_prefers_higher_confidence() {
        let (merged, _) = merge_nearby(vec![
            wire("BTCUSDT", dec!(50000), Direction::Long, TripwireType::DailyLevel, 85, 1),
            wire("BTCUSDT", dec!(50010), Direction::Long, TripwireType::Liquidation, 95, 2),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 95);
        assert_eq!(merged[0].kind, TripwireType::Liquidation);
    }

    #[test]
    fn merge_equal_confidence_keeps_earlier() {
        let (merged, _) = merge_nearby(vec![
            wire("BTCUSDT", dec!(50010), Direction::Long, TripwireType::Fvg, 80, 200),
            wire("BTCUSDT", dec!(50000), Direction::Long, TripwireType::OrderBlock, 80, 100),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].created_at_ms, 100);
        assert_eq!(merged[0].kind, TripwireType::OrderBlock);
    }

    #[test]
    fn far_apart_levels_survive() {
        let (merged, _) = merge_nearby(vec![
            wire("BTCUSDT", dec!(50000), Direction::Long, TripwireType::DailyLevel, 85, 1),
            wire("BTCUSDT", dec!(51000), Direction::Long, TripwireType::DailyLevel, 85, 1),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn opposite_directions_never_merge() {
        let (merged, _) = merge_nearby(vec![
            wire("BTCUSDT", dec!(50000), Direction::Long, TripwireType::DailyLevel, 85, 1),
            wire("BTCUSDT", dec!(50000), Direction::Short, TripwireType::DailyLevel, 85, 1),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn confluence_upgrades_to_ultimate_bulgaria() {
        let (merged, colocated) = merge_nearby(vec![
            wire("BTCUSDT", dec!(50000), Direction::Long, TripwireType::DailyLevel, 85, 1),
            wire("BTCUSDT", dec!(50005), Direction::Long, TripwireType::Liquidation, 95, 2),
            wire("BTCUSDT", dec!(50010), Direction::Long, TripwireType::Fvg, 80, 3),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, TripwireType::UltimateBulgaria);
        assert_eq!(merged[0].confidence, 99);
        assert!(merged[0].leverage >= 25);
        assert_eq!(colocated["BTCUSDT"], 3);
    }

    #[test]
    fn rank_ties_break_symbol_ascending() {
        let wires = vec![
            wire("ETHUSDT", dec!(2000), Direction::Long, TripwireType::DailyLevel, 85, 1),
            wire("BTCUSDT", dec!(50000), Direction::Long, TripwireType::DailyLevel, 85, 1),
        ];
        let volumes = HashMap::from([("BTCUSDT".to_string(), 1.0), ("ETHUSDT".to_string(), 1.0)]);
        let ranked = rank_symbols(
            &wires,
            &volumes,
            &HashMap::new(),
            RankWeights {
                volume: 0.4,
                confidence: 0.4,
                cluster: 0.2,
            },
            10,
        );
        assert_eq!(ranked, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    }

    #[test]
    fn rank_keeps_top_n_by_score() {
        let wires = vec![
            wire("AAAUSDT", dec!(1), Direction::Long, TripwireType::Fvg, 60, 1),
            wire("BBBUSDT", dec!(1), Direction::Long, TripwireType::Liquidation, 95, 1),
            wire("CCCUSDT", dec!(1), Direction::Long, TripwireType::DailyLevel, 85, 1),
        ];
        let volumes = HashMap::from([
            ("AAAUSDT".to_string(), 10.0),
            ("BBBUSDT".to_string(), 1_000.0),
            ("CCCUSDT".to_string(), 100.0),
        ]);
        let ranked = rank_symbols(
            &wires,
            &volumes,
            &HashMap::new(),
            RankWeights {
                volume: 0.4,
                confidence: 0.4,
                cluster: 0.2,
            },
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0], "BBBUSDT");
    }
}
