// =============================================================================
// Tripwire Calculators — turn recent OHLCV and derived inputs into levels
// =============================================================================
//
// Contract: given a symbol's candles (oldest first) and optional derived
// inputs, produce zero or more ARMED tripwires. Insufficient data returns
// empty, never an error; candle validation happens upstream in the
// watchlist builder.
//
// Families and their frozen attributes:
//   LIQUIDATION      conf 95, lev 20   volume-profile peaks
//   DAILY_LEVEL      conf 85, lev 12   previous-day high/low
//   BOLLINGER        conf 90, lev 15   squeeze then expansion
//   OI_WIPEOUT       conf 88, lev 15   open-interest flush (derived)
//   FUNDING_SQUEEZE  conf 86, lev 12   extreme funding (derived)
//   BASIS_ARB        conf 84, lev 10   spot-perp dislocation (derived)
//   FVG              conf 80, lev 10   three-candle fair value gap
//   ORDER_BLOCK      conf 82, lev 10   last opposite candle before impulse
//   LIQUIDITY_POOL   conf 78, lev  8   equal highs / equal lows
// =============================================================================

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::market_data::DerivedSnapshot;
use crate::stats::RollingWindow;
use crate::tripwire::indicators;
use crate::tripwire::types::{Regime, Tripwire, TripwireType, VolatilityMetrics};
use crate::types::{Candle, Direction};

/// Inputs shared by every calculator run.
#[derive(Debug, Clone, Copy)]
pub struct CalcParams {
    pub now_ms: i64,
    /// Z-score a volume-profile bin must exceed to count as a cluster.
    pub volume_std_threshold: f64,
}

const DEFAULT_STOP_PCT: Decimal = dec!(0.01);
const DEFAULT_TARGET_PCT: Decimal = dec!(0.03);

/// Funding rate magnitude treated as a squeeze (0.05%).
const FUNDING_SQUEEZE_RATE: f64 = 0.0005;
/// Open-interest drop (percent) treated as a wipeout.
const OI_WIPEOUT_DROP_PCT: f64 = -10.0;
/// Basis magnitude (percent) treated as an arbitrage dislocation.
const BASIS_ARB_PCT: f64 = 0.5;
/// Price bins for the volume profile.
const PROFILE_BINS: usize = 40;
/// Tolerance for "equal" highs/lows in the liquidity-pool scan.
const POOL_TOLERANCE: f64 = 0.0005;

/// Run every family for one symbol. Event-driven families are skipped when
/// no derived snapshot is available.
pub fn compute_all(
    symbol: &str,
    candles: &[Candle],
    derived: Option<DerivedSnapshot>,
    params: CalcParams,
) -> Vec<Tripwire> {
    let vol = volatility_metrics(candles);
    let mut out = Vec::new();

    out.extend(liquidation_clusters(symbol, candles, params, vol));
    out.extend(daily_levels(symbol, candles, params.now_ms, vol));
    out.extend(bollinger_breakout(symbol, candles, params.now_ms, vol));
    out.extend(fair_value_gaps(symbol, candles, params.now_ms, vol));
    out.extend(order_blocks(symbol, candles, params.now_ms, vol));
    out.extend(liquidity_pools(symbol, candles, params.now_ms, vol));

    if let (Some(snapshot), Some(last)) = (derived, candles.last()) {
        out.extend(oi_wipeout(symbol, snapshot, last, params.now_ms, vol));
        out.extend(funding_squeeze(symbol, snapshot, last, params.now_ms, vol));
        out.extend(basis_arb(symbol, snapshot, last, params.now_ms, vol));
    }

    out
}

/// Volatility context frozen onto each tripwire produced this cycle.
pub fn volatility_metrics(candles: &[Candle]) -> VolatilityMetrics {
    let atr = indicators::atr(candles, 14).unwrap_or(0.0);
    let regime = match indicators::adx(candles, 14) {
        Some(reading) if reading.adx >= 25.0 => Regime::Trending,
        _ => Regime::Ranging,
    };
    let mean_volume = if candles.is_empty() {
        0.0
    } else {
        candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64
    };

    VolatilityMetrics {
        atr,
        regime,
        // Trends run further: wider stop, slightly smaller size.
        stop_multiplier: if regime == Regime::Trending { 1.5 } else { 1.0 },
        size_multiplier: if regime == Regime::Trending { 0.8 } else { 1.0 },
        mean_volume,
    }
}

fn make(
    symbol: &str,
    trigger: f64,
    direction: Direction,
    kind: TripwireType,
    confidence: u8,
    leverage: u8,
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Option<Tripwire> {
    if !trigger.is_finite() || trigger <= 0.0 {
        return None;
    }
    let price = Decimal::from_f64(trigger)?.round_dp(8);
    Some(Tripwire::new(
        symbol,
        price,
        direction,
        kind,
        confidence,
        leverage,
        DEFAULT_STOP_PCT,
        DEFAULT_TARGET_PCT,
        now_ms,
        vol,
    ))
}

// ---------------------------------------------------------------------------
// Liquidation clusters (volume profile)
// ---------------------------------------------------------------------------

/// Volume-profile peaks: bins whose volume z-score against the profile mean
/// exceeds the threshold become levels. Levels below the last close arm
/// LONG (flush into the cluster, then bounce), above arm SHORT.
pub fn liquidation_clusters(
    symbol: &str,
    candles: &[Candle],
    params: CalcParams,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    if candles.len() < 30 {
        return Vec::new();
    }
    let window = &candles[candles.len().saturating_sub(100)..];

    let lo = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let hi = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
        return Vec::new();
    }
    let bin_width = (hi - lo) / PROFILE_BINS as f64;
    if bin_width <= 0.0 {
        return Vec::new();
    }

    let mut bins = vec![0.0f64; PROFILE_BINS];
    for c in window {
        let idx = (((c.close - lo) / bin_width) as usize).min(PROFILE_BINS - 1);
        bins[idx] += c.volume;
    }

    let mut profile = RollingWindow::new(PROFILE_BINS);
    for &v in &bins {
        profile.push(v);
    }

    let last_close = window.last().map(|c| c.close).unwrap_or(0.0);
    let mut peaks: Vec<(f64, f64)> = bins
        .iter()
        .enumerate()
        .filter_map(|(i, &v)| {
            let z = profile.z_score(v)?;
            (z > params.volume_std_threshold).then(|| {
                let center = lo + (i as f64 + 0.5) * bin_width;
                (center, z)
            })
        })
        .collect();

    // Strongest clusters first, at most three per symbol per cycle.
    peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("z-scores are finite"));
    peaks
        .into_iter()
        .take(3)
        .filter_map(|(level, _)| {
            let direction = if level < last_close {
                Direction::Long
            } else {
                Direction::Short
            };
            make(
                symbol,
                level,
                direction,
                TripwireType::Liquidation,
                95,
                20,
                params.now_ms,
                vol,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Daily levels
// ---------------------------------------------------------------------------

/// Previous-day high (LONG breakout) and low (SHORT breakdown).
pub fn daily_levels(
    symbol: &str,
    candles: &[Candle],
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    let Some(last) = candles.last() else {
        return Vec::new();
    };
    let today = last.timestamp_ms.div_euclid(86_400_000);
    let prev_day = today - 1;

    let mut high = f64::NEG_INFINITY;
    let mut low = f64::INFINITY;
    for c in candles {
        if c.timestamp_ms.div_euclid(86_400_000) == prev_day {
            high = high.max(c.high);
            low = low.min(c.low);
        }
    }
    if !high.is_finite() || !low.is_finite() {
        return Vec::new();
    }

    [
        make(
            symbol,
            high,
            Direction::Long,
            TripwireType::DailyLevel,
            85,
            12,
            now_ms,
            vol,
        ),
        make(
            symbol,
            low,
            Direction::Short,
            TripwireType::DailyLevel,
            85,
            12,
            now_ms,
            vol,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// ---------------------------------------------------------------------------
// Bollinger breakout
// ---------------------------------------------------------------------------

/// A squeeze (band width at its 20-sample minimum) followed by expansion
/// arms breakout levels at both bands.
pub fn bollinger_breakout(
    symbol: &str,
    candles: &[Candle],
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    const PERIOD: usize = 20;
    const HISTORY: usize = 20;

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    if closes.len() < PERIOD + HISTORY {
        return Vec::new();
    }

    // Band width at each of the trailing HISTORY positions.
    let widths: Vec<f64> = (0..HISTORY)
        .filter_map(|back| {
            let end = closes.len() - (HISTORY - 1 - back);
            indicators::bollinger(&closes[..end], PERIOD, 2.0).map(|b| b.width)
        })
        .collect();
    if widths.len() < HISTORY {
        return Vec::new();
    }

    let current = widths[HISTORY - 1];
    let previous = widths[HISTORY - 2];
    let min_width = widths[..HISTORY - 1]
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);

    // Squeeze at the previous bar, expanding now.
    let squeezed = previous <= min_width + f64::EPSILON;
    let expanding = current > previous * 1.1;
    if !(squeezed && expanding) {
        return Vec::new();
    }

    let Some(bands) = indicators::bollinger(&closes, PERIOD, 2.0) else {
        return Vec::new();
    };

    [
        make(
            symbol,
            bands.upper,
            Direction::Long,
            TripwireType::Bollinger,
            90,
            15,
            now_ms,
            vol,
        ),
        make(
            symbol,
            bands.lower,
            Direction::Short,
            TripwireType::Bollinger,
            90,
            15,
            now_ms,
            vol,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// ---------------------------------------------------------------------------
// Event-driven families (derived inputs)
// ---------------------------------------------------------------------------

/// An open-interest flush. The last candle's color says who was flushed:
/// a red candle flushed longs (arm the contrarian LONG), green the inverse.
pub fn oi_wipeout(
    symbol: &str,
    derived: DerivedSnapshot,
    last: &Candle,
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    if derived.oi_delta_pct > OI_WIPEOUT_DROP_PCT {
        return Vec::new();
    }
    let direction = if last.is_bullish() {
        Direction::Short
    } else {
        Direction::Long
    };
    make(
        symbol,
        last.close,
        direction,
        TripwireType::OiWipeout,
        88,
        15,
        now_ms,
        vol,
    )
    .into_iter()
    .collect()
}

/// Extreme funding: overleveraged longs pay (arm SHORT), and vice versa.
pub fn funding_squeeze(
    symbol: &str,
    derived: DerivedSnapshot,
    last: &Candle,
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    let direction = if derived.funding_rate >= FUNDING_SQUEEZE_RATE {
        Direction::Short
    } else if derived.funding_rate <= -FUNDING_SQUEEZE_RATE {
        Direction::Long
    } else {
        return Vec::new();
    };
    make(
        symbol,
        last.close,
        direction,
        TripwireType::FundingSqueeze,
        86,
        12,
        now_ms,
        vol,
    )
    .into_iter()
    .collect()
}

/// Spot-perp dislocation: rich perp arms SHORT (sell the premium), cheap
/// perp arms LONG.
pub fn basis_arb(
    symbol: &str,
    derived: DerivedSnapshot,
    last: &Candle,
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    let direction = if derived.basis_pct >= BASIS_ARB_PCT {
        Direction::Short
    } else if derived.basis_pct <= -BASIS_ARB_PCT {
        Direction::Long
    } else {
        return Vec::new();
    };
    make(
        symbol,
        last.close,
        direction,
        TripwireType::BasisArb,
        84,
        10,
        now_ms,
        vol,
    )
    .into_iter()
    .collect()
}

// ---------------------------------------------------------------------------
// Structural families (Hunter)
// ---------------------------------------------------------------------------

/// Three-candle fair value gaps over the trailing 50 candles, newest two
/// per direction.
pub fn fair_value_gaps(
    symbol: &str,
    candles: &[Candle],
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    if candles.len() < 3 {
        return Vec::new();
    }
    let window = &candles[candles.len().saturating_sub(50)..];

    let mut longs = Vec::new();
    let mut shorts = Vec::new();
    for w in window.windows(3) {
        let (first, third) = (w[0], w[2]);
        if first.high < third.low {
            // Bullish gap: price tends to revisit the void before continuing.
            longs.push((first.high + third.low) / 2.0);
        } else if first.low > third.high {
            shorts.push((first.low + third.high) / 2.0);
        }
    }

    let mut out = Vec::new();
    for level in longs.into_iter().rev().take(2) {
        out.extend(make(
            symbol,
            level,
            Direction::Long,
            TripwireType::Fvg,
            80,
            10,
            now_ms,
            vol,
        ));
    }
    for level in shorts.into_iter().rev().take(2) {
        out.extend(make(
            symbol,
            level,
            Direction::Short,
            TripwireType::Fvg,
            80,
            10,
            now_ms,
            vol,
        ));
    }
    out
}

/// The last opposite-colored candle before an impulse (body > 1.5× the mean
/// body) marks an order block at its midpoint.
pub fn order_blocks(
    symbol: &str,
    candles: &[Candle],
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    const LOOKBACK: usize = 20;
    if candles.len() < LOOKBACK + 2 {
        return Vec::new();
    }
    let window = &candles[candles.len() - LOOKBACK..];
    let mean_body = window.iter().map(Candle::body).sum::<f64>() / LOOKBACK as f64;
    if mean_body <= 0.0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for i in (1..window.len()).rev() {
        let impulse = window[i];
        if impulse.body() <= 1.5 * mean_body {
            continue;
        }
        let block = window[i - 1];
        if block.is_bullish() == impulse.is_bullish() {
            continue;
        }
        let level = (block.high + block.low) / 2.0;
        let direction = if impulse.is_bullish() {
            Direction::Long
        } else {
            Direction::Short
        };
        out.extend(make(
            symbol,
            level,
            direction,
            TripwireType::OrderBlock,
            82,
            10,
            now_ms,
            vol,
        ));
        if out.len() >= 2 {
            break;
        }
    }
    out
}

/// Equal highs leave resting stops above (arm SHORT at the sweep level);
/// equal lows symmetric.
pub fn liquidity_pools(
    symbol: &str,
    candles: &[Candle],
    now_ms: i64,
    vol: VolatilityMetrics,
) -> Vec<Tripwire> {
    const LOOKBACK: usize = 30;
    if candles.len() < LOOKBACK {
        return Vec::new();
    }
    let window = &candles[candles.len() - LOOKBACK..];

    // Swing points: strictly higher high / lower low than both neighbors.
    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();
    for i in 1..window.len() - 1 {
        if window[i].high > window[i - 1].high && window[i].high > window[i + 1].high {
            swing_highs.push(window[i].high);
        }
        if window[i].low < window[i - 1].low && window[i].low < window[i + 1].low {
            swing_lows.push(window[i].low);
        }
    }

    let mut out = Vec::new();
    if let Some(level) = equal_level(&swing_highs, true) {
        out.extend(make(
            symbol,
            level,
            Direction::Short,
            TripwireType::LiquidityPool,
            78,
            8,
            now_ms,
            vol,
        ));
    }
    if let Some(level) = equal_level(&swing_lows, false) {
        out.extend(make(
            symbol,
            level,
            Direction::Long,
            TripwireType::LiquidityPool,
            78,
            8,
            now_ms,
            vol,
        ));
    }
    out
}

/// Two swing points within tolerance of each other form a pool; returns the
/// outer extreme (highest of equal highs, lowest of equal lows).
fn equal_level(points: &[f64], pick_max: bool) -> Option<f64> {
    for (i, &a) in points.iter().enumerate() {
        for &b in &points[i + 1..] {
            if a > 0.0 && ((a - b) / a).abs() <= POOL_TOLERANCE {
                return Some(if pick_max { a.max(b) } else { a.min(b) });
            }
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::ToPrimitive;

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp_ms: ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn flat_series(n: usize, price: f64, volume: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                candle(
                    i as i64 * 60_000,
                    price,
                    price + 1.0,
                    price - 1.0,
                    price,
                    volume,
                )
            })
            .collect()
    }

    fn params() -> CalcParams {
        CalcParams {
            now_ms: 1_700_000_000_000,
            volume_std_threshold: 2.0,
        }
    }

    #[test]
    fn insufficient_data_returns_empty() {
        let candles = flat_series(5, 100.0, 1.0);
        assert!(liquidation_clusters("BTCUSDT", &candles, params(), VolatilityMetrics::default()).is_empty());
        assert!(bollinger_breakout("BTCUSDT", &candles, 0, VolatilityMetrics::default()).is_empty());
        assert!(order_blocks("BTCUSDT", &candles, 0, VolatilityMetrics::default()).is_empty());
        assert!(compute_all("BTCUSDT", &[], None, params()).is_empty());
    }

    #[test]
    fn liquidation_cluster_found_at_volume_spike() {
        // Flat tape with one heavy price level well below the close.
        let mut candles = flat_series(100, 100.0, 1.0);
        for c in candles.iter_mut().take(8) {
            c.close = 90.0;
            c.low = 89.0;
            c.high = 91.0;
            c.volume = 50.0;
        }
        // Price now trades at 100, so the 90 cluster arms LONG.
        let wires = liquidation_clusters("BTCUSDT", &candles, params(), VolatilityMetrics::default());
        assert!(!wires.is_empty());
        let w = &wires[0];
        assert_eq!(w.kind, TripwireType::Liquidation);
        assert_eq!(w.direction, Direction::Long);
        assert_eq!(w.confidence, 95);
        assert_eq!(w.leverage, 20);
        let trigger: f64 = w.trigger_price.to_f64().unwrap();
        assert!((85.0..95.0).contains(&trigger), "trigger {trigger}");
    }

    #[test]
    fn daily_levels_use_previous_day() {
        let day = 86_400_000i64;
        let mut candles = Vec::new();
        // Yesterday: range 95..110.
        for i in 0..24 {
            candles.push(candle(day + i * 3_600_000, 100.0, 110.0 - i as f64 * 0.1, 95.0, 100.0, 1.0));
        }
        // Today so far.
        for i in 0..4 {
            candles.push(candle(2 * day + i * 3_600_000, 100.0, 101.0, 99.0, 100.0, 1.0));
        }

        let wires = daily_levels("BTCUSDT", &candles, 0, VolatilityMetrics::default());
        assert_eq!(wires.len(), 2);
        let long = wires.iter().find(|w| w.direction == Direction::Long).unwrap();
        let short = wires.iter().find(|w| w.direction == Direction::Short).unwrap();
        let high: f64 = long.trigger_price.to_f64().unwrap();
        let low: f64 = short.trigger_price.to_f64().unwrap();
        assert!((high - 110.0).abs() < 1e-6);
        assert!((low - 95.0).abs() < 1e-6);
        assert_eq!(long.confidence, 85);
        assert_eq!(long.leverage, 12);
    }

    #[test]
    fn funding_squeeze_contrarian_direction() {
        let last = candle(0, 100.0, 101.0, 99.0, 100.0, 1.0);
        let mut derived = DerivedSnapshot {
            funding_rate: 0.001,
            ..Default::default()
        };
        let wires = funding_squeeze("BTCUSDT", derived, &last, 0, VolatilityMetrics::default());
        assert_eq!(wires.len(), 1);
        assert_eq!(wires[0].direction, Direction::Short);

        derived.funding_rate = -0.001;
        let wires = funding_squeeze("BTCUSDT", derived, &last, 0, VolatilityMetrics::default());
        assert_eq!(wires[0].direction, Direction::Long);

        derived.funding_rate = 0.0001;
        assert!(funding_squeeze("BTCUSDT", derived, &last, 0, VolatilityMetrics::default()).is_empty());
    }

    #[test]
    fn oi_wipeout_requires_flush() {
        let red = candle(0, 101.0, 102.0, 98.0, 99.0, 1.0);
        let derived = DerivedSnapshot {
            oi_delta_pct: -15.0,
            ..Default::default()
        };
        let wires = oi_wipeout("BTCUSDT", derived, &red, 0, VolatilityMetrics::default());
        assert_eq!(wires.len(), 1);
        assert_eq!(wires[0].direction, Direction::Long);

        let mild = DerivedSnapshot {
            oi_delta_pct: -3.0,
            ..Default::default()
        };
        assert!(oi_wipeout("BTCUSDT", mild, &red, 0, VolatilityMetrics::default()).is_empty());
    }

    #[test]
    fn basis_arb_direction_follows_premium() {
        let last = candle(0, 100.0, 101.0, 99.0, 100.0, 1.0);
        let rich = DerivedSnapshot {
            basis_pct: 0.8,
            ..Default::default()
        };
        let wires = basis_arb("BTCUSDT", rich, &last, 0, VolatilityMetrics::default());
        assert_eq!(wires[0].direction, Direction::Short);

        let cheap = DerivedSnapshot {
            basis_pct: -0.8,
            ..Default::default()
        };
        let wires = basis_arb("BTCUSDT", cheap, &last, 0, VolatilityMetrics::default());
        assert_eq!(wires[0].direction, Direction::Long);
    }

    #[test]
    fn fvg_detects_bullish_gap() {
        let mut candles = flat_series(10, 100.0, 1.0);
        // Gap: candle 7 low (104) above candle 5 high (101).
        candles[5] = candle(5 * 60_000, 100.0, 101.0, 99.0, 100.5, 1.0);
        candles[6] = candle(6 * 60_000, 100.5, 103.0, 100.0, 102.5, 1.0);
        candles[7] = candle(7 * 60_000, 103.0, 106.0, 104.0, 105.0, 1.0);

        let wires = fair_value_gaps("BTCUSDT", &candles, 0, VolatilityMetrics::default());
        let long = wires.iter().find(|w| w.direction == Direction::Long).unwrap();
        assert_eq!(long.kind, TripwireType::Fvg);
        let trigger: f64 = long.trigger_price.to_f64().unwrap();
        assert!((trigger - 102.5).abs() < 1e-6, "midpoint of 101..104, got {trigger}");
    }

    #[test]
    fn liquidity_pool_on_equal_highs() {
        let mut candles = flat_series(30, 100.0, 1.0);
        // Two swing highs at ~105 within tolerance.
        candles[10] = candle(10 * 60_000, 100.0, 105.0, 99.0, 100.0, 1.0);
        candles[20] = candle(20 * 60_000, 100.0, 105.02, 99.0, 100.0, 1.0);

        let wires = liquidity_pools("BTCUSDT", &candles, 0, VolatilityMetrics::default());
        let short = wires.iter().find(|w| w.direction == Direction::Short);
        assert!(short.is_some(), "expected a pool above equal highs");
    }

    #[test]
    fn volatility_metrics_regime() {
        let trending: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(i, base, base + 1.5, base - 0.5, base + 1.0, 1.0)
            })
            .collect();
        let m = volatility_metrics(&trending);
        assert_eq!(m.regime, Regime::Trending);
        assert!(m.stop_multiplier > 1.0);

        let flat = flat_series(60, 100.0, 1.0);
        let m = volatility_metrics(&flat);
        assert_eq!(m.regime, Regime::Ranging);
    }
}
