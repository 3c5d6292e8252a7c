// =============================================================================
// Indicator math backing the tripwire calculators and trend veto
// =============================================================================
//
// ATR (Wilder), ADX (Wilder), and Bollinger bands over OHLCV slices, oldest
// first. All return `Option`: insufficient data or a non-finite intermediate
// yields `None`, never an error.
// =============================================================================

use crate::types::Candle;

// ---------------------------------------------------------------------------
// ATR
// ---------------------------------------------------------------------------

/// Average True Range over `period` using Wilder's smoothing.
///
/// TR = max(H−L, |H−prevC|, |L−prevC|); seeded with the SMA of the first
/// `period` TR values. Needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let tr_values: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (w[0], w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();

    let period_f = period as f64;
    let mut value: f64 = tr_values[..period].iter().sum::<f64>() / period_f;
    for &tr in &tr_values[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
    }

    value.is_finite().then_some(value)
}

/// ATR as a percentage of the last close.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let last_close = candles.last()?.close;
    (last_close != 0.0).then(|| value / last_close * 100.0)
}

// ---------------------------------------------------------------------------
// ADX
// ---------------------------------------------------------------------------

/// Trend strength and direction from the directional movement system.
#[derive(Debug, Clone, Copy)]
pub struct TrendReading {
    /// ADX in [0, 100]; above ~25 the market is trending.
    pub adx: f64,
    /// +1 when +DI dominates (uptrend), −1 when −DI dominates.
    pub direction: i32,
}

/// ADX over `period` with Wilder's smoothing. Needs `2·period + 1` candles:
/// `period` bars to seed the DM/TR smoothing and `period` DX values to seed
/// the ADX average.
pub fn adx(candles: &[Candle], period: usize) -> Option<TrendReading> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }
    let period_f = period as f64;

    let n = candles.len();
    let bar_count = n - 1;
    let mut plus_dm = Vec::with_capacity(bar_count);
    let mut minus_dm = Vec::with_capacity(bar_count);
    let mut tr_vals = Vec::with_capacity(bar_count);

    for i in 1..n {
        let (prev, cur) = (candles[i - 1], candles[i]);
        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        tr_vals.push(tr);
    }

    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(bar_count - period + 1);
    dx_values.push(dx(smooth_plus, smooth_minus, smooth_tr)?);

    for i in period..bar_count {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];
        dx_values.push(dx(smooth_plus, smooth_minus, smooth_tr)?);
    }

    if dx_values.len() < period {
        return None;
    }
    let mut adx_value: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    for &v in &dx_values[period..] {
        adx_value = (adx_value * (period_f - 1.0) + v) / period_f;
    }
    if !adx_value.is_finite() {
        return None;
    }

    Some(TrendReading {
        adx: adx_value,
        direction: if smooth_plus >= smooth_minus { 1 } else { -1 },
    })
}

fn dx(smooth_plus: f64, smooth_minus: f64, smooth_tr: f64) -> Option<f64> {
    if smooth_tr == 0.0 {
        return None;
    }
    let plus_di = smooth_plus / smooth_tr * 100.0;
    let minus_di = smooth_minus / smooth_tr * 100.0;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return Some(0.0);
    }
    let value = (plus_di - minus_di).abs() / di_sum * 100.0;
    value.is_finite().then_some(value)
}

// ---------------------------------------------------------------------------
// Bollinger bands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper − lower) / middle · 100.
    pub width: f64,
}

/// Bands over the trailing `period` closes: middle = SMA, upper/lower =
/// middle ± `num_std`·σ (population σ, matching the classic definition).
pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<Bollinger> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;
    let width = (upper - lower) / middle * 100.0;
    width.is_finite().then_some(Bollinger {
        upper,
        middle,
        lower,
        width,
    })
}
