// =============================================================================
// Trade Flow — per-symbol order-flow accumulator (CVD, windows, last price)
// =============================================================================

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Trade;

/// How many windowed entries to retain at most; covers the widest CVD
/// window at full tick rate without unbounded growth.
const MAX_WINDOW_ENTRIES: usize = 8_192;

/// Aggregates trade flow for one symbol.
///
/// CVD is cumulative signed quote volume: buyer-is-maker trades count
/// negative. The recent window retains `(exchange_ts, signed_volume)` pairs
/// so vetoes can ask for the CVD delta over the last N milliseconds using
/// exchange time, never local receipt time.
pub struct TradeFlow {
    symbol: String,
    cvd: RwLock<Decimal>,
    window: RwLock<VecDeque<(i64, Decimal)>>,
    last_price: RwLock<Decimal>,
    last_timestamp_ms: RwLock<i64>,
    buy_volume: RwLock<Decimal>,
    sell_volume: RwLock<Decimal>,
    trade_count: AtomicU64,
}

impl TradeFlow {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            cvd: RwLock::new(Decimal::ZERO),
            window: RwLock::new(VecDeque::new()),
            last_price: RwLock::new(Decimal::ZERO),
            last_timestamp_ms: RwLock::new(0),
            buy_volume: RwLock::new(Decimal::ZERO),
            sell_volume: RwLock::new(Decimal::ZERO),
            trade_count: AtomicU64::new(0),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Fold one trade into the accumulators.
    pub fn process(&self, trade: &Trade) {
        let signed = trade.signed_quote_volume();

        *self.cvd.write() += signed;
        if trade.buyer_is_maker {
            *self.sell_volume.write() += trade.price * trade.qty;
        } else {
            *self.buy_volume.write() += trade.price * trade.qty;
        }

        {
            let mut window = self.window.write();
            window.push_back((trade.timestamp_ms, signed));
            while window.len() > MAX_WINDOW_ENTRIES {
                window.pop_front();
            }
        }

        *self.last_price.write() = trade.price;
        *self.last_timestamp_ms.write() = trade.timestamp_ms;
        self.trade_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative volume delta since process start.
    pub fn cvd(&self) -> Decimal {
        *self.cvd.read()
    }

    /// Signed quote volume over trades with exchange timestamps in
    /// `(now_ms - window_ms, now_ms]`.
    pub fn cvd_delta(&self, now_ms: i64, window_ms: i64) -> Decimal {
        let cutoff = now_ms - window_ms;
        self.window
            .read()
            .iter()
            .filter(|(ts, _)| *ts > cutoff && *ts <= now_ms)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn last_price(&self) -> Decimal {
        *self.last_price.read()
    }

    pub fn last_timestamp_ms(&self) -> i64 {
        *self.last_timestamp_ms.read()
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }

    /// Buy volume fraction of total, 0.5 when no volume yet.
    pub fn buy_ratio(&self) -> f64 {
        let buy = *self.buy_volume.read();
        let sell = *self.sell_volume.read();
        let total = buy + sell;
        if total.is_zero() {
            return 0.5;
        }
        (buy / total).to_f64().unwrap_or(0.5)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(ts: i64, price: Decimal, qty: Decimal, buyer_is_maker: bool) -> Trade {
        Trade {
            symbol: "BTCUSDT".into(),
            price,
            qty,
            timestamp_ms: ts,
            buyer_is_maker,
        }
    }

    #[test]
    fn cvd_accumulates_signed_volume() {
        let flow = TradeFlow::new("BTCUSDT");
        flow.process(&trade(1_000, dec!(100), dec!(2), false)); // +200
        flow.process(&trade(1_001, dec!(100), dec!(1), true)); // -100
        assert_eq!(flow.cvd(), dec!(100));
        assert_eq!(flow.trade_count(), 2);
        assert_eq!(flow.last_price(), dec!(100));
    }

    #[test]
    fn cvd_delta_uses_exchange_timestamps() {
        let flow = TradeFlow::new("BTCUSDT");
        flow.process(&trade(1_000, dec!(100), dec!(1), false)); // outside window
        flow.process(&trade(5_500, dec!(100), dec!(2), false)); // +200 inside
        flow.process(&trade(5_900, dec!(100), dec!(1), true)); // -100 inside

        // Window (900, 5900]: only the last two trades.
        assert_eq!(flow.cvd_delta(5_900, 5_000), dec!(100));
        // Narrow window that excludes the 5_500 trade.
        assert_eq!(flow.cvd_delta(5_900, 300), dec!(-100));
    }

    #[test]
    fn buy_ratio_neutral_when_empty() {
        let flow = TradeFlow::new("BTCUSDT");
        assert!((flow.buy_ratio() - 0.5).abs() < 1e-12);

        flow.process(&trade(1, dec!(100), dec!(3), false));
        flow.process(&trade(2, dec!(100), dec!(1), true));
        assert!((flow.buy_ratio() - 0.75).abs() < 1e-12);
    }
}
