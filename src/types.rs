// =============================================================================
// Shared types used across the Titan trading pipeline
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single normalized trade from any venue feed.
///
/// `buyer_is_maker == true` means a market sell consumed a resting bid, i.e.
/// selling pressure. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: Decimal,
    pub qty: Decimal,
    /// Exchange-provided timestamp (ms). Used for all window arithmetic so
    /// local receipt jitter never inflates counts.
    pub timestamp_ms: i64,
    pub buyer_is_maker: bool,
}

impl Trade {
    /// Signed quote volume: positive for taker buys, negative for taker sells.
    pub fn signed_quote_volume(&self) -> Decimal {
        let quote = self.price * self.qty;
        if self.buyer_is_maker {
            -quote
        } else {
            quote
        }
    }

    /// Price as f64 for the statistics kernel only.
    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }
}

/// A single OHLCV candle, oldest-first in every sequence the engine handles.
///
/// Candles feed statistics and tripwire calculators, so fields stay f64.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A candle is well-formed when `high >= low` and both open and close
    /// fall inside `[low, high]`.
    pub fn is_valid(&self) -> bool {
        self.high >= self.low
            && self.close >= self.low
            && self.close <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.volume >= 0.0
            && self.high.is_finite()
            && self.low.is_finite()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Trade direction of a tripwire or intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(self) -> i32 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }

    /// The order side that opens a position in this direction.
    pub fn entry_side(self) -> Side {
        match self {
            Self::Long => Side::Buy,
            Self::Short => Side::Sell,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side as venues understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Venues the execution router can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Binance,
    Bybit,
    Mexc,
}

impl VenueId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Mexc => "mexc",
        }
    }

    /// Short suffix embedded in child client-order ids.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Binance => "BIN",
            Self::Bybit => "BYB",
            Self::Mexc => "MEX",
        }
    }
}

impl std::fmt::Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VenueId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "mexc" => Ok(Self::Mexc),
            other => anyhow::bail!("unknown venue '{other}'"),
        }
    }
}

/// The three cooperating phase engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseId {
    Scavenger,
    Hunter,
    Sentinel,
}

impl PhaseId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scavenger => "scavenger",
            Self::Hunter => "hunter",
            Self::Sentinel => "sentinel",
        }
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PhaseId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scavenger" => Ok(Self::Scavenger),
            "hunter" => Ok(Self::Hunter),
            "sentinel" => Ok(Self::Sentinel),
            other => anyhow::bail!("unknown phase '{other}'"),
        }
    }
}
