// =============================================================================
// Tripwire model — the central entity of the pre-computation engine
// =============================================================================

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// Which calculator family produced a tripwire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripwireType {
    #[serde(rename = "LIQUIDATION")]
    Liquidation,
    #[serde(rename = "DAILY_LEVEL")]
    DailyLevel,
    #[serde(rename = "BOLLINGER")]
    Bollinger,
    #[serde(rename = "OI_WIPEOUT")]
    OiWipeout,
    #[serde(rename = "FUNDING_SQUEEZE")]
    FundingSqueeze,
    #[serde(rename = "BASIS_ARB")]
    BasisArb,
    #[serde(rename = "ULTIMATE_BULGARIA")]
    UltimateBulgaria,
    #[serde(rename = "FVG")]
    Fvg,
    #[serde(rename = "ORDER_BLOCK")]
    OrderBlock,
    #[serde(rename = "LIQUIDITY_POOL")]
    LiquidityPool,
}

impl TripwireType {
    /// Which phase engine hunts this family. Structural candle patterns
    /// belong to the hunter; everything else to the scavenger.
    pub fn phase(&self) -> crate::types::PhaseId {
        match self {
            Self::Fvg | Self::OrderBlock | Self::LiquidityPool => crate::types::PhaseId::Hunter,
            _ => crate::types::PhaseId::Scavenger,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Liquidation => "LIQUIDATION",
            Self::DailyLevel => "DAILY_LEVEL",
            Self::Bollinger => "BOLLINGER",
            Self::OiWipeout => "OI_WIPEOUT",
            Self::FundingSqueeze => "FUNDING_SQUEEZE",
            Self::BasisArb => "BASIS_ARB",
            Self::UltimateBulgaria => "ULTIMATE_BULGARIA",
            Self::Fvg => "FVG",
            Self::OrderBlock => "ORDER_BLOCK",
            Self::LiquidityPool => "LIQUIDITY_POOL",
        }
    }
}

/// Detection state. Terminal states are EXPIRED and MITIGATED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripwireState {
    #[serde(rename = "ARMED")]
    Armed,
    #[serde(rename = "CANDIDATE")]
    Candidate,
    #[serde(rename = "ACTIVATED")]
    Activated,
    #[serde(rename = "FIRED")]
    Fired,
    #[serde(rename = "COOLDOWN")]
    Cooldown,
    #[serde(rename = "EXPIRED")]
    Expired,
    #[serde(rename = "MITIGATED")]
    Mitigated,
}

impl TripwireState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Mitigated)
    }
}

impl std::fmt::Display for TripwireState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Armed => "ARMED",
            Self::Candidate => "CANDIDATE",
            Self::Activated => "ACTIVATED",
            Self::Fired => "FIRED",
            Self::Cooldown => "COOLDOWN",
            Self::Expired => "EXPIRED",
            Self::Mitigated => "MITIGATED",
        };
        write!(f, "{s}")
    }
}

/// The 100 ms validation window counter. Closed on start, open on end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCounter {
    pub start_ms: i64,
    pub count: u32,
}

/// Volatility context frozen onto the tripwire at creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub atr: f64,
    /// "trending" or "ranging", derived from ADX at computation time.
    pub regime: Regime,
    pub stop_multiplier: f64,
    pub size_multiplier: f64,
    pub mean_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Ranging,
}

impl Default for VolatilityMetrics {
    fn default() -> Self {
        Self {
            atr: 0.0,
            regime: Regime::Ranging,
            stop_multiplier: 1.0,
            size_multiplier: 1.0,
            mean_volume: 0.0,
        }
    }
}

/// Identity of a tripwire: at most one non-terminal tripwire exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripwireKey {
    pub symbol: String,
    pub trigger_price: Decimal,
    pub direction: Direction,
}

/// A pre-computed price level with everything needed to fire.
///
/// Confidence, leverage, and stop/target are frozen at creation; the next
/// pre-computation cycle re-derives them on fresh tripwires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tripwire {
    pub symbol: String,
    pub trigger_price: Decimal,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub kind: TripwireType,
    /// 0..100.
    pub confidence: u8,
    /// 1..100.
    pub leverage: u8,
    pub stop_loss_pct: Decimal,
    pub target_pct: Decimal,
    pub state: TripwireState,
    pub volume_counter: VolumeCounter,
    pub created_at_ms: i64,
    pub activated_at_ms: i64,
    pub cooldown_until_ms: i64,
    pub attempts: u32,
    pub volatility: VolatilityMetrics,
}

impl Tripwire {
    /// A fresh ARMED tripwire.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        trigger_price: Decimal,
        direction: Direction,
        kind: TripwireType,
        confidence: u8,
        leverage: u8,
        stop_loss_pct: Decimal,
        target_pct: Decimal,
        created_at_ms: i64,
        volatility: VolatilityMetrics,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            trigger_price,
            direction,
            kind,
            confidence: confidence.min(100),
            leverage: leverage.clamp(1, 100),
            stop_loss_pct,
            target_pct,
            state: TripwireState::Armed,
            volume_counter: VolumeCounter::default(),
            created_at_ms,
            activated_at_ms: 0,
            cooldown_until_ms: 0,
            attempts: 0,
            volatility,
        }
    }

    pub fn key(&self) -> TripwireKey {
        TripwireKey {
            symbol: self.symbol.clone(),
            trigger_price: self.trigger_price,
            direction: self.direction,
        }
    }

    /// Relative distance of `price` from the trigger: |p − t| / t.
    pub fn proximity(&self, price: Decimal) -> Decimal {
        if self.trigger_price.is_zero() {
            return Decimal::MAX;
        }
        ((price - self.trigger_price) / self.trigger_price).abs()
    }

    /// Whether `price` is within the arming band (`proximity_pct`, e.g.
    /// 0.001 for ±0.1%). The boundary itself matches.
    pub fn price_matches(&self, price: Decimal, proximity_pct: f64) -> bool {
        let band = Decimal::from_f64(proximity_pct).unwrap_or(Decimal::ZERO);
        self.proximity(price) <= band
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wire(trigger: Decimal) -> Tripwire {
        Tripwire::new(
            "BTCUSDT",
            trigger,
            Direction::Long,
            TripwireType::Liquidation,
            95,
            20,
            dec!(0.01),
            dec!(0.03),
            0,
            VolatilityMetrics::default(),
        )
    }

    #[test]
    fn proximity_boundary_is_inclusive() {
        let w = wire(dec!(50000));
        // Exactly 0.1% away: matches.
        assert!(w.price_matches(dec!(50050), 0.001));
        assert!(w.price_matches(dec!(49950), 0.001));
        // One tick beyond the band: no match.
        assert!(!w.price_matches(dec!(50050.01), 0.001));
        assert!(!w.price_matches(dec!(49949.99), 0.001));
    }

    #[test]
    fn leverage_and_confidence_clamped() {
        let w = Tripwire::new(
            "X",
            dec!(1),
            Direction::Short,
            TripwireType::Fvg,
            255,
            0,
            dec!(0.01),
            dec!(0.03),
            0,
            VolatilityMetrics::default(),
        );
        assert_eq!(w.confidence, 100);
        assert_eq!(w.leverage, 1);
    }

    #[test]
    fn terminal_states() {
        assert!(TripwireState::Expired.is_terminal());
        assert!(TripwireState::Mitigated.is_terminal());
        assert!(!TripwireState::Cooldown.is_terminal());
    }

    #[test]
    fn serializes_with_screaming_names() {
        let w = wire(dec!(100));
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"type\":\"LIQUIDATION\""));
        assert!(json.contains("\"state\":\"ARMED\""));
        assert!(json.contains("\"direction\":\"LONG\""));
    }
}
