// =============================================================================
// Intent model — signals and the three-phase handshake payloads
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Direction, VenueId};

/// Entry band the executor may fill within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryZone {
    pub min: Decimal,
    pub max: Decimal,
}

/// A trading intent emitted on ACTIVATED and consumed exactly once by the
/// fast path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSignal {
    pub signal_id: String,
    /// Emitting phase ("scavenger", "hunter", "sentinel").
    pub source: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_zone: EntryZone,
    pub stop_loss: Decimal,
    pub take_profits: Vec<Decimal>,
    /// 0..100.
    pub confidence: u8,
    /// 1..100.
    pub leverage: u8,
    pub timestamp_ms: i64,
    /// Requested size; the executor may size the position itself when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Decimal>,
    /// Explicit venue override for the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<VenueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    /// Intra-shard ordering: monotonic per (shard_id).
    pub shard_id: u32,
    pub seq: u64,
}

impl IntentSignal {
    /// Schema validation the router's gate applies. Returns the first
    /// violation, never self-repairs.
    pub fn validate(&self) -> Result<(), String> {
        if self.signal_id.is_empty() {
            return Err("signal_id is empty".into());
        }
        if self.symbol.is_empty() {
            return Err("symbol is empty".into());
        }
        if self.entry_zone.min > self.entry_zone.max {
            return Err("entry_zone min exceeds max".into());
        }
        if self.entry_zone.min <= Decimal::ZERO {
            return Err("entry_zone must be positive".into());
        }
        if self.stop_loss <= Decimal::ZERO {
            return Err("stop_loss must be positive".into());
        }
        if self.confidence > 100 {
            return Err("confidence out of range".into());
        }
        if !(1..=100).contains(&self.leverage) {
            return Err("leverage out of range".into());
        }
        if let Some(size) = self.size {
            if size <= Decimal::ZERO {
                return Err("size must be positive".into());
            }
        }
        Ok(())
    }
}

/// Message kinds on the signed-intent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    #[serde(rename = "PREPARE")]
    Prepare,
    #[serde(rename = "CONFIRM")]
    Confirm,
    #[serde(rename = "ABORT")]
    Abort,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prepare => "PREPARE",
            Self::Confirm => "CONFIRM",
            Self::Abort => "ABORT",
        };
        write!(f, "{s}")
    }
}

/// `PREPARE(signal)` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub prepared: bool,
    pub signal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `CONFIRM(signal_id)` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `ABORT(signal_id)` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortResponse {
    pub aborted: bool,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_signal() -> IntentSignal {
        IntentSignal {
            signal_id: "sig-1".into(),
            source: "scavenger".into(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_zone: EntryZone {
                min: dec!(49950),
                max: dec!(50050),
            },
            stop_loss: dec!(49500),
            take_profits: vec![dec!(51500)],
            confidence: 95,
            leverage: 20,
            timestamp_ms: 1_700_000_000_000,
            size: Some(dec!(0.10)),
            venue: None,
            phase_id: Some("scavenger".into()),
            shard_id: 0,
            seq: 1,
        }
    }

    #[test]
    fn valid_signal_passes() {
        assert!(sample_signal().validate().is_ok());
    }

    #[test]
    fn schema_violations_caught() {
        let mut s = sample_signal();
        s.entry_zone.min = dec!(60000);
        assert!(s.validate().is_err());

        let mut s = sample_signal();
        s.leverage = 0;
        assert!(s.validate().is_err());

        let mut s = sample_signal();
        s.size = Some(dec!(-1));
        assert!(s.validate().is_err());

        let mut s = sample_signal();
        s.signal_id.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn serde_renames_match_wire_format() {
        let json = serde_json::to_string(&SignalType::Prepare).unwrap();
        assert_eq!(json, "\"PREPARE\"");
        let signal = sample_signal();
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("\"direction\":\"LONG\""));
        // Absent options stay off the wire.
        let mut bare = sample_signal();
        bare.size = None;
        bare.venue = None;
        bare.phase_id = None;
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("\"size\""));
        assert!(!json.contains("\"venue\""));
    }
}
