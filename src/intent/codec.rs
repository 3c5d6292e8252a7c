// =============================================================================
// Signed Intent Codec — newline-delimited JSON envelopes with HMAC-SHA256
// =============================================================================
//
// One JSON object per line. The MAC covers the canonical serialization of
// the envelope without its `mac` field: keys ascending at every level,
// nulls dropped, no whitespace. `mac` is the last field on the wire.
// =============================================================================

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::intent::types::SignalType;

type HmacSha256 = Hmac<Sha256>;

/// Default clock-skew tolerance the server enforces (±5 s).
pub const DEFAULT_CLOCK_SKEW_MS: i64 = 5_000;

/// A framed fast-path message. Field order puts `mac` last on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation_id: String,
    pub timestamp_ms: i64,
    pub signal_id: String,
    pub signal_type: SignalType,
    pub payload: Value,
    pub mac: String,
}

/// Codec-level failures. Authorization failures are terminal — never retried.
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("MAC mismatch")]
    BadMac,
    #[error("timestamp outside skew tolerance: delta {0} ms")]
    StaleTimestamp(i64),
}

impl Envelope {
    /// Build and seal an envelope.
    pub fn sealed(
        correlation_id: impl Into<String>,
        timestamp_ms: i64,
        signal_id: impl Into<String>,
        signal_type: SignalType,
        payload: Value,
        key: &[u8],
    ) -> Self {
        let mut envelope = Self {
            correlation_id: correlation_id.into(),
            timestamp_ms,
            signal_id: signal_id.into(),
            signal_type,
            payload,
            mac: String::new(),
        };
        envelope.mac = envelope.compute_mac(key);
        envelope
    }

    /// Canonical body the MAC covers (everything but `mac`).
    fn canonical_body(&self) -> String {
        let body = serde_json::json!({
            "correlation_id": self.correlation_id,
            "timestamp_ms": self.timestamp_ms,
            "signal_id": self.signal_id,
            "signal_type": self.signal_type,
            "payload": self.payload,
        });
        canonical(&body)
    }

    fn compute_mac(&self, key: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
        mac.update(self.canonical_body().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify the MAC and (optionally) the clock-skew bound.
    pub fn verify(&self, key: &[u8], now_ms: i64, skew_ms: i64) -> Result<(), WireError> {
        let expected = self.compute_mac(key);
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
        mac.update(self.canonical_body().as_bytes());
        let provided = hex::decode(&self.mac).map_err(|_| WireError::BadMac)?;
        if mac.verify_slice(&provided).is_err() {
            // Constant-time verify failed; `expected` is only for debugging.
            let _ = expected;
            return Err(WireError::BadMac);
        }

        if skew_ms > 0 {
            let delta = (now_ms - self.timestamp_ms).abs();
            if delta > skew_ms {
                return Err(WireError::StaleTimestamp(delta));
            }
        }
        Ok(())
    }

    /// One wire line (no trailing newline).
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        serde_json::from_str(line).map_err(|e| WireError::Malformed(e.to_string()))
    }
}

/// Canonical JSON: object keys ascending recursively, `null` members
/// dropped, arrays in order, no whitespace.
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.iter().filter(|(_, v)| !v.is_null()).map(|(k, _)| k).collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
