// =============================================================================
// Config Items — typed values, schemas, safety tiers, override receipts
// =============================================================================
//
// Every tunable in the engine is a `ConfigItem` with a schema and a safety
// tier. Runtime overrides are validated against BOTH before they touch the
// effective value; accepted overrides produce an HMAC-sealed receipt.
// =============================================================================

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// A configuration value. Scalars plus string lists — nested structure lives
/// in dedicated typed blocks (e.g. routing), not in the item catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }

    /// Numeric view for range checks and tier comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Two values are schema-compatible when they are the same shape
    /// (int and float interchange freely).
    pub fn same_shape(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Bool(_), Self::Bool(_))
                | (Self::Int(_), Self::Int(_))
                | (Self::Float(_), Self::Float(_))
                | (Self::Int(_), Self::Float(_))
                | (Self::Float(_), Self::Int(_))
                | (Self::Str(_), Self::Str(_))
                | (Self::List(_), Self::List(_))
        )
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::List(v) => write!(f, "[{}]", v.join(",")),
        }
    }
}

/// Numeric bounds applied to int/float items. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ValueSchema {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueSchema {
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }
}

/// How an item may be changed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// Never changes at runtime.
    Immutable,
    /// Only moves in the safer direction per `risk_direction`.
    TightenOnly,
    /// Only increases.
    RaiseOnly,
    /// List items may be added, never removed.
    AppendOnly,
    /// Any schema-valid value.
    Tunable,
}

/// Which numeric direction is safer for a tighten-only item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDirection {
    SaferIsLower,
    SaferIsHigher,
}

/// Where the current effective value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Default,
    Env,
    Override,
}

/// A single catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub key: String,
    pub value: ConfigValue,
    pub default: ConfigValue,
    pub schema: ValueSchema,
    pub safety_tier: SafetyTier,
    pub risk_direction: RiskDirection,
    pub provenance: Provenance,
}

/// Why an override was refused. Validation errors never self-repair.
#[derive(Debug, Error, PartialEq)]
pub enum OverrideError {
    #[error("item '{0}' is immutable")]
    Immutable(String),
    #[error("type mismatch for '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("value {value} for '{key}' outside [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("'{0}' is tighten-only and the new value does not tighten")]
    DoesNotTighten(String),
    #[error("'{0}' is raise-only and the new value does not raise")]
    DoesNotRaise(String),
    #[error("'{key}' is append-only; removal of '{removed}' refused")]
    RemovalForbidden { key: String, removed: String },
    #[error("unknown config key '{0}'")]
    UnknownKey(String),
}

impl ConfigItem {
    pub fn new(
        key: &str,
        default: ConfigValue,
        schema: ValueSchema,
        safety_tier: SafetyTier,
        risk_direction: RiskDirection,
    ) -> Self {
        Self {
            key: key.to_string(),
            value: default.clone(),
            default,
            schema,
            safety_tier,
            risk_direction,
            provenance: Provenance::Default,
        }
    }

    /// Validate `next` against the schema and the safety tier without
    /// mutating anything. Returns the error that `apply` would return.
    pub fn validate(&self, next: &ConfigValue) -> Result<(), OverrideError> {
        // Schema: shape first, then numeric bounds.
        if !self.value.same_shape(next) {
            return Err(OverrideError::TypeMismatch {
                key: self.key.clone(),
                expected: self.value.type_name(),
                got: next.type_name(),
            });
        }
        if let Some(v) = next.as_f64() {
            let min = self.schema.min.unwrap_or(f64::NEG_INFINITY);
            let max = self.schema.max.unwrap_or(f64::INFINITY);
            if v < min || v > max {
                return Err(OverrideError::OutOfRange {
                    key: self.key.clone(),
                    value: v,
                    min,
                    max,
                });
            }
        }

        // Safety tier.
        match self.safety_tier {
            SafetyTier::Immutable => return Err(OverrideError::Immutable(self.key.clone())),
            SafetyTier::Tunable => {}
            SafetyTier::TightenOnly => {
                let (prev, nxt) = match (self.value.as_f64(), next.as_f64()) {
                    (Some(p), Some(n)) => (p, n),
                    _ => return Err(OverrideError::DoesNotTighten(self.key.clone())),
                };
                let tightens = match self.risk_direction {
                    RiskDirection::SaferIsLower => nxt < prev,
                    RiskDirection::SaferIsHigher => nxt > prev,
                };
                if !tightens {
                    return Err(OverrideError::DoesNotTighten(self.key.clone()));
                }
            }
            SafetyTier::RaiseOnly => {
                let raises = matches!(
                    (self.value.as_f64(), next.as_f64()),
                    (Some(p), Some(n)) if n > p
                );
                if !raises {
                    return Err(OverrideError::DoesNotRaise(self.key.clone()));
                }
            }
            SafetyTier::AppendOnly => {
                let prev = self.value.as_list().unwrap_or_default();
                let nxt = next.as_list().unwrap_or_default();
                if let Some(removed) = prev.iter().find(|p| !nxt.iter().any(|n| n == *p)) {
                    return Err(OverrideError::RemovalForbidden {
                        key: self.key.clone(),
                        removed: removed.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Override receipts
// =============================================================================

/// Audit record sealed over every accepted override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideReceipt {
    pub receipt_id: String,
    pub key: String,
    pub prev: String,
    pub next: String,
    pub operator: String,
    pub reason: String,
    pub timestamp: i64,
    pub mac: String,
}

impl OverrideReceipt {
    /// The canonical body the MAC covers: fields in fixed order, pipe-joined.
    fn canonical_body(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.receipt_id, self.key, self.prev, self.next, self.operator, self.reason,
            self.timestamp
        )
    }

    /// Seal the receipt with HMAC-SHA256 over the canonical body.
    pub fn seal(mut self, mac_key: &[u8]) -> Self {
        let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC accepts any key size");
        mac.update(self.canonical_body().as_bytes());
        self.mac = hex::encode(mac.finalize().into_bytes());
        self
    }

    /// Verify the seal against `mac_key`.
    pub fn verify(&self, mac_key: &[u8]) -> bool {
        let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC accepts any key size");
        mac.update(self.canonical_body().as_bytes());
        mac.verify_slice(&match hex::decode(&self.mac) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        })
        .is_ok()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn item(tier: SafetyTier, direction: RiskDirection, value: ConfigValue) -> ConfigItem {
        ConfigItem::new("test.key", value, ValueSchema::range(0.0, 100.0), tier, direction)
    }

    #[test]
    fn tighten_only_safer_is_lower() {
        let it = item(
            SafetyTier::TightenOnly,
            RiskDirection::SaferIsLower,
            ConfigValue::Int(20),
        );
        // 20 -> 30 is a loosening: rejected.
        assert_eq!(
            it.validate(&ConfigValue::Int(30)),
            Err(OverrideError::DoesNotTighten("test.key".into()))
        );
        // 20 -> 10 tightens: accepted.
        assert!(it.validate(&ConfigValue::Int(10)).is_ok());
        // Equal does not move in the safer direction.
        assert!(it.validate(&ConfigValue::Int(20)).is_err());
    }

    #[test]
    fn tighten_only_safer_is_higher() {
        let it = item(
            SafetyTier::TightenOnly,
            RiskDirection::SaferIsHigher,
            ConfigValue::Int(50),
        );
        assert!(it.validate(&ConfigValue::Int(60)).is_ok());
        assert!(it.validate(&ConfigValue::Int(40)).is_err());
    }

    #[test]
    fn immutable_rejects_everything() {
        let it = item(
            SafetyTier::Immutable,
            RiskDirection::SaferIsLower,
            ConfigValue::Int(24),
        );
        assert_eq!(
            it.validate(&ConfigValue::Int(12)),
            Err(OverrideError::Immutable("test.key".into()))
        );
    }

    #[test]
    fn raise_only() {
        let it = item(
            SafetyTier::RaiseOnly,
            RiskDirection::SaferIsHigher,
            ConfigValue::Float(10.0),
        );
        assert!(it.validate(&ConfigValue::Float(11.0)).is_ok());
        assert!(it.validate(&ConfigValue::Float(9.0)).is_err());
        assert!(it.validate(&ConfigValue::Float(10.0)).is_err());
    }

    #[test]
    fn append_only_forbids_removal() {
        let it = ConfigItem::new(
            "symbols",
            ConfigValue::List(vec!["BTCUSDT".into(), "ETHUSDT".into()]),
            ValueSchema::default(),
            SafetyTier::AppendOnly,
            RiskDirection::SaferIsLower,
        );
        let grown = ConfigValue::List(vec![
            "BTCUSDT".into(),
            "ETHUSDT".into(),
            "SOLUSDT".into(),
        ]);
        assert!(it.validate(&grown).is_ok());

        let shrunk = ConfigValue::List(vec!["BTCUSDT".into()]);
        assert_eq!(
            it.validate(&shrunk),
            Err(OverrideError::RemovalForbidden {
                key: "symbols".into(),
                removed: "ETHUSDT".into()
            })
        );
    }

    #[test]
    fn schema_bounds_apply_before_tier() {
        let it = item(
            SafetyTier::Tunable,
            RiskDirection::SaferIsLower,
            ConfigValue::Int(20),
        );
        assert!(matches!(
            it.validate(&ConfigValue::Int(1000)),
            Err(OverrideError::OutOfRange { .. })
        ));
        assert!(matches!(
            it.validate(&ConfigValue::Str("x".into())),
            Err(OverrideError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn int_float_interchange() {
        let it = item(
            SafetyTier::Tunable,
            RiskDirection::SaferIsLower,
            ConfigValue::Float(1.5),
        );
        assert!(it.validate(&ConfigValue::Int(2)).is_ok());
    }

    #[test]
    fn receipt_seal_and_verify() {
        let receipt = OverrideReceipt {
            receipt_id: "r-1".into(),
            key: "risk.max_leverage".into(),
            prev: "20".into(),
            next: "10".into(),
            operator: "ops".into(),
            reason: "derisk".into(),
            timestamp: 1_700_000_000_000,
            mac: String::new(),
        }
        .seal(b"receipt-key");

        assert!(receipt.verify(b"receipt-key"));
        assert!(!receipt.verify(b"other-key"));

        let mut tampered = receipt.clone();
        tampered.next = "30".into();
        assert!(!tampered.verify(b"receipt-key"));
    }
}
