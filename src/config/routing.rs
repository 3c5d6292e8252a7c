// =============================================================================
// Routing Config — venue fan-out rules for the execution router
// =============================================================================
//
// Nested structure lives here as a typed block rather than in the scalar
// item catalog. The router resolves venues in this order: explicit intent
// venue, then a per-source rule, then the default mapping.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{PhaseId, VenueId};

/// A fan-out rule: whether to split, and the raw (un-normalized) weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub fanout: bool,
    /// Venue → weight. Weights are normalized at split time.
    #[serde(default)]
    pub weights: BTreeMap<VenueId, f64>,
}

impl RouteRule {
    pub fn single(venue: VenueId) -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(venue, 1.0);
        Self {
            fanout: false,
            weights,
        }
    }

    pub fn split(pairs: &[(VenueId, f64)]) -> Self {
        Self {
            fanout: true,
            weights: pairs.iter().copied().collect(),
        }
    }

    /// A rule is usable when it names at least one venue with positive weight.
    pub fn is_valid(&self) -> bool {
        self.weights.values().any(|w| *w > 0.0)
    }
}

/// The `execution.routing` block of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Fallback rule when no per-source rule matches.
    #[serde(default)]
    pub fanout: bool,
    #[serde(default)]
    pub weights: BTreeMap<VenueId, f64>,
    /// Source (phase) name → rule.
    #[serde(default)]
    pub per_source: BTreeMap<String, RouteRule>,
}

impl Default for RoutingConfig {
    /// Default source mapping: scavenger fans out 50/50 to bybit+mexc,
    /// hunter and sentinel route to binance.
    fn default() -> Self {
        let mut per_source = BTreeMap::new();
        per_source.insert(
            PhaseId::Scavenger.as_str().to_string(),
            RouteRule::split(&[(VenueId::Bybit, 0.5), (VenueId::Mexc, 0.5)]),
        );
        per_source.insert(
            PhaseId::Hunter.as_str().to_string(),
            RouteRule::single(VenueId::Binance),
        );
        per_source.insert(
            PhaseId::Sentinel.as_str().to_string(),
            RouteRule::single(VenueId::Binance),
        );

        Self {
            fanout: false,
            weights: BTreeMap::from([(VenueId::Binance, 1.0)]),
            per_source,
        }
    }
}

impl RoutingConfig {
    /// Rule for `source`, falling back to the top-level default.
    pub fn rule_for(&self, source: &str) -> RouteRule {
        if let Some(rule) = self.per_source.get(source) {
            if rule.is_valid() {
                return rule.clone();
            }
        }
        RouteRule {
            fanout: self.fanout,
            weights: self.weights.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_matches_phases() {
        let routing = RoutingConfig::default();

        let scav = routing.rule_for("scavenger");
        assert!(scav.fanout);
        assert_eq!(scav.weights.len(), 2);
        assert!(scav.weights.contains_key(&VenueId::Bybit));
        assert!(scav.weights.contains_key(&VenueId::Mexc));

        let hunter = routing.rule_for("hunter");
        assert!(!hunter.fanout);
        assert_eq!(hunter.weights.keys().next(), Some(&VenueId::Binance));
    }

    #[test]
    fn unknown_source_uses_fallback() {
        let routing = RoutingConfig::default();
        let rule = routing.rule_for("mystery");
        assert_eq!(rule.weights.keys().next(), Some(&VenueId::Binance));
    }

    #[test]
    fn deserializes_from_config_block() {
        let json = r#"{
            "fanout": false,
            "weights": {"binance": 1.0},
            "per_source": {
                "scavenger": {"fanout": true, "weights": {"bybit": 2.0, "mexc": 1.0}}
            }
        }"#;
        let routing: RoutingConfig = serde_json::from_str(json).unwrap();
        let rule = routing.rule_for("scavenger");
        assert!(rule.fanout);
        assert_eq!(rule.weights[&VenueId::Bybit], 2.0);
    }
}
