// =============================================================================
// Config Registry — typed catalog, immutable snapshots, receipts, presets
// =============================================================================
//
// The registry owns the catalog of tunables. Readers never lock the catalog:
// they take an `Arc<ConfigSnapshot>` and hold it for the lifetime of a task;
// every accepted change publishes a new snapshot and a `ConfigChanged` event.
//
// Hot reload revalidates the full catalog; items that fail validation retain
// their prior effective value. Presets apply coordinated overrides
// atomically — all or none.
// =============================================================================

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{EngineEvent, EventBus};
use crate::config::item::{
    ConfigItem, ConfigValue, OverrideError, OverrideReceipt, Provenance, RiskDirection,
    SafetyTier, ValueSchema,
};
use crate::config::routing::RoutingConfig;

// =============================================================================
// Snapshot
// =============================================================================

/// An immutable, fully consistent view of the effective configuration.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: u64,
    values: BTreeMap<String, ConfigValue>,
    pub routing: RoutingConfig,
}

impl ConfigSnapshot {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(ConfigValue::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.f64(key).map(|v| v as i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(ConfigValue::as_bool)
    }

    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        self.values
            .get(key)
            .and_then(ConfigValue::as_list)
            .map(|l| l.to_vec())
    }
}

// =============================================================================
// Config file shape
// =============================================================================

/// On-disk layout of `~/.titan-scanner/config.json`. Tunables arrive as
/// nested sections (`{"detection": {"volume_window_ms": 100}}`) and are
/// flattened to dotted keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub execution: ExecutionBlock,
    #[serde(flatten)]
    pub sections: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionBlock {
    #[serde(default)]
    pub routing: Option<RoutingConfig>,
    #[serde(flatten)]
    pub tunables: HashMap<String, serde_json::Value>,
}

fn flatten_into(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, ConfigValue)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(&key, v, out);
            }
        }
        other => {
            if let Some(cv) = json_to_value(other) {
                out.push((prefix.to_string(), cv));
            }
        }
    }
}

fn json_to_value(v: &serde_json::Value) -> Option<ConfigValue> {
    match v {
        serde_json::Value::Bool(b) => Some(ConfigValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(ConfigValue::Int(i))
            } else {
                n.as_f64().map(ConfigValue::Float)
            }
        }
        serde_json::Value::String(s) => Some(ConfigValue::Str(s.clone())),
        serde_json::Value::Array(items) => {
            let strings: Option<Vec<String>> = items
                .iter()
                .map(|i| i.as_str().map(str::to_string))
                .collect();
            strings.map(ConfigValue::List)
        }
        _ => None,
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Inner {
    items: BTreeMap<String, ConfigItem>,
    routing: RoutingConfig,
    version: u64,
    snapshot: Arc<ConfigSnapshot>,
}

/// The typed catalog of tunables with safety tiers and change events.
pub struct ConfigRegistry {
    inner: RwLock<Inner>,
    bus: Arc<EventBus>,
    receipt_key: Vec<u8>,
}

impl ConfigRegistry {
    /// Build a registry holding the default catalog.
    pub fn new(bus: Arc<EventBus>, receipt_key: impl Into<Vec<u8>>) -> Self {
        let items: BTreeMap<String, ConfigItem> = default_catalog()
            .into_iter()
            .map(|item| (item.key.clone(), item))
            .collect();
        let routing = RoutingConfig::default();
        let snapshot = Arc::new(build_snapshot(1, &items, &routing));

        Self {
            inner: RwLock::new(Inner {
                items,
                routing,
                version: 1,
                snapshot,
            }),
            bus,
            receipt_key: receipt_key.into(),
        }
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.inner.read().snapshot.clone()
    }

    /// Look up a single catalog entry (copy).
    pub fn get(&self, key: &str) -> Option<ConfigItem> {
        self.inner.read().items.get(key).cloned()
    }

    /// Apply a runtime override. Validates schema and safety tier; on
    /// success mutates the effective value, publishes a new snapshot and a
    /// `ConfigChanged` event, and returns a sealed receipt.
    pub fn apply_override(
        &self,
        key: &str,
        next: ConfigValue,
        operator: &str,
        reason: &str,
    ) -> Result<OverrideReceipt, OverrideError> {
        let mut inner = self.inner.write();

        let item = inner
            .items
            .get(key)
            .ok_or_else(|| OverrideError::UnknownKey(key.to_string()))?;
        item.validate(&next)?;

        let prev = item.value.clone();
        let item = inner.items.get_mut(key).expect("validated above");
        item.value = next.clone();
        item.provenance = Provenance::Override;

        let receipt = OverrideReceipt {
            receipt_id: Uuid::new_v4().to_string(),
            key: key.to_string(),
            prev: prev.to_string(),
            next: next.to_string(),
            operator: operator.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            mac: String::new(),
        }
        .seal(&self.receipt_key);

        self.republish(&mut inner);
        drop(inner);

        info!(key, prev = %prev, next = %next, operator, "config override accepted");
        self.bus.publish(EngineEvent::ConfigChanged {
            key: key.to_string(),
            prev: prev.to_string(),
            next: next.to_string(),
        });

        Ok(receipt)
    }

    /// Apply environment overrides at startup: `TITAN_CONFIG_<KEY>` with
    /// `__` standing in for the dots, e.g. `TITAN_CONFIG_DETECTION__GHOST_MODE=true`.
    /// Values are schema-checked; unknown keys are logged and skipped.
    pub fn load_env(&self) -> usize {
        let mut applied = 0usize;
        let mut inner = self.inner.write();

        for (name, raw) in std::env::vars() {
            let Some(suffix) = name.strip_prefix("TITAN_CONFIG_") else {
                continue;
            };
            let key = suffix.to_lowercase().replace("__", ".");
            let Some(item) = inner.items.get_mut(&key) else {
                warn!(var = %name, key, "env override names no config item — ignored");
                continue;
            };

            let parsed = match &item.value {
                ConfigValue::Bool(_) => raw.parse::<bool>().ok().map(ConfigValue::Bool),
                ConfigValue::Int(_) => raw.parse::<i64>().ok().map(ConfigValue::Int),
                ConfigValue::Float(_) => raw.parse::<f64>().ok().map(ConfigValue::Float),
                ConfigValue::Str(_) => Some(ConfigValue::Str(raw.clone())),
                ConfigValue::List(_) => Some(ConfigValue::List(
                    raw.split(',').map(|s| s.trim().to_string()).collect(),
                )),
            };
            match parsed {
                Some(value) => {
                    item.value = value;
                    item.provenance = Provenance::Env;
                    applied += 1;
                }
                None => warn!(var = %name, "env override failed to parse — ignored"),
            }
        }

        if applied > 0 {
            self.republish(&mut inner);
            info!(applied, "environment config overrides applied");
        }
        applied
    }

    /// Load a config file at startup. Values are schema-checked only (safety
    /// tiers govern runtime changes); unknown keys are logged and skipped.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        let mut flat = Vec::new();
        for (section, value) in &file.sections {
            flatten_into(section, value, &mut flat);
        }
        for (key, value) in &file.execution.tunables {
            flatten_into(&format!("execution.{key}"), value, &mut flat);
        }

        let mut inner = self.inner.write();
        if let Some(routing) = file.execution.routing.clone() {
            inner.routing = routing;
        }

        let mut applied = 0usize;
        for (key, value) in flat {
            match inner.items.get_mut(&key) {
                Some(item) => {
                    if item.value.same_shape(&value) {
                        item.value = value;
                        item.provenance = Provenance::Override;
                        applied += 1;
                    } else {
                        warn!(key, "config file value has wrong type — ignored");
                    }
                }
                None => warn!(key, "unknown config key in file — ignored"),
            }
        }
        self.republish(&mut inner);
        drop(inner);

        if let Some(preset) = file.preset.as_deref() {
            self.apply_preset(preset)
                .map_err(|e| anyhow::anyhow!("preset '{preset}' failed: {e}"))?;
        }

        info!(path = %path.display(), applied, "config file loaded");
        Ok(())
    }

    /// Hot reload: revalidate the full catalog against the file. Items that
    /// fail schema or tier validation retain their prior effective value.
    pub fn hot_reload(&self, path: impl AsRef<Path>) -> Result<ReloadReport> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        let mut flat = Vec::new();
        for (section, value) in &file.sections {
            flatten_into(section, value, &mut flat);
        }
        for (key, value) in &file.execution.tunables {
            flatten_into(&format!("execution.{key}"), value, &mut flat);
        }

        let mut report = ReloadReport::default();
        let mut changes: Vec<(String, String, String)> = Vec::new();

        {
            let mut inner = self.inner.write();
            if let Some(routing) = file.execution.routing.clone() {
                inner.routing = routing;
            }

            for (key, value) in flat {
                let Some(item) = inner.items.get(&key) else {
                    report.unknown += 1;
                    continue;
                };
                if item.value == value {
                    continue;
                }
                match item.validate(&value) {
                    Ok(()) => {
                        let prev = item.value.to_string();
                        let item = inner.items.get_mut(&key).expect("present");
                        item.value = value.clone();
                        item.provenance = Provenance::Override;
                        changes.push((key, prev, value.to_string()));
                        report.applied += 1;
                    }
                    Err(e) => {
                        warn!(key, error = %e, "hot reload change rejected — prior value kept");
                        report.rejected += 1;
                    }
                }
            }
            self.republish(&mut inner);
        }

        for (key, prev, next) in changes {
            self.bus
                .publish(EngineEvent::ConfigChanged { key, prev, next });
        }

        info!(
            applied = report.applied,
            rejected = report.rejected,
            unknown = report.unknown,
            "config hot reload complete"
        );
        Ok(report)
    }

    /// Apply a named preset atomically: every override is validated against
    /// the current catalog first; if any fails, nothing changes.
    pub fn apply_preset(&self, name: &str) -> Result<Vec<OverrideReceipt>, OverrideError> {
        let overrides = preset_overrides(name)
            .ok_or_else(|| OverrideError::UnknownKey(format!("preset:{name}")))?;

        {
            let inner = self.inner.read();
            for (key, value) in &overrides {
                let item = inner
                    .items
                    .get(key.as_str())
                    .ok_or_else(|| OverrideError::UnknownKey(key.clone()))?;
                item.validate(value)?;
            }
        }

        // All validated against the pre-preset state; commit in order.
        let mut receipts = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            let receipt =
                self.apply_override(&key, value, "preset", &format!("preset {name}"))?;
            receipts.push(receipt);
        }
        info!(preset = name, count = receipts.len(), "preset applied");
        Ok(receipts)
    }

    /// Verify a receipt against this registry's MAC key.
    pub fn verify_receipt(&self, receipt: &OverrideReceipt) -> bool {
        receipt.verify(&self.receipt_key)
    }

    fn republish(&self, inner: &mut Inner) {
        inner.version += 1;
        inner.snapshot = Arc::new(build_snapshot(inner.version, &inner.items, &inner.routing));
    }
}

/// Outcome of a hot reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub applied: usize,
    pub rejected: usize,
    pub unknown: usize,
}

fn build_snapshot(
    version: u64,
    items: &BTreeMap<String, ConfigItem>,
    routing: &RoutingConfig,
) -> ConfigSnapshot {
    ConfigSnapshot {
        version,
        values: items
            .iter()
            .map(|(k, item)| (k.clone(), item.value.clone()))
            .collect(),
        routing: routing.clone(),
    }
}

// =============================================================================
// Default catalog
// =============================================================================

fn default_catalog() -> Vec<ConfigItem> {
    use ConfigValue::{Bool, Float, Int, List};
    use RiskDirection::{SaferIsHigher, SaferIsLower};
    use SafetyTier::{AppendOnly, Immutable, RaiseOnly, TightenOnly, Tunable};

    let item = ConfigItem::new;

    vec![
        // ── Detection ───────────────────────────────────────────────────
        item(
            "detection.proximity_pct",
            Float(0.001),
            ValueSchema::range(0.0001, 0.01),
            Immutable,
            SaferIsLower,
        ),
        item(
            "detection.volume_window_ms",
            Int(100),
            ValueSchema::range(10.0, 1000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "detection.min_trades_in_window",
            Int(50),
            ValueSchema::range(1.0, 10_000.0),
            TightenOnly,
            SaferIsHigher,
        ),
        item(
            "detection.cvd_window_ms",
            Int(5_000),
            ValueSchema::range(500.0, 60_000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "detection.strong_trend_adx_threshold",
            Float(25.0),
            ValueSchema::range(10.0, 60.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "detection.acceleration_veto_threshold",
            Float(1.5),
            ValueSchema::range(0.1, 10.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "detection.max_attempts",
            Int(5),
            ValueSchema::range(1.0, 100.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "detection.cooldown_ms",
            Int(300_000),
            ValueSchema::at_least(1_000.0),
            RaiseOnly,
            SaferIsHigher,
        ),
        item(
            "detection.ghost_mode",
            Bool(false),
            ValueSchema::default(),
            Tunable,
            SaferIsLower,
        ),
        item(
            "detection.global_halt",
            Bool(false),
            ValueSchema::default(),
            Tunable,
            SaferIsLower,
        ),
        // ── Tripwire pre-computation ────────────────────────────────────
        item(
            "tripwire.update_interval_ms",
            Int(60_000),
            ValueSchema::range(5_000.0, 600_000.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "tripwire.top_n",
            Int(20),
            ValueSchema::range(1.0, 100.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "tripwire.max_age_hours",
            Int(24),
            ValueSchema::range(1.0, 168.0),
            Immutable,
            SaferIsLower,
        ),
        item(
            "tripwire.score_w_volume",
            Float(0.4),
            ValueSchema::range(0.0, 1.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "tripwire.score_w_confidence",
            Float(0.4),
            ValueSchema::range(0.0, 1.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "tripwire.score_w_cluster",
            Float(0.2),
            ValueSchema::range(0.0, 1.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "tripwire.volume_std_threshold",
            Float(2.0),
            ValueSchema::range(0.5, 5.0),
            Tunable,
            SaferIsHigher,
        ),
        // ── Execution ───────────────────────────────────────────────────
        item(
            "execution.master_arm",
            Bool(false),
            ValueSchema::default(),
            Tunable,
            SaferIsLower,
        ),
        item(
            "execution.circuit_breaker",
            Bool(false),
            ValueSchema::default(),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "execution.intent_ttl_ms",
            Int(5_000),
            ValueSchema::range(100.0, 60_000.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "execution.venue_timeout_ms",
            Int(2_000),
            ValueSchema::range(100.0, 30_000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "execution.lot_size",
            Float(0.01),
            ValueSchema::range(0.000_001, 1_000.0),
            Tunable,
            SaferIsLower,
        ),
        // ── Risk ────────────────────────────────────────────────────────
        item(
            "risk.max_delta",
            Float(0.20),
            ValueSchema::range(0.01, 1.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "risk.critical_delta",
            Float(0.35),
            ValueSchema::range(0.01, 2.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "risk.daily_drawdown_limit",
            Float(0.05),
            ValueSchema::range(0.001, 0.5),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "risk.critical_drawdown",
            Float(0.10),
            ValueSchema::range(0.001, 0.9),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "risk.max_leverage",
            Int(20),
            ValueSchema::range(1.0, 100.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "risk.high_vol_threshold",
            Float(70.0),
            ValueSchema::range(0.0, 100.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "risk.low_liq_threshold",
            Float(30.0),
            ValueSchema::range(0.0, 100.0),
            Tunable,
            SaferIsHigher,
        ),
        // ── Rebalancer ──────────────────────────────────────────────────
        item(
            "rebalance.low_watermark",
            Float(0.60),
            ValueSchema::range(0.1, 0.95),
            Tunable,
            SaferIsLower,
        ),
        item(
            "rebalance.deep_watermark",
            Float(0.80),
            ValueSchema::range(0.1, 0.99),
            Tunable,
            SaferIsLower,
        ),
        item(
            "rebalance.target_margin",
            Float(0.40),
            ValueSchema::range(0.05, 0.9),
            Tunable,
            SaferIsLower,
        ),
        item(
            "rebalance.compound_nav_growth",
            Float(0.25),
            ValueSchema::range(0.01, 10.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "rebalance.hard_compound_nav_growth",
            Float(1.0),
            ValueSchema::range(0.1, 50.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "rebalance.delta_tolerance",
            Float(0.02),
            ValueSchema::range(0.001, 0.5),
            Tunable,
            SaferIsLower,
        ),
        item(
            "rebalance.interval_ms",
            Int(30_000),
            ValueSchema::range(1_000.0, 600_000.0),
            Tunable,
            SaferIsHigher,
        ),
        // ── TWAP ────────────────────────────────────────────────────────
        item(
            "twap.max_clip_size",
            Float(300.0),
            ValueSchema::range(0.000_001, 1_000_000.0),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "twap.min_interval_ms",
            Int(1_000),
            ValueSchema::range(100.0, 60_000.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "twap.max_interval_ms",
            Int(10_000),
            ValueSchema::range(100.0, 600_000.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "twap.max_slippage_pct",
            Float(0.002),
            ValueSchema::range(0.000_01, 0.1),
            TightenOnly,
            SaferIsLower,
        ),
        item(
            "twap.duration_ms",
            Int(30_000),
            ValueSchema::range(1_000.0, 3_600_000.0),
            Tunable,
            SaferIsHigher,
        ),
        // ── Signed-intent fast path ─────────────────────────────────────
        item(
            "ipc.message_timeout_ms",
            Int(500),
            ValueSchema::range(50.0, 10_000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "ipc.connect_timeout_ms",
            Int(2_000),
            ValueSchema::range(100.0, 30_000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "ipc.base_delay_ms",
            Int(250),
            ValueSchema::range(10.0, 10_000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "ipc.max_delay_ms",
            Int(8_000),
            ValueSchema::range(100.0, 120_000.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "ipc.max_attempts",
            Int(10),
            ValueSchema::range(1.0, 100.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "ipc.clock_skew_ms",
            Int(5_000),
            ValueSchema::range(100.0, 60_000.0),
            TightenOnly,
            SaferIsLower,
        ),
        // ── Feeds / portfolio / audit ───────────────────────────────────
        item(
            "feed.queue_capacity",
            Int(1_024),
            ValueSchema::range(64.0, 65_536.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "portfolio.flat_idle_minutes",
            Int(30),
            ValueSchema::range(1.0, 1_440.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "audit.rotate_bytes",
            Int(10 * 1024 * 1024),
            ValueSchema::range(1_024.0, 1_073_741_824.0),
            Tunable,
            SaferIsLower,
        ),
        item(
            "audit.compress_after_days",
            Int(30),
            ValueSchema::range(1.0, 365.0),
            Tunable,
            SaferIsHigher,
        ),
        item(
            "symbols.universe",
            List(vec![
                "BTCUSDT".into(),
                "ETHUSDT".into(),
                "SOLUSDT".into(),
                "BNBUSDT".into(),
                "XRPUSDT".into(),
            ]),
            ValueSchema::default(),
            AppendOnly,
            SaferIsLower,
        ),
    ]
}

/// Coordinated overrides for the named preset, or `None` if unknown.
fn preset_overrides(name: &str) -> Option<Vec<(String, ConfigValue)>> {
    use ConfigValue::{Float, Int};

    let set = |pairs: &[(&str, ConfigValue)]| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    };

    match name {
        "conservative" => Some(set(&[
            ("detection.min_trades_in_window", Int(80)),
            ("detection.cooldown_ms", Int(600_000)),
            ("risk.max_delta", Float(0.10)),
            ("risk.max_leverage", Int(10)),
            ("twap.max_slippage_pct", Float(0.001)),
        ])),
        "balanced" => Some(set(&[
            ("detection.volume_window_ms", Int(100)),
            ("detection.strong_trend_adx_threshold", Float(25.0)),
            ("tripwire.update_interval_ms", Int(60_000)),
        ])),
        "aggressive" => Some(set(&[
            ("detection.volume_window_ms", Int(150)),
            ("detection.strong_trend_adx_threshold", Float(30.0)),
            ("detection.acceleration_veto_threshold", Float(2.5)),
            ("tripwire.update_interval_ms", Int(30_000)),
        ])),
        _ => None,
    }
}
