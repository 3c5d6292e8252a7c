// =============================================================================
// Portfolio Tracker — per-symbol spot/perp legs, weighted entries, NAV
// =============================================================================
//
// All sizing and PnL arithmetic is Decimal. Entries are size-weighted on
// additions; a leg that returns to zero resets its entry; a leg that flips
// through zero re-bases at the mark. Health reports are computed on demand
// and never persisted as a source of truth.
// =============================================================================

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// What kind of exposure a position currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Spot,
    Perp,
    Hedged,
    Flat,
}

/// Marks used to value a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkPrices {
    pub spot: Decimal,
    pub perp: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub spot_size: Decimal,
    pub perp_size: Decimal,
    pub spot_entry: Decimal,
    pub perp_entry: Decimal,
    pub entry_basis: Decimal,
    pub current_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees_paid: Decimal,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub last_update_ms: i64,
}

impl Position {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            spot_size: Decimal::ZERO,
            perp_size: Decimal::ZERO,
            spot_entry: Decimal::ZERO,
            perp_entry: Decimal::ZERO,
            entry_basis: Decimal::ZERO,
            current_basis: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            position_type: PositionType::Flat,
            last_update_ms: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.spot_size.is_zero() && self.perp_size.is_zero()
    }

    fn derive_type(&mut self) {
        self.position_type = match (self.spot_size.is_zero(), self.perp_size.is_zero()) {
            (true, true) => PositionType::Flat,
            (false, true) => PositionType::Spot,
            (true, false) => PositionType::Perp,
            (false, false) => PositionType::Hedged,
        };
    }
}

/// Overall health posture, worst-of across risk rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warn,
    Critical,
}

/// On-demand snapshot for the risk manager and operator surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub nav: Decimal,
    pub delta: Decimal,
    pub margin_utilization: Decimal,
    pub risk_status: HealthStatus,
    pub positions: Vec<Position>,
    pub alerts: Vec<String>,
}

/// Thread-safe owner of the symbol → position map.
pub struct PortfolioTracker {
    positions: RwLock<HashMap<String, Position>>,
    cash: RwLock<Decimal>,
    margin_used: RwLock<Decimal>,
    margin_total: RwLock<Decimal>,
}

impl PortfolioTracker {
    pub fn new(cash: Decimal) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            cash: RwLock::new(cash),
            margin_used: RwLock::new(Decimal::ZERO),
            margin_total: RwLock::new(Decimal::ZERO),
        }
    }

    /// Apply spot/perp size deltas at the given marks, charging `fee`.
    /// Returns the updated position.
    pub fn update_size(
        &self,
        symbol: &str,
        delta_spot: Decimal,
        delta_perp: Decimal,
        marks: MarkPrices,
        fee: Decimal,
        now_ms: i64,
    ) -> Position {
        let mut positions = self.positions.write();
        let position = positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol));

        let spot_entry = update_leg(
            &mut position.spot_size,
            position.spot_entry,
            delta_spot,
            marks.spot,
        );
        position.spot_entry = spot_entry;
        let perp_entry = update_leg(
            &mut position.perp_size,
            position.perp_entry,
            delta_perp,
            marks.perp,
        );
        position.perp_entry = perp_entry;

        if !position.spot_entry.is_zero() && !position.perp_entry.is_zero() {
            position.entry_basis =
                (position.perp_entry - position.spot_entry) / position.spot_entry;
        } else {
            position.entry_basis = Decimal::ZERO;
        }

        position.fees_paid += fee;
        position.last_update_ms = now_ms;
        position.derive_type();
        revalue(position, marks);

        debug!(
            symbol,
            spot = %position.spot_size,
            perp = %position.perp_size,
            pnl = %position.unrealized_pnl,
            "position updated"
        );
        position.clone()
    }

    /// Refresh valuation without changing sizes.
    pub fn mark(&self, symbol: &str, marks: MarkPrices, now_ms: i64) {
        let mut positions = self.positions.write();
        if let Some(position) = positions.get_mut(symbol) {
            revalue(position, marks);
            position.last_update_ms = now_ms;
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn set_cash(&self, cash: Decimal) {
        *self.cash.write() = cash;
    }

    pub fn cash(&self) -> Decimal {
        *self.cash.read()
    }

    pub fn set_margin(&self, used: Decimal, total: Decimal) {
        *self.margin_used.write() = used;
        *self.margin_total.write() = total;
    }

    /// Drop positions that have been flat for `idle_minutes`.
    pub fn prune_flat(&self, now_ms: i64, idle_minutes: i64) -> usize {
        let cutoff = now_ms - idle_minutes * 60_000;
        let mut positions = self.positions.write();
        let before = positions.len();
        positions.retain(|_, p| !(p.is_flat() && p.last_update_ms < cutoff));
        before - positions.len()
    }

    /// Build a health report with the caller-supplied posture.
    pub fn health_report(&self, risk_status: HealthStatus, alerts: Vec<String>) -> HealthReport {
        let positions: Vec<Position> = self.positions.read().values().cloned().collect();
        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let nav = *self.cash.read() + unrealized;
        let delta: Decimal = positions
            .iter()
            .map(|p| (p.spot_size + p.perp_size) * p.spot_entry)
            .sum();

        let used = *self.margin_used.read();
        let total = *self.margin_total.read();
        let margin_utilization = if total.is_zero() {
            Decimal::ZERO
        } else {
            used / total
        };

        HealthReport {
            nav,
            delta,
            margin_utilization,
            risk_status,
            positions,
            alerts,
        }
    }

    pub fn margin(&self) -> (Decimal, Decimal) {
        (*self.margin_used.read(), *self.margin_total.read())
    }
}

/// Apply a delta to one leg, returning the new entry price.
fn update_leg(size: &mut Decimal, entry: Decimal, delta: Decimal, mark: Decimal) -> Decimal {
    if delta.is_zero() {
        return entry;
    }
    let old_size = *size;
    let new_size = old_size + delta;
    *size = new_size;

    if new_size.is_zero() {
        // Full unwind resets the entry.
        return Decimal::ZERO;
    }
    let adding = old_size.is_zero() || (old_size.is_sign_positive() == delta.is_sign_positive());
    if adding {
        // Size-weighted average entry.
        return (old_size.abs() * entry + delta.abs() * mark) / new_size.abs();
    }
    if old_size.is_sign_positive() != new_size.is_sign_positive() {
        // Flipped through zero: the surviving exposure opened at the mark.
        return mark;
    }
    // Plain reduction keeps the entry.
    entry
}

fn revalue(position: &mut Position, marks: MarkPrices) {
    position.current_basis = if marks.spot.is_zero() {
        Decimal::ZERO
    } else {
        (marks.perp - marks.spot) / marks.spot
    };

    let spot_pnl = position.spot_size * (marks.spot - position.spot_entry);
    let perp_pnl = position.perp_size * (marks.perp - position.perp_entry);
    position.unrealized_pnl = spot_pnl + perp_pnl - position.fees_paid;
}
