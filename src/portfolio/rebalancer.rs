// =============================================================================
// Rebalancer — tiered margin top-ups and profit compounding
// =============================================================================
//
// At most one action per cycle, margin safety first:
//   TIER2 top-up   margin utilization crossed the deep watermark
//   TIER1 top-up   margin utilization crossed the low watermark
//   HARD_COMPOUND  NAV growth above the extreme threshold
//   COMPOUND       NAV growth above the threshold with near-zero delta
//
// Applying no action is the identity on state. Transfer failures log and
// abort the cycle without retry; the next cycle re-evaluates from current
// state.
// =============================================================================

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ConfigSnapshot;
use crate::portfolio::tracker::HealthReport;

/// Tunables sampled from the `rebalance.*` config items.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceConfig {
    pub low_watermark: Decimal,
    pub deep_watermark: Decimal,
    pub target_margin: Decimal,
    pub compound_nav_growth: Decimal,
    pub hard_compound_nav_growth: Decimal,
    pub delta_tolerance: Decimal,
}

impl RebalanceConfig {
    pub fn from_snapshot(snap: &ConfigSnapshot) -> Self {
        let d = |key: &str, default: f64| {
            Decimal::try_from(snap.f64(key).unwrap_or(default)).unwrap_or(Decimal::ZERO)
        };
        Self {
            low_watermark: d("rebalance.low_watermark", 0.60),
            deep_watermark: d("rebalance.deep_watermark", 0.80),
            target_margin: d("rebalance.target_margin", 0.40),
            compound_nav_growth: d("rebalance.compound_nav_growth", 0.25),
            hard_compound_nav_growth: d("rebalance.hard_compound_nav_growth", 1.0),
            delta_tolerance: d("rebalance.delta_tolerance", 0.02),
        }
    }
}

/// The single action a cycle may dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceAction {
    Tier1TopUp { amount: Decimal },
    Tier2TopUp { amount: Decimal },
    Compound { amount: Decimal },
    HardCompound { amount: Decimal },
}

impl RebalanceAction {
    pub fn amount(&self) -> Decimal {
        match self {
            Self::Tier1TopUp { amount }
            | Self::Tier2TopUp { amount }
            | Self::Compound { amount }
            | Self::HardCompound { amount } => *amount,
        }
    }
}

/// Maps health state to a tiered action. Holds only the NAV baseline used
/// for growth measurement.
pub struct Rebalancer {
    cfg: RebalanceConfig,
    baseline_nav: RwLock<Decimal>,
}

impl Rebalancer {
    pub fn new(cfg: RebalanceConfig, baseline_nav: Decimal) -> Self {
        Self {
            cfg,
            baseline_nav: RwLock::new(baseline_nav),
        }
    }

    pub fn baseline_nav(&self) -> Decimal {
        *self.baseline_nav.read()
    }

    /// Decide this cycle's action, margin tiers first. Deciding is pure:
    /// state only changes when a compound completes.
    pub fn decide(
        &self,
        report: &HealthReport,
        margin_used: Decimal,
        margin_total: Decimal,
    ) -> Option<RebalanceAction> {
        let util = report.margin_utilization;

        if util >= self.cfg.deep_watermark {
            let amount = top_up_amount(margin_used, margin_total, self.cfg.target_margin);
            info!(util = %util, amount = %amount, "deep margin watermark crossed");
            return Some(RebalanceAction::Tier2TopUp { amount });
        }
        if util >= self.cfg.low_watermark {
            let amount = top_up_amount(margin_used, margin_total, self.cfg.target_margin);
            info!(util = %util, amount = %amount, "low margin watermark crossed");
            return Some(RebalanceAction::Tier1TopUp { amount });
        }

        let baseline = *self.baseline_nav.read();
        if baseline <= Decimal::ZERO {
            return None;
        }
        let growth = (report.nav - baseline) / baseline;
        let profit = report.nav - baseline;

        if growth >= self.cfg.hard_compound_nav_growth {
            return Some(RebalanceAction::HardCompound { amount: profit });
        }

        let delta_ratio = if report.nav.is_zero() {
            Decimal::ZERO
        } else {
            (report.delta / report.nav).abs()
        };
        if growth >= self.cfg.compound_nav_growth && delta_ratio <= self.cfg.delta_tolerance {
            return Some(RebalanceAction::Compound { amount: profit });
        }

        None
    }

    /// Called after a compound transfer settles; the baseline resets so the
    /// next growth measurement starts from here.
    pub fn compound_settled(&self, nav: Decimal) {
        *self.baseline_nav.write() = nav;
        info!(baseline = %nav, "compound settled — NAV baseline reset");
    }

    /// Called when the transfer executor failed the action. The cycle
    /// aborts without retry; state is untouched.
    pub fn transfer_failed(&self, action: &RebalanceAction, reason: &str) {
        warn!(action = ?action, reason, "rebalance transfer failed — cycle aborted");
    }
}

/// Amount that restores `target` utilization: grow total margin until
/// used / (total + amount) = target.
fn top_up_amount(used: Decimal, total: Decimal, target: Decimal) -> Decimal {
    if target <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let needed_total = used / target;
    (needed_total - total).max(Decimal::ZERO)
}
