// =============================================================================
// Detection Engine — the tripwire state machine, one transition per trade
// =============================================================================
//
//   ARMED ──(price within proximity)──▶ CANDIDATE
//   CANDIDATE ──(window count ≥ threshold, vetoes pass)──▶ ACTIVATED
//   CANDIDATE ──(window elapsed, threshold unmet)──▶ ARMED (counter reset)
//   CANDIDATE ──(any veto)──▶ ARMED (attempts++)
//   ACTIVATED ──(intent sent)──▶ FIRED
//   FIRED ──(cooldown scheduled)──▶ COOLDOWN
//   COOLDOWN ──(elapsed)──▶ ARMED
//   ARMED ──(age > 24 h or mitigated)──▶ EXPIRED / MITIGATED (terminal)
//
// `step` is a pure function over (tripwire, trade, config, market context):
// all effects are returned, never performed in place. Window arithmetic uses
// exchange timestamps exclusively.
// =============================================================================

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ConfigSnapshot;
use crate::tripwire::indicators::TrendReading;
use crate::tripwire::types::{Tripwire, TripwireState, VolumeCounter};
use crate::types::{Direction, Trade};

/// Detection tunables, sampled once per snapshot refresh.
#[derive(Debug, Clone, Copy)]
pub struct DetectionConfig {
    pub proximity_pct: f64,
    pub volume_window_ms: i64,
    pub min_trades_in_window: u32,
    pub cvd_window_ms: i64,
    pub strong_trend_adx_threshold: f64,
    pub acceleration_veto_threshold: f64,
    pub max_attempts: u32,
    pub cooldown_ms: i64,
    pub max_age_ms: i64,
    pub ghost_mode: bool,
    pub master_arm: bool,
    pub circuit_breaker: bool,
    pub global_halt: bool,
}

impl DetectionConfig {
    pub fn from_snapshot(snap: &ConfigSnapshot) -> Self {
        Self {
            proximity_pct: snap.f64("detection.proximity_pct").unwrap_or(0.001),
            volume_window_ms: snap.i64("detection.volume_window_ms").unwrap_or(100),
            min_trades_in_window: snap.i64("detection.min_trades_in_window").unwrap_or(50) as u32,
            cvd_window_ms: snap.i64("detection.cvd_window_ms").unwrap_or(5_000),
            strong_trend_adx_threshold: snap
                .f64("detection.strong_trend_adx_threshold")
                .unwrap_or(25.0),
            acceleration_veto_threshold: snap
                .f64("detection.acceleration_veto_threshold")
                .unwrap_or(1.5),
            max_attempts: snap.i64("detection.max_attempts").unwrap_or(5) as u32,
            cooldown_ms: snap.i64("detection.cooldown_ms").unwrap_or(300_000),
            max_age_ms: snap.i64("tripwire.max_age_hours").unwrap_or(24) * 3_600_000,
            ghost_mode: snap.bool("detection.ghost_mode").unwrap_or(false),
            master_arm: snap.bool("execution.master_arm").unwrap_or(false),
            circuit_breaker: snap.bool("execution.circuit_breaker").unwrap_or(false),
            global_halt: snap.bool("detection.global_halt").unwrap_or(false),
        }
    }
}

/// Why an activation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Veto {
    Cooldown,
    Acceleration,
    StrongTrend,
    CvdSign,
    MasterArm,
    CircuitBreaker,
    GlobalHalt,
    MissingData,
}

impl std::fmt::Display for Veto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cooldown => "cooldown",
            Self::Acceleration => "acceleration",
            Self::StrongTrend => "strong_trend",
            Self::CvdSign => "cvd_sign",
            Self::MasterArm => "master_arm",
            Self::CircuitBreaker => "circuit_breaker",
            Self::GlobalHalt => "global_halt",
            Self::MissingData => "missing_data",
        };
        write!(f, "{s}")
    }
}

/// Market state the vetoes read, sampled by the shard before each step.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketContext {
    /// Signed CVD over the trailing CVD window (quote units).
    pub cvd_delta: Decimal,
    /// Short-window price acceleration in %/s²; positive = upward.
    pub acceleration: f64,
    /// Trend reading from the candle series, when enough data exists.
    pub trend: Option<TrendReading>,
}

/// Everything a `step` can ask the owner to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The tripwire reached ACTIVATED; emit an intent (or a ghost record).
    Activated { ghost: bool },
    /// Candidate fell back to ARMED. `veto` is `None` on window expiry.
    Disarmed { veto: Option<Veto> },
    /// Terminal: too old or attempts exhausted.
    Expired,
    /// Terminal: the level was traded through without a valid activation.
    Mitigated,
}

/// How far beyond the trigger (relative) a move may run before the level is
/// considered mitigated.
const MITIGATION_DEPTH: f64 = 0.005;

/// Advance one tripwire by one trade. Pure; at most one state transition.
pub fn step(
    mut wire: Tripwire,
    trade: &Trade,
    cfg: &DetectionConfig,
    ctx: &MarketContext,
) -> (Tripwire, Vec<Effect>) {
    let now = trade.timestamp_ms;
    let mut effects = Vec::new();

    match wire.state {
        TripwireState::Armed => {
            if now.saturating_sub(wire.created_at_ms) > cfg.max_age_ms {
                wire.state = TripwireState::Expired;
                effects.push(Effect::Expired);
            } else if mitigated(&wire, trade.price) {
                wire.state = TripwireState::Mitigated;
                effects.push(Effect::Mitigated);
            } else if wire.price_matches(trade.price, cfg.proximity_pct) {
                wire.state = TripwireState::Candidate;
                wire.volume_counter = VolumeCounter {
                    start_ms: now,
                    count: 1,
                };
            }
        }

        TripwireState::Candidate => {
            if trade.price <= Decimal::ZERO {
                // Detection failure: veto but hold CANDIDATE.
                wire.attempts += 1;
                if wire.attempts > cfg.max_attempts {
                    wire.state = TripwireState::Expired;
                    effects.push(Effect::Expired);
                } else {
                    effects.push(Effect::Disarmed {
                        veto: Some(Veto::MissingData),
                    });
                }
                return (wire, effects);
            }

            let window_end = wire.volume_counter.start_ms + cfg.volume_window_ms;
            if now >= window_end {
                // Closed on start, open on end: a trade at exactly
                // start + window does not count.
                wire.state = TripwireState::Armed;
                wire.volume_counter = VolumeCounter::default();
                effects.push(Effect::Disarmed { veto: None });
            } else if wire.price_matches(trade.price, cfg.proximity_pct) {
                wire.volume_counter.count += 1;
                if wire.volume_counter.count >= cfg.min_trades_in_window {
                    match check_vetoes(&wire, cfg, ctx, now) {
                        Some(veto) => {
                            wire.attempts += 1;
                            if wire.attempts > cfg.max_attempts {
                                wire.state = TripwireState::Expired;
                                effects.push(Effect::Expired);
                            } else {
                                wire.state = TripwireState::Armed;
                                wire.volume_counter = VolumeCounter::default();
                                effects.push(Effect::Disarmed { veto: Some(veto) });
                            }
                        }
                        None => {
                            wire.state = TripwireState::Activated;
                            wire.activated_at_ms = now;
                            effects.push(Effect::Activated {
                                ghost: cfg.ghost_mode,
                            });
                        }
                    }
                }
            }
        }

        // The owner fires the intent synchronously after ACTIVATED, so a
        // trade seen here means the fire is still in flight. No transition.
        TripwireState::Activated => {}

        TripwireState::Fired => {
            wire.state = TripwireState::Cooldown;
        }

        TripwireState::Cooldown => {
            if now >= wire.cooldown_until_ms {
                wire.state = TripwireState::Armed;
                wire.volume_counter = VolumeCounter::default();
            }
        }

        TripwireState::Expired | TripwireState::Mitigated => {}
    }

    (wire, effects)
}

/// Mark an ACTIVATED tripwire as FIRED and schedule its cooldown. Called by
/// the owner once the intent has been handed to the fast path (or ghosted).
pub fn fire(mut wire: Tripwire, now_ms: i64, cfg: &DetectionConfig) -> Tripwire {
    debug_assert_eq!(wire.state, TripwireState::Activated);
    wire.state = TripwireState::Fired;
    wire.cooldown_until_ms = now_ms + cfg.cooldown_ms;
    wire
}

/// All veto checks, cheapest first. Ghost mode is not a veto.
fn check_vetoes(
    wire: &Tripwire,
    cfg: &DetectionConfig,
    ctx: &MarketContext,
    now_ms: i64,
) -> Option<Veto> {
    // Global gates.
    if !cfg.master_arm {
        return Some(Veto::MasterArm);
    }
    if cfg.circuit_breaker {
        return Some(Veto::CircuitBreaker);
    }
    if cfg.global_halt {
        return Some(Veto::GlobalHalt);
    }

    // Cooldown carried over from a prior fire.
    if now_ms < wire.cooldown_until_ms {
        return Some(Veto::Cooldown);
    }

    // Knife-catch: refuse to catch momentum accelerating against us.
    match wire.direction {
        Direction::Long if ctx.acceleration <= -cfg.acceleration_veto_threshold => {
            return Some(Veto::Acceleration);
        }
        Direction::Short if ctx.acceleration >= cfg.acceleration_veto_threshold => {
            return Some(Veto::Acceleration);
        }
        _ => {}
    }

    // Strong trend against the tripwire direction. With-trend is allowed.
    if let Some(trend) = ctx.trend {
        if trend.adx >= cfg.strong_trend_adx_threshold && trend.direction != wire.direction.sign()
        {
            return Some(Veto::StrongTrend);
        }
    }

    // Order flow must not contradict the direction.
    match wire.direction {
        Direction::Long if ctx.cvd_delta < Decimal::ZERO => return Some(Veto::CvdSign),
        Direction::Short if ctx.cvd_delta > Decimal::ZERO => return Some(Veto::CvdSign),
        _ => {}
    }

    None
}

/// A level is mitigated when price trades through it, beyond the arming
/// band, in the tripwire's own direction — the move happened without a
/// valid activation.
fn mitigated(wire: &Tripwire, price: Decimal) -> bool {
    let Some(depth) = Decimal::from_f64(MITIGATION_DEPTH) else {
        return false;
    };
    let trigger = wire.trigger_price;
    if trigger.is_zero() {
        return false;
    }
    match wire.direction {
        Direction::Long => price > trigger * (Decimal::ONE + depth),
        Direction::Short => price < trigger * (Decimal::ONE - depth),
    }
}

/// Relative distance helper for queue-matching: is `price` within the
/// arming band of `trigger`?
pub fn within_proximity(price: Decimal, trigger: Decimal, proximity_pct: f64) -> bool {
    if trigger.is_zero() {
        return false;
    }
    let band = trigger.to_f64().map(|t| t.abs() * proximity_pct).unwrap_or(0.0);
    let dist = (price - trigger).to_f64().map(f64::abs).unwrap_or(f64::MAX);
    dist <= band
}
