// =============================================================================
// Risk Manager — tiered limits with explicit violation tags
// =============================================================================
//
// Every rule is evaluated (order independent); the result carries all
// violations plus the worst posture. The leverage cap scales down under
// high volatility or thin liquidity, and the violation string names the
// factors that were applied.
// =============================================================================

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ConfigSnapshot;
use crate::portfolio::tracker::HealthStatus;

/// Limits sampled from the `risk.*` config items.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_delta: Decimal,
    pub critical_delta: Decimal,
    pub daily_drawdown_limit: Decimal,
    pub critical_drawdown: Decimal,
    pub max_leverage: f64,
    pub high_vol_threshold: f64,
    pub low_liq_threshold: f64,
}

impl RiskLimits {
    pub fn from_snapshot(snap: &ConfigSnapshot) -> Self {
        let d = |key: &str, default: f64| {
            Decimal::try_from(snap.f64(key).unwrap_or(default)).unwrap_or(Decimal::ZERO)
        };
        Self {
            max_delta: d("risk.max_delta", 0.20),
            critical_delta: d("risk.critical_delta", 0.35),
            daily_drawdown_limit: d("risk.daily_drawdown_limit", 0.05),
            critical_drawdown: d("risk.critical_drawdown", 0.10),
            max_leverage: snap.f64("risk.max_leverage").unwrap_or(20.0),
            high_vol_threshold: snap.f64("risk.high_vol_threshold").unwrap_or(70.0),
            low_liq_threshold: snap.f64("risk.low_liq_threshold").unwrap_or(30.0),
        }
    }
}

/// Inputs to one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub equity: Decimal,
    pub delta: Decimal,
    /// Rolling drawdown as a fraction of peak equity.
    pub drawdown: Decimal,
    /// 0..100.
    pub volatility_score: f64,
    /// 0..100.
    pub liquidity_score: f64,
    pub gross_notional: Decimal,
}

/// The verdict: all violations, plus derived ratios for the report.
#[derive(Debug, Clone, Serialize)]
pub struct RiskEvaluation {
    pub within_limits: bool,
    pub delta: Decimal,
    pub leverage: Decimal,
    pub drawdown: Decimal,
    pub violations: Vec<String>,
    pub status: HealthStatus,
}

/// Evaluate every rule against `inputs`.
pub fn evaluate(limits: &RiskLimits, inputs: &RiskInputs) -> RiskEvaluation {
    let mut violations = Vec::new();

    let delta_ratio = if inputs.equity.is_zero() {
        Decimal::ZERO
    } else {
        (inputs.delta / inputs.equity).abs()
    };
    if delta_ratio > limits.max_delta {
        violations.push("WARNING_DELTA".to_string());
    }
    if delta_ratio > limits.critical_delta {
        violations.push("CRITICAL_DELTA".to_string());
    }

    if inputs.drawdown > limits.daily_drawdown_limit {
        violations.push("WARNING_DRAWDOWN".to_string());
    }
    if inputs.drawdown > limits.critical_drawdown {
        violations.push("CRITICAL_DRAWDOWN".to_string());
    }

    // Leverage cap shrinks in hostile conditions.
    let vol_factor = if inputs.volatility_score > limits.high_vol_threshold {
        0.5
    } else {
        1.0
    };
    let liq_factor = if inputs.liquidity_score < limits.low_liq_threshold {
        0.5
    } else {
        1.0
    };
    let effective_cap = Decimal::try_from(limits.max_leverage * vol_factor * liq_factor)
        .unwrap_or(Decimal::ZERO);

    let leverage = if inputs.equity.is_zero() {
        Decimal::ZERO
    } else {
        inputs.gross_notional / inputs.equity
    };
    if leverage > effective_cap {
        violations.push(format!(
            "MAX_LEVERAGE(cap={effective_cap}, vol_factor={vol_factor}, liq_factor={liq_factor})"
        ));
    }

    let status = if violations.iter().any(|v| v.starts_with("CRITICAL_")) {
        HealthStatus::Critical
    } else if violations.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Warn
    };

    RiskEvaluation {
        within_limits: violations.is_empty(),
        delta: delta_ratio,
        leverage,
        drawdown: inputs.drawdown,
        violations,
        status,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_delta: dec!(0.20),
            critical_delta: dec!(0.35),
            daily_drawdown_limit: dec!(0.05),
            critical_drawdown: dec!(0.10),
            max_leverage: 20.0,
            high_vol_threshold: 70.0,
            low_liq_threshold: 30.0,
        }
    }

    fn calm_inputs() -> RiskInputs {
        RiskInputs {
            equity: dec!(10000),
            delta: dec!(500),
            drawdown: dec!(0.01),
            volatility_score: 40.0,
            liquidity_score: 80.0,
            gross_notional: dec!(50000),
        }
    }

    #[test]
    fn healthy_within_limits() {
        let eval = evaluate(&limits(), &calm_inputs());
        assert!(eval.within_limits);
        assert!(eval.violations.is_empty());
        assert_eq!(eval.status, HealthStatus::Healthy);
        assert_eq!(eval.leverage, dec!(5));
    }

    #[test]
    fn delta_tiers_stack() {
        let mut inputs = calm_inputs();
        inputs.delta = dec!(-2500); // |delta|/equity = 0.25
        let eval = evaluate(&limits(), &inputs);
        assert_eq!(eval.violations, vec!["WARNING_DELTA".to_string()]);
        assert_eq!(eval.status, HealthStatus::Warn);

        inputs.delta = dec!(4000); // 0.40: warning AND critical
        let eval = evaluate(&limits(), &inputs);
        assert!(eval.violations.contains(&"WARNING_DELTA".to_string()));
        assert!(eval.violations.contains(&"CRITICAL_DELTA".to_string()));
        assert_eq!(eval.status, HealthStatus::Critical);
    }

    #[test]
    fn drawdown_tiers() {
        let mut inputs = calm_inputs();
        inputs.drawdown = dec!(0.07);
        let eval = evaluate(&limits(), &inputs);
        assert_eq!(eval.violations, vec!["WARNING_DRAWDOWN".to_string()]);

        inputs.drawdown = dec!(0.12);
        let eval = evaluate(&limits(), &inputs);
        assert_eq!(eval.status, HealthStatus::Critical);
    }

    #[test]
    fn leverage_cap_halves_under_high_vol() {
        let mut inputs = calm_inputs();
        inputs.gross_notional = dec!(150000); // 15x, fine at cap 20
        let eval = evaluate(&limits(), &inputs);
        assert!(eval.within_limits);

        // High volatility halves the cap to 10x: 15x now violates, and the
        // violation names the applied factors.
        inputs.volatility_score = 80.0;
        let eval = evaluate(&limits(), &inputs);
        assert_eq!(eval.violations.len(), 1);
        assert!(eval.violations[0].starts_with("MAX_LEVERAGE"));
        assert!(eval.violations[0].contains("vol_factor=0.5"));
        assert!(eval.violations[0].contains("liq_factor=1"));
    }

    #[test]
    fn both_factors_compound() {
        let mut inputs = calm_inputs();
        inputs.gross_notional = dec!(60000); // 6x
        inputs.volatility_score = 90.0;
        inputs.liquidity_score = 10.0; // cap = 20 * 0.5 * 0.5 = 5
        let eval = evaluate(&limits(), &inputs);
        assert!(eval
            .violations
            .iter()
            .any(|v| v.contains("cap=5") && v.contains("liq_factor=0.5")));
    }

    #[test]
    fn zero_equity_never_divides() {
        let mut inputs = calm_inputs();
        inputs.equity = Decimal::ZERO;
        let eval = evaluate(&limits(), &inputs);
        assert_eq!(eval.delta, Decimal::ZERO);
        assert_eq!(eval.leverage, Decimal::ZERO);
    }

    #[test]
    fn boundary_is_exclusive() {
        let mut inputs = calm_inputs();
        inputs.delta = dec!(2000); // exactly 0.20
        let eval = evaluate(&limits(), &inputs);
        assert!(eval.within_limits, "limit itself is not a violation");
    }
}
