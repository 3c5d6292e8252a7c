// =============================================================================
// Sentinel — the portfolio / risk / rebalancer control loop
// =============================================================================
//
// Periodic evaluator: health report → tiered risk evaluation → at most one
// rebalancing action per cycle, dispatched through the TWAP transfer
// executor. A transfer failure logs and aborts the cycle without retry;
// the next cycle re-evaluates from current state. Critical risk posture
// publishes a posture event and trips the global halt.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::api::{self, HealthState};
use crate::audit::{AuditKind, AuditRecord};
use crate::bus::EngineEvent;
use crate::config::ConfigValue;
use crate::phase::cli::{self, CommonArgs, PhaseContext};
use crate::portfolio::{
    evaluate_risk, HealthStatus, PortfolioTracker, RebalanceAction, RebalanceConfig, Rebalancer,
    RiskInputs, RiskLimits,
};
use crate::execution::{TwapExecutor, TwapParams};
use crate::types::PhaseId;

/// Run the sentinel until SIGINT. Returns the process exit code.
pub async fn run(args: CommonArgs) -> i32 {
    let ctx = match cli::bootstrap(PhaseId::Sentinel.as_str(), &args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return cli::EXIT_CONFIG;
        }
    };

    match run_inner(ctx, args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "sentinel terminated abnormally");
            cli::EXIT_RUNTIME
        }
    }
}

async fn run_inner(ctx: PhaseContext, args: CommonArgs) -> anyhow::Result<i32> {
    let starting_cash = Decimal::try_from(
        std::env::var("TITAN_STARTING_CASH")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(10_000.0),
    )
    .unwrap_or(Decimal::new(10_000, 0));

    let tracker = Arc::new(PortfolioTracker::new(starting_cash));
    let snapshot = ctx.registry.snapshot();
    let rebalancer = Rebalancer::new(RebalanceConfig::from_snapshot(&snapshot), starting_cash);
    let twap = TwapExecutor::new();

    // Health surface.
    let health = HealthState::new(ctx.metrics.clone());
    health.set_connection("control-loop", crate::net::ConnectionState::Connected);
    {
        let app = api::router(health);
        let addr = args.health_addr.clone();
        tokio::spawn(async move {
            if let Ok(listener) = tokio::net::TcpListener::bind(&addr).await {
                let _ = axum::serve(listener, app).await;
            }
        });
    }

    let mut peak_nav = starting_cash;
    let mut last_status = HealthStatus::Healthy;
    let interval_ms = snapshot.i64("rebalance.interval_ms").unwrap_or(30_000) as u64;
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));

    info!(interval_ms, cash = %starting_cash, "control loop starting");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received — stopping sentinel");
                return Ok(cli::EXIT_SIGINT);
            }
            _ = interval.tick() => {}
        }

        let snap = ctx.registry.snapshot();
        let limits = RiskLimits::from_snapshot(&snap);

        // ── Evaluate ─────────────────────────────────────────────────────
        let report = tracker.health_report(last_status, Vec::new());
        peak_nav = peak_nav.max(report.nav);
        let drawdown = if peak_nav.is_zero() {
            Decimal::ZERO
        } else {
            ((peak_nav - report.nav) / peak_nav).max(Decimal::ZERO)
        };
        let gross_notional: Decimal = report
            .positions
            .iter()
            .map(|p| (p.spot_size.abs() + p.perp_size.abs()) * p.spot_entry.abs())
            .sum();

        let evaluation = evaluate_risk(
            &limits,
            &RiskInputs {
                equity: report.nav,
                delta: report.delta,
                drawdown,
                volatility_score: 50.0,
                liquidity_score: 50.0,
                gross_notional,
            },
        );

        if evaluation.status != last_status {
            info!(
                from = ?last_status,
                to = ?evaluation.status,
                violations = ?evaluation.violations,
                "risk posture changed"
            );
            ctx.bus.publish(EngineEvent::PostureChanged {
                posture: format!("{:?}", evaluation.status).to_lowercase(),
                reason: evaluation.violations.join(","),
            });
            last_status = evaluation.status;
        }

        // Fund-loss-imminent: force the global halt.
        if evaluation.status == HealthStatus::Critical {
            match ctx.registry.apply_override(
                "detection.global_halt",
                ConfigValue::Bool(true),
                "sentinel",
                &format!("critical risk: {}", evaluation.violations.join(",")),
            ) {
                Ok(_) => warn!("global halt applied"),
                Err(e) => {
                    error!(error = %e, "global halt could not be applied");
                    return Ok(cli::EXIT_RUNTIME);
                }
            }
        }

        // ── Rebalance ────────────────────────────────────────────────────
        let (margin_used, margin_total) = tracker.margin();
        let Some(action) = rebalancer.decide(&report, margin_used, margin_total) else {
            continue;
        };
        info!(action = ?action, "rebalance action selected");

        let params = TwapParams::from_snapshot(action.amount(), &snap);
        // Internal transfers settle at par; the slippage bound still guards
        // against a venue quoting transfers away from it.
        let outcome = twap
            .execute(params, |_clip| async { Ok((Decimal::ONE, Decimal::ONE)) })
            .await;

        match outcome {
            Ok(result) if result.aborted => {
                rebalancer.transfer_failed(
                    &action,
                    result.reason.as_deref().unwrap_or("unknown"),
                );
            }
            Ok(result) => {
                if let RebalanceAction::Compound { .. } | RebalanceAction::HardCompound { .. } =
                    action
                {
                    rebalancer.compound_settled(report.nav);
                }
                let record = AuditRecord::new(
                    AuditKind::Execution,
                    "sentinel",
                    serde_json::json!({
                        "action": action,
                        "filled": result.total_filled,
                        "clips": result.clips.len(),
                    }),
                );
                if let Err(e) = ctx.audit.append(&record) {
                    warn!(error = %e, "failed to append rebalance audit record");
                }
            }
            Err(e) => rebalancer.transfer_failed(&action, &e.to_string()),
        }
    }
}
