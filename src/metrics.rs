// =============================================================================
// Metrics Registry — injected counters/gauges/histograms + text exposition
// =============================================================================
//
// Components receive an `Arc<EngineMetrics>` at construction instead of
// touching a process-wide global, so tests can swap in a fresh registry and
// assert on it. The `/metrics` endpoint renders the same registry in
// Prometheus text exposition format.
// =============================================================================

use anyhow::{Context, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// All metrics exposed by the detection and execution surfaces.
pub struct EngineMetrics {
    registry: Registry,

    // ── Signed-intent fast path ─────────────────────────────────────────
    pub ipc_messages_sent: IntCounter,
    pub ipc_messages_received: IntCounter,
    pub ipc_messages_failed: IntCounter,
    pub ipc_reconnect_attempts: IntCounter,
    pub ipc_latency: Histogram,
    pub auth_failures: IntCounter,

    // ── Detection ───────────────────────────────────────────────────────
    pub trades_processed: IntCounter,
    pub ticks_dropped: IntCounter,
    pub tripwires_armed: IntGauge,
    pub tripwires_fired: IntCounterVec,
    pub signal_latency: Histogram,

    // ── Execution ───────────────────────────────────────────────────────
    pub intents_routed: IntCounterVec,
    pub invalid_intents_total: IntCounter,
    pub execution_gated: IntCounterVec,
    pub execution_latency: Histogram,
    pub orders_timed_out: IntCounter,
}

impl EngineMetrics {
    /// Build a fresh registry with every metric registered.
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let ipc_messages_sent = IntCounter::with_opts(Opts::new(
            "titan_ipc_messages_sent_total",
            "Signed-intent requests written to the socket",
        ))?;
        let ipc_messages_received = IntCounter::with_opts(Opts::new(
            "titan_ipc_messages_received_total",
            "Signed-intent responses matched to a correlation id",
        ))?;
        let ipc_messages_failed = IntCounter::with_opts(Opts::new(
            "titan_ipc_messages_failed_total",
            "Signed-intent requests that timed out or errored",
        ))?;
        let ipc_reconnect_attempts = IntCounter::with_opts(Opts::new(
            "titan_ipc_reconnect_attempts_total",
            "Reconnect attempts made by the signed-intent client",
        ))?;
        let ipc_latency = Histogram::with_opts(
            HistogramOpts::new(
                "titan_ipc_latency_seconds",
                "Request/response round-trip latency on the fast path",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
        )?;
        let auth_failures = IntCounter::with_opts(Opts::new(
            "titan_auth_failures_total",
            "MAC mismatches, stale timestamps, and unknown signal ids",
        ))?;

        let trades_processed = IntCounter::with_opts(Opts::new(
            "titan_trades_processed_total",
            "Normalized trades consumed by detection shards",
        ))?;
        let ticks_dropped = IntCounter::with_opts(Opts::new(
            "titan_ticks_dropped_total",
            "Non-matching ticks dropped by backpressure",
        ))?;
        let tripwires_armed = IntGauge::with_opts(Opts::new(
            "titan_tripwires_armed",
            "Tripwires currently in a non-terminal state",
        ))?;
        let tripwires_fired = IntCounterVec::new(
            Opts::new("titan_tripwires_fired_total", "Tripwires fired, by type"),
            &["type"],
        )?;
        let signal_latency = Histogram::with_opts(
            HistogramOpts::new(
                "titan_signal_latency_seconds",
                "Trade receipt to intent emission latency",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;

        let intents_routed = IntCounterVec::new(
            Opts::new("titan_intents_routed_total", "Child orders routed, by venue"),
            &["venue"],
        )?;
        let invalid_intents_total = IntCounter::with_opts(Opts::new(
            "titan_invalid_intents_total",
            "Intents rejected by schema validation and dead-lettered",
        ))?;
        let execution_gated = IntCounterVec::new(
            Opts::new("titan_execution_gated_total", "Intents refused by a gate"),
            &["gate"],
        )?;
        let execution_latency = Histogram::with_opts(
            HistogramOpts::new(
                "titan_execution_latency_seconds",
                "Intent receipt to venue acknowledgement latency",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        )?;
        let orders_timed_out = IntCounter::with_opts(Opts::new(
            "titan_orders_timed_out_total",
            "Child orders that hit the per-venue placement timeout",
        ))?;

        for collector in [
            Box::new(ipc_messages_sent.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(ipc_messages_received.clone()),
            Box::new(ipc_messages_failed.clone()),
            Box::new(ipc_reconnect_attempts.clone()),
            Box::new(ipc_latency.clone()),
            Box::new(auth_failures.clone()),
            Box::new(trades_processed.clone()),
            Box::new(ticks_dropped.clone()),
            Box::new(tripwires_armed.clone()),
            Box::new(tripwires_fired.clone()),
            Box::new(signal_latency.clone()),
            Box::new(intents_routed.clone()),
            Box::new(invalid_intents_total.clone()),
            Box::new(execution_gated.clone()),
            Box::new(execution_latency.clone()),
            Box::new(orders_timed_out.clone()),
        ] {
            registry
                .register(collector)
                .context("failed to register metric")?;
        }

        Ok(Arc::new(Self {
            registry,
            ipc_messages_sent,
            ipc_messages_received,
            ipc_messages_failed,
            ipc_reconnect_attempts,
            ipc_latency,
            auth_failures,
            trades_processed,
            ticks_dropped,
            tripwires_armed,
            tripwires_fired,
            signal_latency,
            intents_routed,
            invalid_intents_total,
            execution_gated,
            execution_latency,
            orders_timed_out,
        }))
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .context("failed to encode metrics")?;
        String::from_utf8(buf).context("metrics exposition was not UTF-8")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_exposition() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.ipc_messages_sent.inc();
        metrics.ipc_messages_sent.inc();
        metrics.intents_routed.with_label_values(&["bybit"]).inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("titan_ipc_messages_sent_total 2"));
        assert!(text.contains("titan_intents_routed_total{venue=\"bybit\"} 1"));
    }

    #[test]
    fn registries_are_independent() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.auth_failures.inc();
        assert_eq!(a.auth_failures.get(), 1);
        assert_eq!(b.auth_failures.get(), 0);
    }

    #[test]
    fn received_never_exceeds_sent_when_used_correctly() {
        let m = EngineMetrics::new().unwrap();
        m.ipc_messages_sent.inc();
        m.ipc_messages_received.inc();
        assert!(m.ipc_messages_received.get() <= m.ipc_messages_sent.get());
    }
}
