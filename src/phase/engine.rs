// =============================================================================
// Detection Phase Runner — shared fabric for the scavenger and hunter
// =============================================================================
//
// Wiring per phase:
//   one task per symbol for kline and trade ingestion (reconnect-supervised)
//   one task for the pre-computation cycle (every tripwire.update_interval_ms)
//   one task for the detection shard (owns all tripwire state)
//   one task for the signed-intent dialogue (PREPARE → CONFIRM | ABORT)
//   the health/metrics server
//
// A global halt from config stops intent emission at the next trade
// boundary; IPC failure beyond max attempts ends the phase with exit 2.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::{self, HealthState};
use crate::audit::{AuditKind, AuditRecord};
use crate::bus::EngineEvent;
use crate::detection::{DetectionConfig, SymbolShard};
use crate::intent::{IntentClient, IntentSignal, IpcConfig, IpcError};
use crate::market_data::{
    candle_buffer, stream, CandleBuffer, CandleKey, DerivedStore, TickQueue, TradeFlow,
};
use crate::net::ReconnectPolicy;
use crate::phase::cli::{self, CommonArgs, PhaseContext};
use crate::tripwire::{indicators, WatchlistBuilder};
use crate::types::{PhaseId, Trade};

/// Per-symbol plumbing between the feeds and the shard.
struct SymbolPipe {
    queue: Arc<TickQueue>,
    flow: Arc<TradeFlow>,
}

/// Run a detection phase (scavenger or hunter) until SIGINT or a fatal
/// runtime error. Returns the process exit code.
pub async fn run(phase: PhaseId, args: CommonArgs) -> i32 {
    let ctx = match cli::bootstrap(phase.as_str(), &args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return cli::EXIT_CONFIG;
        }
    };

    match run_inner(phase, ctx, args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "phase terminated abnormally");
            cli::EXIT_RUNTIME
        }
    }
}

async fn run_inner(phase: PhaseId, ctx: PhaseContext, args: CommonArgs) -> anyhow::Result<i32> {
    let snapshot = ctx.registry.snapshot();
    let universe = snapshot
        .list("symbols.universe")
        .unwrap_or_default();
    anyhow::ensure!(!universe.is_empty(), "symbol universe is empty");
    info!(phase = %phase, symbols = ?universe, "universe configured");

    let queue_capacity = snapshot.i64("feed.queue_capacity").unwrap_or(1_024) as usize;
    let candles = Arc::new(CandleBuffer::new(500));
    let derived = Arc::new(DerivedStore::new());
    let health = HealthState::new(ctx.metrics.clone());

    // Trigger index shared with the feed sinks so backpressure knows which
    // ticks must never drop.
    let trigger_index: Arc<RwLock<HashMap<String, Vec<Decimal>>>> =
        Arc::new(RwLock::new(HashMap::new()));

    let mut pipes: HashMap<String, SymbolPipe> = HashMap::new();
    for symbol in &universe {
        pipes.insert(
            symbol.clone(),
            SymbolPipe {
                queue: Arc::new(TickQueue::new(queue_capacity)),
                flow: Arc::new(TradeFlow::new(symbol.clone())),
            },
        );
    }
    let pipes = Arc::new(pipes);

    // ── Market data tasks ────────────────────────────────────────────────
    let proximity = snapshot.f64("detection.proximity_pct").unwrap_or(0.001);
    for symbol in &universe {
        // Kline stream with its own reconnect supervision.
        let buffer = candles.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = candle_buffer::run_kline_stream(&sym, "1m", &buffer).await {
                    warn!(symbol = %sym, error = %e, "kline stream error — reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });

        // Trade stream: normalize, classify against the trigger index, queue.
        let pipe_queue = pipes[symbol].queue.clone();
        let pipe_flow = pipes[symbol].flow.clone();
        let index = trigger_index.clone();
        let metrics = ctx.metrics.clone();
        let health_feed = health.clone();
        let health_name = format!("feed:{symbol}");
        health_feed.set_connection(health_name.clone(), crate::net::ConnectionState::Connecting);
        let connected_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let sym: Arc<str> = symbol.clone().into();
        let sink_health = health_feed.clone();
        let sink_name = health_name.clone();
        let sink_flag = connected_flag.clone();
        let sink = Arc::new(move |trade: Trade| {
            // First trade proves the feed is live.
            if !sink_flag.swap(true, std::sync::atomic::Ordering::Relaxed) {
                sink_health.set_connection(sink_name.clone(), crate::net::ConnectionState::Connected);
            }
            pipe_flow.process(&trade);
            let matching = index
                .read()
                .get(&trade.symbol)
                .is_some_and(|triggers| {
                    triggers.iter().any(|t| {
                        crate::detection::engine::within_proximity(trade.price, *t, proximity)
                    })
                });
            let dropped = pipe_queue.push(trade, matching);
            if dropped > 0 {
                metrics.ticks_dropped.inc_by(dropped);
            }
        });
        let policy = ReconnectPolicy::default();
        tokio::spawn(async move {
            let result = stream::supervise_trade_stream(sym, policy, sink).await;
            if result.is_err() {
                health_feed.set_connection(health_name, crate::net::ConnectionState::Failed);
            }
        });
    }

    // ── Derived inputs (funding / OI / basis) ────────────────────────────
    {
        let poller = crate::market_data::derived::DerivedPoller::new();
        let store = derived.clone();
        let symbols = universe.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                for symbol in &symbols {
                    poller.poll_symbol(symbol, &store).await;
                }
            }
        });
    }

    // ── Audit compaction (gzip old rotations daily) ──────────────────────
    {
        let audit = ctx.audit.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(24 * 3_600));
            loop {
                interval.tick().await;
                match audit.compress_old_rotations() {
                    Ok(0) => {}
                    Ok(n) => info!(compressed = n, "audit rotations compressed"),
                    Err(e) => warn!(error = %e, "audit compaction failed"),
                }
            }
        });
    }

    // ── Signed-intent client ─────────────────────────────────────────────
    let ipc_cfg = IpcConfig::from_snapshot(
        args.intent_addr.clone(),
        cli::intent_mac_key(),
        &snapshot,
    );
    let client = IntentClient::spawn(ipc_cfg, ctx.metrics.clone(), ctx.bus.clone());

    // Surface the client state on the health map.
    {
        let client = client.clone();
        let health = health.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                interval.tick().await;
                health.set_connection("intent-client", client.state());
            }
        });
    }

    // ── Health server ────────────────────────────────────────────────────
    {
        let app = api::router(health.clone());
        let addr = args.health_addr.clone();
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!(addr = %addr, "health server listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "health server failed");
                    }
                }
                Err(e) => error!(addr = %addr, error = %e, "health server bind failed"),
            }
        });
    }

    // ── Detection shard + watchlist cycle ────────────────────────────────
    let (intent_tx, intent_rx) = mpsc::unbounded_channel::<IntentSignal>();
    let mut shard = SymbolShard::new(
        0,
        phase,
        DetectionConfig::from_snapshot(&snapshot),
        ctx.bus.clone(),
        ctx.metrics.clone(),
        Some(ctx.audit.clone()),
        intent_tx,
    );

    let builder = WatchlistBuilder::new(
        candles.clone(),
        derived.clone(),
        ctx.bus.clone(),
        "1m",
    )
    .for_phase(phase);

    let registry = ctx.registry.clone();
    let shard_pipes = pipes.clone();
    let shard_universe = universe.clone();
    let shard_candles = candles.clone();
    let shard_index = trigger_index.clone();
    let detection = tokio::spawn(async move {
        let mut cycle = tokio::time::interval(std::time::Duration::from_millis(
            registry
                .snapshot()
                .i64("tripwire.update_interval_ms")
                .unwrap_or(60_000) as u64,
        ));
        let mut drain = tokio::time::interval(std::time::Duration::from_millis(5));

        loop {
            tokio::select! {
                _ = cycle.tick() => {
                    let snap = registry.snapshot();
                    let cfg = DetectionConfig::from_snapshot(&snap);
                    shard.update_config(cfg);

                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let map = builder.build(&shard_universe, &snap, now_ms);

                    // Refresh trend readings for the veto.
                    for symbol in &map.symbols {
                        let key = CandleKey::new(symbol.clone(), "1m");
                        let series = shard_candles.recent(&key, 100);
                        if let Some(reading) = indicators::adx(&series, 14) {
                            shard.update_trend(symbol, reading);
                        }
                    }

                    shard.apply_map(&map, |_| true);

                    // Publish the trigger index the feed sinks classify with.
                    let mut index = HashMap::new();
                    for wire in shard.tripwires() {
                        index
                            .entry(wire.symbol.clone())
                            .or_insert_with(Vec::new)
                            .push(wire.trigger_price);
                    }
                    *shard_index.write() = index;
                }
                _ = drain.tick() => {
                    let snap = registry.snapshot();
                    let cvd_window = snap.i64("detection.cvd_window_ms").unwrap_or(5_000);
                    for pipe in shard_pipes.values() {
                        while let Some(trade) = pipe.queue.pop() {
                            let cvd = pipe.flow.cvd_delta(trade.timestamp_ms, cvd_window);
                            shard.on_trade(&trade, cvd);
                        }
                    }
                }
            }
        }
    });

    // ── Intent dialogue ──────────────────────────────────────────────────
    let dialogue = tokio::spawn(intent_dialogue(
        intent_rx,
        client,
        ctx.audit.clone(),
        ctx.bus.clone(),
    ));

    // ── Hot reload on SIGHUP, fatal IPC watch, shutdown ──────────────────
    let mut bus_rx = ctx.bus.subscribe_channel();
    #[cfg(unix)]
    let mut hangup =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

    let exit_code = loop {
        #[cfg(unix)]
        let hangup_recv = hangup.recv();
        #[cfg(not(unix))]
        let hangup_recv = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received — stopping gracefully");
                break cli::EXIT_SIGINT;
            }
            _ = hangup_recv => {
                match ctx.registry.hot_reload(&ctx.config_path) {
                    Ok(report) => info!(?report, "config hot reload on SIGHUP"),
                    Err(e) => warn!(error = %e, "config hot reload failed"),
                }
            }
            event = bus_rx.recv() => match event {
                Some(EngineEvent::IpcConnectionFailed { attempts }) => {
                    error!(attempts, "signed-intent channel failed permanently");
                    break cli::EXIT_RUNTIME;
                }
                Some(_) => {}
                None => break cli::EXIT_RUNTIME,
            }
        }
    };

    detection.abort();
    dialogue.abort();
    info!(phase = %phase, code = exit_code, "phase stopped");
    Ok(exit_code)
}

/// Drive PREPARE → CONFIRM | ABORT for every emitted signal. CONFIRM is
/// sent iff PREPARE returned `prepared=true`; a timed-out PREPARE is never
/// auto-resent.
async fn intent_dialogue(
    mut intent_rx: mpsc::UnboundedReceiver<IntentSignal>,
    client: IntentClient,
    audit: Arc<crate::audit::AuditLog>,
    bus: Arc<crate::bus::EventBus>,
) {
    while let Some(signal) = intent_rx.recv().await {
        let signal_id = signal.signal_id.clone();

        let prepared = match client.prepare(&signal).await {
            Ok(response) => response,
            Err(IpcError::Timeout) => {
                warn!(signal_id = %signal_id, "PREPARE timed out — dropped, no resend");
                continue;
            }
            Err(e) => {
                warn!(signal_id = %signal_id, error = %e, "PREPARE failed");
                continue;
            }
        };

        if !prepared.prepared {
            info!(
                signal_id = %signal_id,
                reason = prepared.reason.as_deref().unwrap_or("unspecified"),
                "executor declined — aborting"
            );
            let _ = client.abort(&signal_id).await;
            continue;
        }

        match client.confirm(&signal_id).await {
            Ok(confirmed) => {
                info!(
                    signal_id = %signal_id,
                    executed = confirmed.executed,
                    fill = ?confirmed.fill_price,
                    "intent confirmed"
                );
                bus.publish(EngineEvent::ExecutionComplete {
                    signal_id: signal_id.clone(),
                    client_order_id: String::new(),
                    venue: String::new(),
                    executed: confirmed.executed,
                });
                let record = AuditRecord::new(
                    AuditKind::Execution,
                    "intent-dialogue",
                    serde_json::json!({
                        "signal_id": signal_id,
                        "executed": confirmed.executed,
                        "fill_price": confirmed.fill_price,
                        "reason": confirmed.reason,
                    }),
                );
                if let Err(e) = audit.append(&record) {
                    warn!(error = %e, "failed to append execution audit record");
                }
            }
            Err(e) => {
                warn!(signal_id = %signal_id, error = %e, "CONFIRM failed");
            }
        }
    }
}
