// =============================================================================
// Execution Service — signed-intent server, router, venue fan-out
// =============================================================================
//
// PREPARE validates and sizes the signal; CONFIRM routes it through the
// gates, fans child orders out to venues (per-venue timeout, siblings
// independent), books fills into the portfolio tracker; ABORT releases the
// reservation. Runs as its own binary so the detection phases stay on the
// fast path only.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::{self, HealthState};
use crate::audit::{AuditKind, AuditLog, AuditRecord};
use crate::bus::{EngineEvent, EventBus};
use crate::config::ConfigRegistry;
use crate::execution::{
    dispatch_children, ExecutionRouter, PaperVenue, RouterConfig, VenueClient,
};
use crate::intent::{
    AbortResponse, ConfirmResponse, IntentHandler, IntentServer, IntentSignal, PrepareResponse,
};
use crate::metrics::EngineMetrics;
use crate::phase::cli::{self, CommonArgs};
use crate::portfolio::{MarkPrices, PortfolioTracker};
use crate::secrets::{venue_keys_from_env, CredentialStore};
use crate::types::{Direction, VenueId};

/// Default parent size when a signal arrives unsized.
const DEFAULT_POSITION_SIZE: Decimal = rust_decimal_macros::dec!(0.10);

/// The handler behind the three-phase handshake.
pub struct ExecutionService {
    registry: Arc<ConfigRegistry>,
    router: ExecutionRouter,
    venues: HashMap<VenueId, Arc<dyn VenueClient>>,
    tracker: Arc<PortfolioTracker>,
    audit: Arc<AuditLog>,
    bus: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
    prepared: Mutex<HashMap<String, IntentSignal>>,
}

impl ExecutionService {
    pub fn new(
        registry: Arc<ConfigRegistry>,
        venues: HashMap<VenueId, Arc<dyn VenueClient>>,
        tracker: Arc<PortfolioTracker>,
        audit: Arc<AuditLog>,
        bus: Arc<EventBus>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            registry,
            router: ExecutionRouter::new(bus.clone(), metrics.clone()),
            venues,
            tracker,
            audit,
            bus,
            metrics,
            prepared: Mutex::new(HashMap::new()),
        }
    }

    fn audit_record(&self, kind: AuditKind, payload: serde_json::Value) {
        if let Err(e) = self
            .audit
            .append(&AuditRecord::new(kind, "executor", payload))
        {
            warn!(error = %e, "failed to append audit record");
        }
    }
}

#[async_trait]
impl IntentHandler for ExecutionService {
    async fn prepare(&self, mut signal: IntentSignal) -> PrepareResponse {
        if let Err(reason) = signal.validate() {
            self.metrics.invalid_intents_total.inc();
            return PrepareResponse {
                prepared: false,
                signal_id: signal.signal_id,
                position_size: None,
                reason: Some(reason),
            };
        }

        let size = signal.size.unwrap_or(DEFAULT_POSITION_SIZE);
        signal.size = Some(size);

        let signal_id = signal.signal_id.clone();
        self.prepared.lock().insert(signal_id.clone(), signal);
        info!(signal_id = %signal_id, size = %size, "signal prepared");

        PrepareResponse {
            prepared: true,
            signal_id,
            position_size: Some(size),
            reason: None,
        }
    }

    async fn confirm(&self, signal_id: &str) -> ConfirmResponse {
        let Some(signal) = self.prepared.lock().remove(signal_id) else {
            return ConfirmResponse {
                executed: false,
                fill_price: None,
                reason: Some("unknown signal_id".into()),
            };
        };

        let started = Instant::now();
        let snapshot = self.registry.snapshot();
        let cfg = RouterConfig::from_snapshot(&snapshot);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let children = match self.router.route(&signal, &cfg, now_ms) {
            Ok(children) => children,
            Err(e) => {
                return ConfirmResponse {
                    executed: false,
                    fill_price: None,
                    reason: Some(e.to_string()),
                };
            }
        };

        let timeout = Duration::from_millis(
            snapshot.i64("execution.venue_timeout_ms").unwrap_or(2_000) as u64,
        );
        let results = dispatch_children(&children, &self.venues, timeout).await;
        self.metrics
            .execution_latency
            .observe(started.elapsed().as_secs_f64());

        // Aggregate fills: size-weighted average across successful children.
        let mut filled = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        let mut failures = Vec::new();
        for (child, result) in children.iter().zip(&results) {
            match result {
                Ok(ack) => {
                    let fill = ack.fill_price.or(child.price).unwrap_or(Decimal::ZERO);
                    filled += child.qty;
                    notional += child.qty * fill;

                    let perp_delta = match signal.direction {
                        Direction::Long => child.qty,
                        Direction::Short => -child.qty,
                    };
                    self.tracker.update_size(
                        &child.symbol,
                        Decimal::ZERO,
                        perp_delta,
                        MarkPrices {
                            spot: fill,
                            perp: fill,
                        },
                        Decimal::ZERO,
                        now_ms,
                    );
                    self.bus.publish(EngineEvent::ExecutionComplete {
                        signal_id: signal_id.to_string(),
                        client_order_id: ack.client_order_id.clone(),
                        venue: child.venue.as_str().to_string(),
                        executed: true,
                    });
                }
                Err(e) => {
                    if matches!(e, crate::execution::VenueError::Timeout) {
                        self.metrics.orders_timed_out.inc();
                    }
                    warn!(
                        venue = %child.venue,
                        client_order_id = %child.client_order_id,
                        error = %e,
                        "child order failed — siblings unaffected"
                    );
                    failures.push(format!("{}: {e}", child.venue));
                }
            }
        }

        let executed = filled > Decimal::ZERO;
        let fill_price = if filled.is_zero() {
            None
        } else {
            Some((notional / filled).round_dp(8))
        };

        self.audit_record(
            AuditKind::Execution,
            serde_json::json!({
                "signal_id": signal_id,
                "symbol": signal.symbol,
                "children": children.len(),
                "filled": filled,
                "fill_price": fill_price,
                "failures": failures,
            }),
        );

        ConfirmResponse {
            executed,
            fill_price,
            reason: if failures.is_empty() {
                None
            } else {
                Some(failures.join("; "))
            },
        }
    }

    async fn abort(&self, signal_id: &str) -> AbortResponse {
        let released = self.prepared.lock().remove(signal_id).is_some();
        if released {
            info!(signal_id, "signal aborted — reservation released");
        }
        self.audit_record(
            AuditKind::Close,
            serde_json::json!({ "signal_id": signal_id, "aborted": released }),
        );
        AbortResponse { aborted: released }
    }
}

/// Build the venue table. Live REST adapters require credentials (from the
/// encrypted store or env); everything else falls back to paper venues so
/// the executor always runs.
pub fn build_venues(live: bool) -> HashMap<VenueId, Arc<dyn VenueClient>> {
    let mut venues: HashMap<VenueId, Arc<dyn VenueClient>> = HashMap::new();

    let creds = if live {
        match std::env::var("TITAN_MASTER_PASSWORD") {
            Ok(password) => {
                let store = CredentialStore::new(CredentialStore::default_path());
                match store.load(&password) {
                    Ok(map) => Some(map),
                    Err(e) => {
                        error!(error = %e, "credential decrypt failed — paper venues only");
                        None
                    }
                }
            }
            Err(_) => None,
        }
    } else {
        None
    };

    for (venue, base_url) in [
        (VenueId::Binance, "https://api.binance.com"),
        (VenueId::Bybit, "https://api.bybit.com"),
        (VenueId::Mexc, "https://api.mexc.com"),
    ] {
        let keys = creds
            .as_ref()
            .and_then(|map| map.get(venue.as_str()).cloned())
            .or_else(|| venue_keys_from_env(venue.as_str()));

        match (live, keys) {
            (true, Some(keys)) => {
                info!(venue = %venue, "live venue adapter configured");
                venues.insert(
                    venue,
                    Arc::new(crate::execution::SignedRestVenue::new(venue, keys, base_url)),
                );
            }
            _ => {
                venues.insert(venue, PaperVenue::new(venue));
            }
        }
    }
    venues
}

/// Run the executor binary until SIGINT.
pub async fn run(args: CommonArgs) -> i32 {
    let ctx = match cli::bootstrap("executor", &args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return cli::EXIT_CONFIG;
        }
    };

    let live = std::env::var("TITAN_LIVE").map(|v| v == "1").unwrap_or(false);
    let venues = build_venues(live);
    let tracker = Arc::new(PortfolioTracker::new(
        Decimal::try_from(
            std::env::var("TITAN_STARTING_CASH")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(10_000.0),
        )
        .unwrap_or(Decimal::new(10_000, 0)),
    ));

    let service = ExecutionService::new(
        ctx.registry.clone(),
        venues,
        tracker,
        ctx.audit.clone(),
        ctx.bus.clone(),
        ctx.metrics.clone(),
    );

    let snapshot = ctx.registry.snapshot();
    let skew = snapshot.i64("ipc.clock_skew_ms").unwrap_or(5_000);
    let server = IntentServer::new(service, cli::intent_mac_key(), skew, ctx.metrics.clone());

    // Health surface.
    let health = HealthState::new(ctx.metrics.clone());
    health.set_connection("intent-server", crate::net::ConnectionState::Connected);
    {
        let app = api::router(health);
        let addr = args.health_addr.clone();
        tokio::spawn(async move {
            if let Ok(listener) = tokio::net::TcpListener::bind(&addr).await {
                let _ = axum::serve(listener, app).await;
            }
        });
    }

    let listener = match TcpListener::bind(&args.intent_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %args.intent_addr, error = %e, "intent server bind failed");
            return cli::EXIT_RUNTIME;
        }
    };

    tokio::select! {
        result = server.serve(listener) => {
            error!(error = ?result.err(), "intent server stopped unexpectedly");
            cli::EXIT_RUNTIME
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping executor");
            cli::EXIT_SIGINT
        }
    }
}
