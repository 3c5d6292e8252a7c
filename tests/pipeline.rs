// =============================================================================
// End-to-end pipeline: detection → signed fast path → router → paper venues
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use titan_engine::bus::EventBus;
use titan_engine::config::{ConfigRegistry, ConfigValue};
use titan_engine::detection::{DetectionConfig, SymbolShard};
use titan_engine::execution::{PaperVenue, VenueClient};
use titan_engine::intent::{IntentClient, IntentServer, IpcConfig};
use titan_engine::metrics::EngineMetrics;
use titan_engine::net::ReconnectPolicy;
use titan_engine::phase::executor::ExecutionService;
use titan_engine::portfolio::PortfolioTracker;
use titan_engine::tripwire::{Tripwire, TripwireMap, TripwireType, VolatilityMetrics};
use titan_engine::types::{Direction, PhaseId, Trade, VenueId};

const MAC_KEY: &[u8] = b"pipeline-test-key";

fn armed_registry(bus: Arc<EventBus>) -> Arc<ConfigRegistry> {
    let registry = Arc::new(ConfigRegistry::new(bus, MAC_KEY.to_vec()));
    registry
        .apply_override("execution.master_arm", ConfigValue::Bool(true), "test", "arm")
        .unwrap();
    registry
}

fn liquidation_map(trigger: Decimal) -> TripwireMap {
    let wire = Tripwire::new(
        "BTCUSDT",
        trigger,
        Direction::Long,
        TripwireType::Liquidation,
        95,
        20,
        dec!(0.01),
        dec!(0.03),
        0,
        VolatilityMetrics::default(),
    );
    let mut by_symbol = HashMap::new();
    by_symbol.insert("BTCUSDT".to_string(), vec![wire]);
    TripwireMap {
        generation: 1,
        symbols: vec!["BTCUSDT".to_string()],
        by_symbol,
    }
}

fn trade(ts: i64, price: Decimal) -> Trade {
    Trade {
        symbol: "BTCUSDT".into(),
        price,
        qty: dec!(0.002),
        timestamp_ms: ts,
        buyer_is_maker: false,
    }
}

struct Fixture {
    client: IntentClient,
    tracker: Arc<PortfolioTracker>,
    paper: HashMap<VenueId, Arc<PaperVenue>>,
    _audit_dir: tempfile::TempDir,
}

/// Boot an executor service on a real socket and a client against it.
async fn fixture() -> Fixture {
    let bus = EventBus::new();
    let registry = armed_registry(bus.clone());
    let metrics = EngineMetrics::new().unwrap();

    let mut paper: HashMap<VenueId, Arc<PaperVenue>> = HashMap::new();
    let mut venues: HashMap<VenueId, Arc<dyn VenueClient>> = HashMap::new();
    for venue in [VenueId::Binance, VenueId::Bybit, VenueId::Mexc] {
        let p = PaperVenue::new(venue);
        paper.insert(venue, p.clone());
        venues.insert(venue, p);
    }

    let tracker = Arc::new(PortfolioTracker::new(dec!(10000)));
    let audit_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(
        titan_engine::audit::AuditLog::open(audit_dir.path(), 10 * 1024 * 1024, 30).unwrap(),
    );

    let service = ExecutionService::new(
        registry.clone(),
        venues,
        tracker.clone(),
        audit,
        bus.clone(),
        metrics.clone(),
    );
    let server = IntentServer::new(service, MAC_KEY, 5_000, metrics.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let client = IntentClient::spawn(
        IpcConfig {
            addr,
            mac_key: MAC_KEY.to_vec(),
            message_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(1_000),
            policy: ReconnectPolicy::default(),
        },
        metrics,
        bus,
    );

    Fixture {
        client,
        tracker,
        paper,
        _audit_dir: audit_dir,
    }
}

#[tokio::test]
async fn happy_path_long_liquidation_fans_out() {
    let fixture = fixture().await;

    // Detection shard with one LONG liquidation tripwire at 50000.
    let (intent_tx, mut intent_rx) = mpsc::unbounded_channel();
    let detection_bus = EventBus::new();
    let registry = armed_registry(detection_bus.clone());
    let mut shard = SymbolShard::new(
        0,
        PhaseId::Scavenger,
        DetectionConfig::from_snapshot(&registry.snapshot()),
        detection_bus,
        EngineMetrics::new().unwrap(),
        None,
        intent_tx,
    );
    shard.apply_map(&liquidation_map(dec!(50000)), |_| true);

    // 50 trades in 80 ms within [49998, 50002], all taker buys; neutral
    // acceleration and trend.
    let mut timestamp = chrono::Utc::now().timestamp_millis();
    for i in 0..50u32 {
        timestamp += i64::from(i % 2); // ~80ms spread
        let price = dec!(49998) + Decimal::from(i % 5);
        shard.on_trade(&trade(timestamp, price), dec!(1_000));
    }

    let mut signal = intent_rx.try_recv().expect("tripwire should have fired");
    assert_eq!(signal.direction, Direction::Long);
    assert_eq!(signal.source, "scavenger");
    signal.size = Some(dec!(0.10));

    // PREPARE → CONFIRM over the wire.
    let prepared = fixture.client.prepare(&signal).await.unwrap();
    assert!(prepared.prepared);
    assert_eq!(prepared.position_size, Some(dec!(0.10)));

    let confirmed = fixture.client.confirm(&signal.signal_id).await.unwrap();
    assert!(confirmed.executed);
    let fill = confirmed.fill_price.unwrap();
    assert!(
        (fill - dec!(50000)).abs() <= dec!(50),
        "fill {fill} should be ≈ 50000"
    );

    // Default scavenger routing: bybit + mexc, 0.05 each.
    let bybit_orders = fixture.paper[&VenueId::Bybit].orders();
    let mexc_orders = fixture.paper[&VenueId::Mexc].orders();
    assert_eq!(bybit_orders.len(), 1);
    assert_eq!(mexc_orders.len(), 1);
    assert_eq!(bybit_orders[0].qty, dec!(0.05));
    assert_eq!(mexc_orders[0].qty, dec!(0.05));
    assert!(fixture.paper[&VenueId::Binance].orders().is_empty());

    // The portfolio booked the whole parent size.
    let position = fixture.tracker.get("BTCUSDT").unwrap();
    assert_eq!(position.perp_size, dec!(0.10));
}

#[tokio::test]
async fn confirm_is_idempotent_over_the_wire() {
    let fixture = fixture().await;

    let signal = titan_engine::intent::IntentSignal {
        signal_id: "idem-1".into(),
        source: "hunter".into(),
        symbol: "ETHUSDT".into(),
        direction: Direction::Long,
        entry_zone: titan_engine::intent::EntryZone {
            min: dec!(1995),
            max: dec!(2005),
        },
        stop_loss: dec!(1980),
        take_profits: vec![dec!(2060)],
        confidence: 85,
        leverage: 12,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        size: Some(dec!(0.20)),
        venue: None,
        phase_id: Some("hunter".into()),
        shard_id: 0,
        seq: 1,
    };

    let prepared = fixture.client.prepare(&signal).await.unwrap();
    assert!(prepared.prepared);

    let first = fixture.client.confirm(&signal.signal_id).await.unwrap();
    let second = fixture.client.confirm(&signal.signal_id).await.unwrap();
    assert_eq!(first.executed, second.executed);
    assert_eq!(first.fill_price, second.fill_price);

    // Hunter default routing: a single binance child for the full size.
    let orders = fixture.paper[&VenueId::Binance].orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].qty, dec!(0.20));
}

#[tokio::test]
async fn abort_path_books_nothing() {
    let fixture = fixture().await;

    let signal = titan_engine::intent::IntentSignal {
        signal_id: "abort-1".into(),
        source: "scavenger".into(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Short,
        entry_zone: titan_engine::intent::EntryZone {
            min: dec!(49950),
            max: dec!(50050),
        },
        stop_loss: dec!(50500),
        take_profits: vec![dec!(48500)],
        confidence: 90,
        leverage: 15,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        size: Some(dec!(0.10)),
        venue: None,
        phase_id: None,
        shard_id: 0,
        seq: 2,
    };

    let prepared = fixture.client.prepare(&signal).await.unwrap();
    assert!(prepared.prepared);

    let aborted = fixture.client.abort(&signal.signal_id).await.unwrap();
    assert!(aborted.aborted);

    // CONFIRM after ABORT refuses; nothing reaches a venue.
    let confirmed = fixture.client.confirm(&signal.signal_id).await.unwrap();
    assert!(!confirmed.executed);
    assert!(fixture.tracker.get("BTCUSDT").is_none());
    for paper in fixture.paper.values() {
        assert!(paper.orders().is_empty());
    }
}
