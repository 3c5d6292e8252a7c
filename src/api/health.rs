// =============================================================================
// Health & Metrics Endpoints — Axum 0.7
// =============================================================================
//
// Per-phase operational surface:
//   GET /health        200 healthy/degraded, 503 unhealthy; connection map
//   GET /health/live   always 200 while the process runs
//   GET /health/ready  200 iff every registered upstream feed is connected
//   GET /metrics       Prometheus text exposition from the injected registry
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parking_lot::RwLock;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::metrics::EngineMetrics;
use crate::net::ConnectionState;

/// Shared state behind the health surface. Components report their
/// connection lifecycle here.
pub struct HealthState {
    start: Instant,
    metrics: Arc<EngineMetrics>,
    connections: RwLock<BTreeMap<String, ConnectionState>>,
}

impl HealthState {
    pub fn new(metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            metrics,
            connections: RwLock::new(BTreeMap::new()),
        })
    }

    /// Record a connection's lifecycle state under a stable name
    /// (e.g. "feed:BTCUSDT", "intent-client").
    pub fn set_connection(&self, name: impl Into<String>, state: ConnectionState) {
        self.connections.write().insert(name.into(), state);
    }

    pub fn uptime_s(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    fn overall(&self) -> Overall {
        let connections = self.connections.read();
        if connections.is_empty() {
            // Nothing registered yet: starting up, degraded but serving.
            return Overall::Degraded;
        }
        let connected = connections
            .values()
            .filter(|s| **s == ConnectionState::Connected)
            .count();
        if connected == connections.len() {
            Overall::Healthy
        } else if connected > 0 {
            Overall::Degraded
        } else {
            Overall::Unhealthy
        }
    }

    fn all_ready(&self) -> bool {
        let connections = self.connections.read();
        !connections.is_empty()
            && connections.values().all(|s| *s == ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Overall {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Build the health router for one phase.
pub fn router(state: Arc<HealthState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: Overall,
    connections: BTreeMap<String, ConnectionState>,
    uptime_s: u64,
}

async fn health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let status = state.overall();
    let body = HealthResponse {
        status,
        connections: state.connections.read().clone(),
        uptime_s: state.uptime_s(),
    };
    let code = if status == Overall::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}

#[derive(Serialize)]
struct LiveResponse {
    status: &'static str,
    uptime_s: u64,
}

async fn live(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(LiveResponse {
        status: "alive",
        uptime_s: state.uptime_s(),
    })
}

async fn ready(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.all_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false })),
        )
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics render failed: {e}"),
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<HealthState> {
        HealthState::new(EngineMetrics::new().unwrap())
    }

    #[test]
    fn overall_reflects_connection_map() {
        let s = state();
        assert_eq!(s.overall(), Overall::Degraded); // nothing registered

        s.set_connection("feed:BTCUSDT", ConnectionState::Connected);
        s.set_connection("intent-client", ConnectionState::Connected);
        assert_eq!(s.overall(), Overall::Healthy);
        assert!(s.all_ready());

        s.set_connection("intent-client", ConnectionState::Reconnecting);
        assert_eq!(s.overall(), Overall::Degraded);
        assert!(!s.all_ready());

        s.set_connection("feed:BTCUSDT", ConnectionState::Failed);
        assert_eq!(s.overall(), Overall::Unhealthy);
    }

    #[tokio::test]
    async fn endpoints_serve_over_http() {
        let s = state();
        s.set_connection("feed:BTCUSDT", ConnectionState::Connected);
        s.metrics.trades_processed.inc();

        let app = router(s);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{addr}");
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"]["feed:BTCUSDT"], "connected");

        let resp = client.get(format!("{base}/health/live")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "alive");

        let resp = client.get(format!("{base}/health/ready")).send().await.unwrap();
        assert_eq!(resp.status(), 200);

        let text = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("titan_trades_processed_total 1"));
    }

    #[tokio::test]
    async fn unready_feed_returns_503() {
        let s = state();
        s.set_connection("feed:BTCUSDT", ConnectionState::Reconnecting);
        let app = router(s);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let resp = reqwest::get(format!("http://{addr}/health/ready")).await.unwrap();
        assert_eq!(resp.status(), 503);
    }
}
