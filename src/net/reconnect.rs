// =============================================================================
// Connection Lifecycle — one reconnect state machine for every client
// =============================================================================
//
// Market feeds, the signed-intent client, and venue REST clients all drive
// this same machine instead of carrying their own retry counters:
//
//   DISCONNECTED ─(connect requested)─▶ CONNECTING
//   CONNECTING   ─(handshake ok)──────▶ CONNECTED
//   CONNECTING   ─(timeout / error)───▶ RECONNECTING   (attempts < max)
//   CONNECTED    ─(socket close/err)──▶ RECONNECTING
//   RECONNECTING ─(delay elapsed)─────▶ CONNECTING
//   RECONNECTING ─(attempts ≥ max)────▶ FAILED
//   *            ─(disconnect req.)───▶ DISCONNECTED
//
// The machine is pure state; callers sleep on the returned delay.
// =============================================================================

use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters. `delay(n) = min(base · 2^(n-1), max)` plus up to
/// `jitter` fraction of the capped delay.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fraction in [0, 1] of random extra delay.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            max_attempts: 10,
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic exponential delay for `attempt` (1-based), before jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp).max(1));
        delay.min(self.max_delay)
    }

    /// Backoff with jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = base.mul_f64(rand::thread_rng().gen_range(0.0..self.jitter));
        base + extra
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The state machine itself. Owned by a single client task.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            name: name.into(),
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// DISCONNECTED → CONNECTING. A no-op in any other state.
    pub fn connect_requested(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
            debug!(client = %self.name, "connect requested");
        }
    }

    /// CONNECTING → CONNECTED; the attempt counter resets.
    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        debug!(client = %self.name, "connected");
    }

    /// Connection lost (from CONNECTING or CONNECTED). Returns the backoff
    /// to sleep before retrying, or `None` once attempts are exhausted and
    /// the machine is FAILED.
    pub fn connection_lost(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            warn!(
                client = %self.name,
                attempts = self.attempts,
                "reconnect attempts exhausted — giving up"
            );
            return None;
        }
        self.state = ConnectionState::Reconnecting;
        let delay = self.policy.backoff(self.attempts);
        debug!(
            client = %self.name,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        Some(delay)
    }

    /// RECONNECTING → CONNECTING once the backoff has elapsed.
    pub fn retrying(&mut self) {
        if self.state == ConnectionState::Reconnecting {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Operator-requested disconnect from any state.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        debug!(client = %self.name, "disconnected");
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(800),
            max_attempts,
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy(10);
        assert_eq!(p.base_backoff(1), Duration::from_millis(100));
        assert_eq!(p.base_backoff(2), Duration::from_millis(200));
        assert_eq!(p.base_backoff(3), Duration::from_millis(400));
        assert_eq!(p.base_backoff(4), Duration::from_millis(800));
        // Capped from here on.
        assert_eq!(p.base_backoff(5), Duration::from_millis(800));
        assert_eq!(p.base_backoff(30), Duration::from_millis(800));
    }

    #[test]
    fn happy_path_transitions() {
        let mut lc = Lifecycle::new("test", policy(3));
        assert_eq!(lc.state(), ConnectionState::Disconnected);

        lc.connect_requested();
        assert_eq!(lc.state(), ConnectionState::Connecting);

        lc.connected();
        assert_eq!(lc.state(), ConnectionState::Connected);
        assert_eq!(lc.attempts(), 0);
    }

    #[test]
    fn reconnect_until_failed() {
        let mut lc = Lifecycle::new("test", policy(3));
        lc.connect_requested();
        lc.connected();

        // Attempt 1 and 2 back off; attempt 3 hits the cap and fails.
        assert_eq!(lc.connection_lost(), Some(Duration::from_millis(100)));
        assert_eq!(lc.state(), ConnectionState::Reconnecting);
        lc.retrying();
        assert_eq!(lc.state(), ConnectionState::Connecting);

        assert_eq!(lc.connection_lost(), Some(Duration::from_millis(200)));
        lc.retrying();

        assert_eq!(lc.connection_lost(), None);
        assert_eq!(lc.state(), ConnectionState::Failed);
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut lc = Lifecycle::new("test", policy(3));
        lc.connect_requested();
        lc.connection_lost();
        lc.retrying();
        lc.connected();
        assert_eq!(lc.attempts(), 0);
        // A fresh drop starts the backoff series over.
        assert_eq!(lc.connection_lost(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn disconnect_from_any_state() {
        let mut lc = Lifecycle::new("test", policy(2));
        lc.connect_requested();
        lc.connection_lost();
        lc.disconnect();
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert_eq!(lc.attempts(), 0);
    }
}
