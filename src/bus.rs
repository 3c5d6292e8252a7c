// =============================================================================
// Event Bus — in-process publish/subscribe with isolated handlers
// =============================================================================
//
// Delivery is synchronous: `publish` invokes every handler on the caller's
// thread before returning. A panicking handler is caught and logged; the
// remaining handlers still run. Async consumers subscribe through an
// unbounded channel and drain events in their own task.
//
// Cross-process mirrors of these events use the stable subject names from
// `EngineEvent::subject`.
// =============================================================================

use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

use crate::types::Direction;

/// Every message kind the engine publishes in-process.
#[derive(Debug, Clone, Serialize)]
pub enum EngineEvent {
    /// A pre-computation cycle refreshed the tripwire watchlist.
    TripwireMapUpdated {
        generation: u64,
        symbols: usize,
        tripwires: usize,
    },
    /// A tripwire reached ACTIVATED and produced (or ghosted) an intent.
    TripwireSprung {
        signal_id: String,
        symbol: String,
        direction: Direction,
        ghost: bool,
    },
    /// The execution side finished a venue round-trip for a child order.
    ExecutionComplete {
        signal_id: String,
        client_order_id: String,
        venue: String,
        executed: bool,
    },
    /// A config override or hot reload changed an effective value.
    ConfigChanged {
        key: String,
        prev: String,
        next: String,
    },
    /// The signed-intent client exhausted its reconnect attempts.
    IpcConnectionFailed { attempts: u32 },
    /// A risk-posture change the operator must see.
    PostureChanged {
        posture: String,
        reason: String,
    },
    /// An intent failed schema validation and was dead-lettered.
    DeadLetter {
        reason: String,
        payload: String,
    },
    /// A component-level diagnostic (malformed candle, rejected symbol, ...).
    Diagnostic {
        component: String,
        message: String,
    },
}

impl EngineEvent {
    /// Stable subject name used when an event is mirrored onto an external
    /// message bus. Consumers key idempotency off correlation ids, not
    /// subjects.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::TripwireMapUpdated { .. } => "evt.tripwire.map",
            Self::TripwireSprung { .. } => "signal.submit",
            Self::ExecutionComplete { .. } => "cmd.exec.place.done",
            Self::ConfigChanged { .. } => "evt.config.changed",
            Self::IpcConnectionFailed { .. } => "evt.ipc.failed",
            Self::PostureChanged { .. } => "evt.phase.posture",
            Self::DeadLetter { .. } => "evt.exec.deadletter",
            Self::Diagnostic { .. } => "evt.diagnostic",
        }
    }
}

type Handler = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// In-process pub/sub hub. Cheap to clone via `Arc`.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a synchronous handler. Handlers must be fast; anything slow
    /// should use [`EventBus::subscribe_channel`] instead.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    /// Register a channel subscription for async consumers. Events are
    /// cloned into the channel; a dropped receiver is tolerated.
    pub fn subscribe_channel(&self) -> tokio::sync::mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.subscribe(move |event| {
            if tx.send(event.clone()).is_err() {
                warn!(subject = event.subject(), "bus channel receiver dropped");
            }
        });
        rx
    }

    /// Deliver `event` to every handler. A handler that panics is isolated:
    /// the panic is caught, logged, and the remaining handlers still run.
    pub fn publish(&self, event: EngineEvent) {
        let handlers = self.handlers.read();
        for handler in handlers.iter() {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(subject = event.subject(), "event handler panicked — isolated");
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn diagnostic() -> EngineEvent {
        EngineEvent::Diagnostic {
            component: "test".into(),
            message: "hello".into(),
        }
    }

    #[test]
    fn delivers_to_all_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let c = count.clone();
            bus.subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(diagnostic());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));

        bus.subscribe(|_| panic!("boom"));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(diagnostic());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_subscription_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();
        bus.publish(diagnostic());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject(), "evt.diagnostic");
    }

    #[test]
    fn subjects_are_stable() {
        let e = EngineEvent::TripwireSprung {
            signal_id: "s".into(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            ghost: false,
        };
        assert_eq!(e.subject(), "signal.submit");
        let e = EngineEvent::PostureChanged {
            posture: "critical".into(),
            reason: "delta".into(),
        };
        assert_eq!(e.subject(), "evt.phase.posture");
    }
}
