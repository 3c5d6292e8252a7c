// =============================================================================
// Tick Queue — bounded per-symbol backpressure that never drops a match
// =============================================================================
//
// When the queue is full, the oldest NON-matching tick is evicted and a drop
// counter incremented. Ticks flagged as matching (within arming proximity of
// a live trigger) are never dropped: if the queue is full of matches, the
// queue grows past its soft capacity rather than lose one.
// =============================================================================

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Trade;

/// Bounded FIFO of `(trade, matching)` pairs for one symbol shard.
pub struct TickQueue {
    inner: Mutex<VecDeque<(Trade, bool)>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a tick. `matching` marks trades within arming proximity of
    /// any live trigger. Returns the number of ticks dropped by this push.
    pub fn push(&self, trade: Trade, matching: bool) -> u64 {
        let mut queue = self.inner.lock();
        let mut dropped = 0u64;

        if queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(|(_, m)| !*m) {
                queue.remove(pos);
                dropped += 1;
            } else if !matching {
                // Full of matching ticks; the non-matching newcomer loses.
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return 1;
            }
            // Otherwise the queue is full of matches and the newcomer also
            // matches: grow past the soft capacity rather than drop it.
        }

        queue.push_back((trade, matching));
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        dropped
    }

    /// Dequeue the oldest tick.
    pub fn pop(&self) -> Option<Trade> {
        self.inner.lock().pop_front().map(|(trade, _)| trade)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total ticks dropped since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(ts: i64) -> Trade {
        Trade {
            symbol: "BTCUSDT".into(),
            price: dec!(100),
            qty: dec!(1),
            timestamp_ms: ts,
            buyer_is_maker: false,
        }
    }

    #[test]
    fn fifo_order() {
        let q = TickQueue::new(4);
        q.push(trade(1), false);
        q.push(trade(2), false);
        assert_eq!(q.pop().unwrap().timestamp_ms, 1);
        assert_eq!(q.pop().unwrap().timestamp_ms, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn overflow_drops_oldest_non_matching() {
        let q = TickQueue::new(2);
        q.push(trade(1), false);
        q.push(trade(2), true);
        q.push(trade(3), false); // evicts ts=1

        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop().unwrap().timestamp_ms, 2);
        assert_eq!(q.pop().unwrap().timestamp_ms, 3);
    }

    #[test]
    fn matching_ticks_never_dropped() {
        let q = TickQueue::new(2);
        q.push(trade(1), true);
        q.push(trade(2), true);
        // Queue full of matches: a matching push grows the queue.
        q.push(trade(3), true);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 0);

        // A non-matching push against a full matching queue loses itself.
        let dropped = q.push(trade(4), false);
        assert_eq!(dropped, 1);
        assert_eq!(q.len(), 3);
        let survivors: Vec<i64> = std::iter::from_fn(|| q.pop()).map(|t| t.timestamp_ms).collect();
        assert_eq!(survivors, vec![1, 2, 3]);
    }
}
