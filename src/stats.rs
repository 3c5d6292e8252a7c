// =============================================================================
// Rolling Statistics Kernel — fixed-capacity windows with online aggregates
// =============================================================================
//
// Pure computation: no locks, no async, no allocation beyond the ring itself.
// Callers that need thread safety wrap a window in their own RwLock.
//
// Float math is confined to this kernel and the tripwire calculators; order
// sizing and PnL stay in Decimal.
// =============================================================================

use std::collections::VecDeque;

/// Fixed-capacity rolling window over f64 samples.
///
/// Pushing beyond capacity evicts the oldest sample. Mean and variance are
/// maintained online (sum / sum of squares) so `mean()` and `std_dev()` are
/// O(1); `percentile()` sorts a copy and is O(n log n).
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl RollingWindow {
    /// Create a window holding at most `capacity` samples.
    ///
    /// A zero capacity is clamped to 1 so the window is always usable.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Push a sample, evicting the oldest when full. Non-finite samples are
    /// ignored so one bad tick cannot poison the aggregates.
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.samples.len() == self.capacity {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Arithmetic mean, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.sum / self.samples.len() as f64)
    }

    /// Sample standard deviation (n-1 denominator), `None` with fewer than
    /// two samples.
    pub fn std_dev(&self) -> Option<f64> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        let n_f = n as f64;
        let mean = self.sum / n_f;
        // Guard the subtraction: catastrophic cancellation can produce a tiny
        // negative variance for near-constant series.
        let variance = ((self.sum_sq - n_f * mean * mean) / (n_f - 1.0)).max(0.0);
        Some(variance.sqrt())
    }

    /// Z-score of `value` against the window, `None` when std-dev is
    /// unavailable or zero.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let mean = self.mean()?;
        let sd = self.std_dev()?;
        if sd == 0.0 {
            return None;
        }
        Some((value - mean) / sd)
    }

    /// Nearest-rank percentile, `p` in [0, 100]. `None` when empty or `p` is
    /// out of range.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() || !(0.0..=100.0).contains(&p) {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("samples are finite"));

        let n = sorted.len();
        if p == 0.0 {
            return Some(sorted[0]);
        }
        let rank = ((p / 100.0) * n as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, n) - 1])
    }

    /// Minimum of the window, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().fold(None, |acc, v| match acc {
            None => Some(v),
            Some(m) => Some(m.min(v)),
        })
    }

    /// Maximum of the window, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().fold(None, |acc, v| match acc {
            None => Some(v),
            Some(m) => Some(m.max(v)),
        })
    }
}
