// =============================================================================
// TWAP Executor — clipped, abortable scheduled execution
// =============================================================================
//
// Splits `total_size` into clips of at most `max_clip_size`, spaced by an
// interval clamped to [min, max] over the schedule duration. The schedule
// aborts on the first clip whose slippage exceeds the bound; prior clips
// remain filled and the partial result is returned. `abort()` is
// idempotent, and only one schedule may run per executor at a time.
// =============================================================================

use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ConfigSnapshot;

/// Schedule parameters, usually sampled from the `twap.*` config items.
#[derive(Debug, Clone, Copy)]
pub struct TwapParams {
    pub total_size: Decimal,
    pub max_clip_size: Decimal,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub duration: Duration,
    /// Absolute slippage bound, e.g. 0.002 for 0.2%.
    pub max_slippage: Decimal,
}

impl TwapParams {
    pub fn from_snapshot(total_size: Decimal, snap: &ConfigSnapshot) -> Self {
        Self {
            total_size,
            max_clip_size: Decimal::try_from(snap.f64("twap.max_clip_size").unwrap_or(300.0))
                .unwrap_or(Decimal::new(300, 0)),
            min_interval: Duration::from_millis(
                snap.i64("twap.min_interval_ms").unwrap_or(1_000) as u64,
            ),
            max_interval: Duration::from_millis(
                snap.i64("twap.max_interval_ms").unwrap_or(10_000) as u64,
            ),
            duration: Duration::from_millis(snap.i64("twap.duration_ms").unwrap_or(30_000) as u64),
            max_slippage: Decimal::try_from(snap.f64("twap.max_slippage_pct").unwrap_or(0.002))
                .unwrap_or(Decimal::new(2, 3)),
        }
    }
}

/// One executed clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipFill {
    pub clip: u32,
    pub size: Decimal,
    pub fill_price: Decimal,
    pub mark_price: Decimal,
    /// (fill − mark) / mark.
    pub slippage: Decimal,
}

/// Outcome of a schedule, partial when aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct TwapResult {
    pub total_filled: Decimal,
    pub clips: Vec<ClipFill>,
    pub aborted: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum TwapError {
    #[error("a schedule is already running")]
    Busy,
    #[error("schedule parameters invalid: {0}")]
    BadParams(&'static str),
}

/// Abortable clip scheduler. One instance, one schedule at a time.
pub struct TwapExecutor {
    running: AtomicBool,
    abort: AtomicBool,
}

impl TwapExecutor {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            abort: AtomicBool::new(false),
        }
    }

    /// Request an abort. Idempotent; a no-op when nothing runs.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a schedule. `fill` places one clip and returns
    /// `(fill_price, mark_price)`.
    pub async fn execute<F, Fut>(
        &self,
        params: TwapParams,
        mut fill: F,
    ) -> Result<TwapResult, TwapError>
    where
        F: FnMut(Decimal) -> Fut,
        Fut: Future<Output = anyhow::Result<(Decimal, Decimal)>>,
    {
        if params.total_size <= Decimal::ZERO || params.max_clip_size <= Decimal::ZERO {
            return Err(TwapError::BadParams("sizes must be positive"));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TwapError::Busy);
        }
        // A fresh schedule clears any abort left over from the previous one.
        self.abort.store(false, Ordering::SeqCst);

        let result = self.run_clips(params, &mut fill).await;
        self.running.store(false, Ordering::SeqCst);
        Ok(result)
    }

    async fn run_clips<F, Fut>(&self, params: TwapParams, fill: &mut F) -> TwapResult
    where
        F: FnMut(Decimal) -> Fut,
        Fut: Future<Output = anyhow::Result<(Decimal, Decimal)>>,
    {
        let clips = plan_clips(params.total_size, params.max_clip_size);
        let interval = plan_interval(&params, clips.len());

        let mut result = TwapResult {
            total_filled: Decimal::ZERO,
            clips: Vec::with_capacity(clips.len()),
            aborted: false,
            reason: None,
        };

        for (index, clip_size) in clips.iter().enumerate() {
            if self.abort.load(Ordering::SeqCst) {
                result.aborted = true;
                result.reason = Some("aborted by operator".to_string());
                break;
            }

            let (fill_price, mark_price) = match fill(*clip_size).await {
                Ok(prices) => prices,
                Err(e) => {
                    warn!(clip = index + 1, error = %e, "clip placement failed — aborting schedule");
                    result.aborted = true;
                    result.reason = Some(format!("clip {} failed: {e}", index + 1));
                    break;
                }
            };

            let slippage = if mark_price.is_zero() {
                Decimal::ZERO
            } else {
                (fill_price - mark_price) / mark_price
            };
            result.clips.push(ClipFill {
                clip: index as u32 + 1,
                size: *clip_size,
                fill_price,
                mark_price,
                slippage,
            });
            result.total_filled += *clip_size;

            if slippage.abs() > params.max_slippage {
                result.aborted = true;
                result.reason = Some(format!(
                    "slippage {} > {}",
                    slippage.abs().normalize(),
                    params.max_slippage.normalize()
                ));
                warn!(clip = index + 1, reason = %result.reason.as_deref().unwrap_or(""), "slippage bound hit");
                break;
            }

            let last = index + 1 == clips.len();
            if !last && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        info!(
            filled = %result.total_filled,
            clips = result.clips.len(),
            aborted = result.aborted,
            "schedule finished"
        );
        result
    }
}

impl Default for TwapExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn plan_clips(total: Decimal, max_clip: Decimal) -> Vec<Decimal> {
    let mut clips = Vec::new();
    let mut remaining = total;
    while remaining > Decimal::ZERO {
        let clip = remaining.min(max_clip);
        clips.push(clip);
        remaining -= clip;
    }
    clips
}

fn plan_interval(params: &TwapParams, clip_count: usize) -> Duration {
    if clip_count <= 1 {
        return Duration::ZERO;
    }
    let even = params.duration / (clip_count as u32);
    even.clamp(params.min_interval, params.max_interval)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(total: Decimal, max_clip: Decimal) -> TwapParams {
        TwapParams {
            total_size: total,
            max_clip_size: max_clip,
            min_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            duration: Duration::ZERO,
            max_slippage: dec!(0.002),
        }
    }

    #[test]
    fn clip_plan_splits_with_remainder() {
        let clips = plan_clips(dec!(700), dec!(300));
        assert_eq!(clips, vec![dec!(300), dec!(300), dec!(100)]);
        assert_eq!(plan_clips(dec!(300), dec!(300)), vec![dec!(300)]);
    }

    #[tokio::test]
    async fn full_schedule_fills_everything() {
        let executor = TwapExecutor::new();
        let result = executor
            .execute(params(dec!(700), dec!(300)), |_clip| async {
                Ok((dec!(100.1), dec!(100.0)))
            })
            .await
            .unwrap();

        assert!(!result.aborted);
        assert_eq!(result.total_filled, dec!(700));
        assert_eq!(result.clips.len(), 3);
        assert_eq!(result.clips[0].slippage, dec!(0.001));
    }

    #[tokio::test]
    async fn aborts_on_first_clip_over_slippage_bound() {
        // Clip 1 fills at +0.1%, clip 2 at +0.3%: abort after clip 2 with
        // the partial total.
        let executor = TwapExecutor::new();
        let mut clip_no = 0;
        let result = executor
            .execute(params(dec!(700), dec!(300)), move |_clip| {
                clip_no += 1;
                let fill = if clip_no == 1 { dec!(100.1) } else { dec!(100.3) };
                async move { Ok((fill, dec!(100.0))) }
            })
            .await
            .unwrap();

        assert!(result.aborted);
        assert_eq!(result.total_filled, dec!(600));
        assert_eq!(result.clips.len(), 2);
        assert_eq!(result.reason.as_deref(), Some("slippage 0.003 > 0.002"));
    }

    #[tokio::test]
    async fn boundary_slippage_does_not_abort() {
        let executor = TwapExecutor::new();
        let result = executor
            .execute(params(dec!(600), dec!(300)), |_clip| async {
                Ok((dec!(100.2), dec!(100.0))) // exactly 0.002
            })
            .await
            .unwrap();
        assert!(!result.aborted);
        assert_eq!(result.total_filled, dec!(600));
    }

    #[tokio::test]
    async fn only_one_schedule_at_a_time() {
        let executor = std::sync::Arc::new(TwapExecutor::new());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let e2 = executor.clone();
        let first = tokio::spawn(async move {
            let mut started = Some(started_tx);
            let mut release = Some(release_rx);
            e2.execute(params(dec!(300), dec!(300)), move |_clip| {
                let started = started.take();
                let release = release.take();
                async move {
                    if let Some(tx) = started {
                        let _ = tx.send(());
                    }
                    if let Some(rx) = release {
                        let _ = rx.await;
                    }
                    Ok((dec!(100), dec!(100)))
                }
            })
            .await
        });

        started_rx.await.unwrap();
        let second = executor
            .execute(params(dec!(100), dec!(100)), |_clip| async {
                Ok((dec!(100), dec!(100)))
            })
            .await;
        assert_eq!(second.unwrap_err(), TwapError::Busy);

        let _ = release_tx.send(());
        let first = first.await.unwrap().unwrap();
        assert!(!first.aborted);
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_new_schedule_may_start() {
        let executor = TwapExecutor::new();
        executor.abort();
        executor.abort();

        // The abort flag resets when a schedule starts.
        let result = executor
            .execute(params(dec!(100), dec!(100)), |_clip| async {
                Ok((dec!(100), dec!(100)))
            })
            .await
            .unwrap();
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn failed_clip_aborts_with_partial_result() {
        let executor = TwapExecutor::new();
        let mut clip_no = 0;
        let result = executor
            .execute(params(dec!(600), dec!(300)), move |_clip| {
                clip_no += 1;
                async move {
                    if clip_no == 1 {
                        Ok((dec!(100), dec!(100)))
                    } else {
                        anyhow::bail!("venue unavailable")
                    }
                }
            })
            .await
            .unwrap();
        assert!(result.aborted);
        assert_eq!(result.total_filled, dec!(300));
        assert!(result.reason.unwrap().contains("venue unavailable"));
    }

    #[test]
    fn interval_clamped() {
        let mut p = params(dec!(900), dec!(300));
        p.duration = Duration::from_secs(30);
        p.min_interval = Duration::from_secs(1);
        p.max_interval = Duration::from_secs(5);
        // 30s / 3 clips = 10s, clamped to 5s.
        assert_eq!(plan_interval(&p, 3), Duration::from_secs(5));
        // Single clip never waits.
        assert_eq!(plan_interval(&p, 1), Duration::ZERO);
    }
}
