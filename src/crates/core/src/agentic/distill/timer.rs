//! Interruptible countdown used for retry backoff, anomaly retries,
//! file-status polling and request spacing.

use std::time::Duration;

/// Default tick: pause and stop are observed within this interval.
pub const WAIT_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Interrupted { remaining: Duration },
}

impl WaitOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WaitOutcome::Interrupted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CancellableWait {
    tick: Duration,
}

impl Default for CancellableWait {
    fn default() -> Self {
        Self { tick: WAIT_TICK }
    }
}

impl CancellableWait {
    pub fn with_tick(tick: Duration) -> Self {
        Self {
            tick: if tick.is_zero() { WAIT_TICK } else { tick },
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Sleep for `total` in ticks.
    ///
    /// `keep_waiting` is checked before every tick; `on_tick` receives the
    /// remaining time after each one.
    pub async fn wait<P, T>(&self, total: Duration, keep_waiting: P, mut on_tick: T) -> WaitOutcome
    where
        P: Fn() -> bool,
        T: FnMut(Duration),
    {
        let mut remaining = total;
        while !remaining.is_zero() {
            if !keep_waiting() {
                return WaitOutcome::Interrupted { remaining };
            }
            let step = remaining.min(self.tick);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
            on_tick(remaining);
        }
        WaitOutcome::Elapsed
    }
}
