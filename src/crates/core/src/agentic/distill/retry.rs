//! Retrying call executor.
//!
//! Runs one provider call until it succeeds, fails with a non-transient
//! error, or the session stops wanting it. Between attempts it waits the
//! server-suggested delay, or a jittered exponential backoff, in cancellable
//! ticks while publishing a countdown.

use super::classifier::classify;
use super::timer::CancellableWait;
use crate::infrastructure::ai::ProviderError;
use crate::infrastructure::events::{DistillEvent, EventEmitter};
use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Capped exponential delay for `attempt`, before jitter.
pub fn backoff_base(attempt: u32) -> Duration {
    let multiplier = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(multiplier).min(MAX_BACKOFF_MS))
}

/// [`backoff_base`] scaled by a random factor in `[0.75, 1.25)`.
pub fn jittered_backoff(attempt: u32) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.75..1.25);
    Duration::from_millis((backoff_base(attempt).as_millis() as f64 * factor) as u64)
}

/// A transient failure about to be retried.
#[derive(Debug)]
pub struct TransientEvent<'a> {
    /// Zero-based retry index.
    pub attempt: u32,
    /// Wait the executor would use on its own.
    pub wait: Duration,
    pub error: &'a ProviderError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientDecision {
    Retry {
        wait: Duration,
        max_attempts: Option<u32>,
        label: String,
    },
    /// Give up on this call.
    Halt { reason: String },
}

/// Caller policy consulted on every transient failure.
pub trait TransientHook: Send + Sync {
    fn on_transient(&self, event: &TransientEvent<'_>) -> TransientDecision;
}

#[derive(Debug, Clone)]
pub enum CallFailure {
    /// The continuation predicate turned false.
    Aborted,
    /// Non-transient provider error.
    Provider(ProviderError),
    /// The hook refused to retry a transient error.
    RetriesExhausted { error: ProviderError, reason: String },
}

impl CallFailure {
    pub fn is_aborted(&self) -> bool {
        matches!(self, CallFailure::Aborted)
    }
}

#[derive(Debug)]
pub struct CallOutcome<T> {
    pub result: Result<T, CallFailure>,
    /// Retries performed before the final result.
    pub attempts: u32,
}

pub type ContinuePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct RetryExecutor {
    should_continue: ContinuePredicate,
    hook: Option<Arc<dyn TransientHook>>,
    events: EventEmitter,
    timer: CancellableWait,
}

impl RetryExecutor {
    pub fn new(should_continue: ContinuePredicate) -> Self {
        Self {
            should_continue,
            hook: None,
            events: EventEmitter::disabled(),
            timer: CancellableWait::default(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn TransientHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_timer(mut self, timer: CancellableWait) -> Self {
        self.timer = timer;
        self
    }

    fn should_continue(&self) -> bool {
        (self.should_continue)()
    }

    /// Run `unit` with retries.
    pub async fn execute<T, F, Fut>(&self, mut unit: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        while self.should_continue() {
            let err = match unit().await {
                Ok(value) => {
                    self.clear_progress(attempt);
                    return CallOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            let classification = classify(&err);
            if !classification.transient {
                debug!(
                    "Non-transient provider error: attempt={}, message={}",
                    attempt, err.message
                );
                self.clear_progress(attempt);
                return CallOutcome {
                    result: Err(CallFailure::Provider(err)),
                    attempts: attempt,
                };
            }

            let default_wait = classification
                .suggested_wait
                .unwrap_or_else(|| jittered_backoff(attempt));
            let decision = match &self.hook {
                Some(hook) => hook.on_transient(&TransientEvent {
                    attempt,
                    wait: default_wait,
                    error: &err,
                }),
                None => TransientDecision::Retry {
                    wait: default_wait,
                    max_attempts: None,
                    label: "transient error".to_string(),
                },
            };

            let (wait, max_attempts, label) = match decision {
                TransientDecision::Retry {
                    wait,
                    max_attempts,
                    label,
                } => (wait, max_attempts, label),
                TransientDecision::Halt { reason } => {
                    warn!(
                        "Retry halted: attempt={}, reason={}, error={}",
                        attempt, reason, err.message
                    );
                    self.clear_progress(attempt);
                    return CallOutcome {
                        result: Err(CallFailure::RetriesExhausted { error: err, reason }),
                        attempts: attempt,
                    };
                }
            };

            warn!(
                "Transient provider error, retrying: attempt={}, wait_ms={}, reason={}, error={}",
                attempt,
                wait.as_millis(),
                label,
                err.message
            );
            let planned_ms = wait.as_millis() as u64;
            let progress = |remaining: Duration| {
                self.events.emit(DistillEvent::RetryProgress {
                    reason: label.clone(),
                    attempt,
                    max: max_attempts,
                    planned_ms,
                    remaining_ms: remaining.as_millis() as u64,
                    last_error: err.message.clone(),
                });
            };
            progress(wait);
            let outcome = self
                .timer
                .wait(wait, || self.should_continue(), progress)
                .await;
            if outcome.is_interrupted() || !self.should_continue() {
                break;
            }
            attempt += 1;
        }

        debug!("Call aborted: attempts={}", attempt);
        self.events.emit(DistillEvent::RetryCleared);
        CallOutcome {
            result: Err(CallFailure::Aborted),
            attempts: attempt,
        }
    }

    fn clear_progress(&self, attempt: u32) {
        if attempt > 0 {
            self.events.emit(DistillEvent::RetryCleared);
        }
    }
}
