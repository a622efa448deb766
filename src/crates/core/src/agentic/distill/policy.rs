//! Session retry policy applied to transient provider failures.

use super::classifier::{is_rate_limit_or_server_code, ErrorShape};
use super::retry::{TransientDecision, TransientEvent, TransientHook};
use std::time::Duration;

/// Rate-limit and server failures wait a fixed interval and are capped;
/// every other transient failure uses the executor's own delay, unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub rate_limit_wait: Duration,
    pub max_auto_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_wait: Duration::from_secs(60),
            max_auto_retries: 4,
        }
    }
}

impl TransientHook for RetryPolicy {
    fn on_transient(&self, event: &TransientEvent<'_>) -> TransientDecision {
        let code = ErrorShape::of(event.error)
            .codes
            .into_iter()
            .find(|c| is_rate_limit_or_server_code(*c));
        let Some(code) = code else {
            return TransientDecision::Retry {
                wait: event.wait,
                max_attempts: None,
                label: "transient error".to_string(),
            };
        };

        if event.attempt + 1 >= self.max_auto_retries {
            return TransientDecision::Halt {
                reason: "auto-retry limit reached".to_string(),
            };
        }
        TransientDecision::Retry {
            wait: self.rate_limit_wait,
            max_attempts: Some(self.max_auto_retries),
            label: if code == 429 {
                "rate limited".to_string()
            } else {
                "server overloaded".to_string()
            },
        }
    }
}
