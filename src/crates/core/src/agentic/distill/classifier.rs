//! Transient-error classification and server-suggested retry delays.
//!
//! Provider errors arrive in several shapes: an HTTP status on the response,
//! a numeric or string `code` inside the JSON error body, or a textual
//! `status` such as `RESOURCE_EXHAUSTED`. [`ErrorShape`] gathers every
//! candidate once so the predicates below never care where a value came from.

use crate::infrastructure::ai::ProviderError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

const TRANSIENT_STATUS_NAMES: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "INTERNAL",
    "UNAVAILABLE",
    "ABORTED",
    "DEADLINE_EXCEEDED",
];

const RETRY_INFO_TYPE: &str = "google.rpc.RetryInfo";

/// Status values extracted from a provider error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorShape {
    pub codes: Vec<u16>,
    pub names: Vec<String>,
    pub offline: bool,
}

impl ErrorShape {
    pub fn of(err: &ProviderError) -> Self {
        let mut shape = Self {
            offline: err.offline,
            ..Self::default()
        };
        if let Some(body) = &err.body {
            for pointer in ["/error/code", "/code", "/statusCode", "/status"] {
                if let Some(value) = body.pointer(pointer) {
                    shape.push_value(value);
                }
            }
            for pointer in ["/error/status", "/statusText"] {
                if let Some(value) = body.pointer(pointer) {
                    shape.push_value(value);
                }
            }
        }
        if let Some(status) = err.http_status {
            shape.push_code(status);
        }
        shape
    }

    fn push_value(&mut self, value: &Value) {
        match value {
            Value::Number(n) => {
                if let Some(code) = n.as_u64().and_then(|c| u16::try_from(c).ok()) {
                    self.push_code(code);
                }
            }
            Value::String(s) => {
                let s = s.trim();
                match s.parse::<u16>() {
                    Ok(code) => self.push_code(code),
                    Err(_) if !s.is_empty() => {
                        let name = s.to_ascii_uppercase();
                        if !self.names.contains(&name) {
                            self.names.push(name);
                        }
                    }
                    Err(_) => {}
                }
            }
            _ => {}
        }
    }

    fn push_code(&mut self, code: u16) {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
    }

    pub fn is_transient(&self) -> bool {
        self.offline
            || self.codes.iter().copied().any(is_transient_code)
            || self
                .names
                .iter()
                .any(|n| TRANSIENT_STATUS_NAMES.contains(&n.as_str()))
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// 429, 408, 425 and the whole 5xx range are worth retrying.
pub fn is_transient_code(code: u16) -> bool {
    matches!(code, 408 | 425 | 429 | 500..=599)
}

/// Rate limiting or a server-side failure.
pub fn is_rate_limit_or_server_code(code: u16) -> bool {
    code == 429 || (500..=599).contains(&code)
}

pub fn is_transient(err: &ProviderError) -> bool {
    ErrorShape::of(err).is_transient()
}

/// Delay the server asked for, if it asked.
///
/// A structured `RetryInfo` detail in the error body wins over the
/// `retry-after` header.
pub fn parse_retry_delay(err: &ProviderError) -> Option<Duration> {
    parse_retry_delay_at(err, Utc::now())
}

/// Same as [`parse_retry_delay`], with an explicit clock for HTTP-date headers.
pub fn parse_retry_delay_at(err: &ProviderError, now: DateTime<Utc>) -> Option<Duration> {
    retry_info_delay(err).or_else(|| retry_after_delay(err, now))
}

fn retry_info_delay(err: &ProviderError) -> Option<Duration> {
    let details = err.body.as_ref()?.pointer("/error/details")?.as_array()?;
    details
        .iter()
        .filter(|d| {
            d.get("@type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.contains(RETRY_INFO_TYPE))
        })
        .find_map(|d| {
            let delay = d.get("retryDelay").or_else(|| d.get("retry_delay"))?;
            delay_from_value(delay)
        })
}

fn delay_from_value(value: &Value) -> Option<Duration> {
    match value {
        Value::Object(map) => {
            let seconds = map.get("seconds").and_then(number_like).unwrap_or(0.0);
            let nanos = map.get("nanos").and_then(number_like).unwrap_or(0.0);
            millis_from_secs(seconds + nanos / 1e9)
        }
        Value::String(s) => {
            let caps = seconds_suffix_regex().captures(s)?;
            let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
            millis_from_secs(secs)
        }
        _ => None,
    }
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn millis_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_millis((secs * 1000.0).floor() as u64))
}

fn retry_after_delay(err: &ProviderError, now: DateTime<Utc>) -> Option<Duration> {
    let raw = err.header("retry-after")?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<f64>() {
        return millis_from_secs(secs.max(0.0));
    }
    let when = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delta_ms = (when - now).num_milliseconds().max(0);
    Some(Duration::from_millis(delta_ms as u64))
}

fn seconds_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)s").expect("valid retry delay regex"))
}

/// Outcome of classifying one failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub transient: bool,
    pub suggested_wait: Option<Duration>,
}

pub fn classify(err: &ProviderError) -> Classification {
    let transient = is_transient(err);
    Classification {
        transient,
        suggested_wait: if transient { parse_retry_delay(err) } else { None },
    }
}

/// The uploaded file behind a reference is gone or unusable.
pub fn is_stale_file_error(err: &ProviderError) -> bool {
    ErrorShape::of(err).has_name("FAILED_PRECONDITION")
        || err.message.to_lowercase().contains("unsupported file uri")
}
