//! Structured provider failures.
//!
//! A `ProviderError` keeps everything a provider told us about a failure
//! (HTTP status, JSON error body, response headers) without interpreting it.
//! Interpretation lives in `agentic::distill::classifier`.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// HTTP status of the failed response, if one was received.
    pub http_status: Option<u16>,
    /// Parsed JSON error body, e.g. `{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", ...}}`.
    pub body: Option<Value>,
    /// Response headers, names lower-cased.
    pub headers: HashMap<String, String>,
    /// The request never reached the provider (connect failure or timeout).
    pub offline: bool,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status: None,
            body: None,
            headers: HashMap::new(),
            offline: false,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Build from a non-success HTTP response.
    pub fn from_response(status: u16, headers: HashMap<String, String>, body_text: &str) -> Self {
        let body = serde_json::from_str::<Value>(body_text).ok();
        let message = body
            .as_ref()
            .and_then(|b| b.pointer("/error/message"))
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| {
                let trimmed = body_text.trim();
                if trimmed.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    format!("HTTP {}: {}", status, truncate(trimmed, 300))
                }
            });
        Self {
            message,
            http_status: Some(status),
            body,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            offline: false,
        }
    }

    /// Build from a transport-level `reqwest` failure.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            http_status: err.status().map(|s| s.as_u16()),
            body: None,
            headers: HashMap::new(),
            offline: err.is_connect() || err.is_timeout(),
        }
    }

    /// Provider status string from the JSON body (`error.status`), if any.
    pub fn provider_status(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.pointer("/error/status"))
            .and_then(|s| s.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{}...", head)
}
