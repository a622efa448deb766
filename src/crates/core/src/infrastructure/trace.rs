//! Diagnostic trace of every attempted turn and provider step.

use crate::infrastructure::ai::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl TraceError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status: None,
            status: None,
            raw: None,
        }
    }
}

impl From<&ProviderError> for TraceError {
    fn from(err: &ProviderError) -> Self {
        Self {
            message: err.message.clone(),
            http_status: err.http_status,
            status: err.provider_status().map(|s| s.to_string()),
            raw: err.body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    /// RFC 3339 timestamp.
    pub ts: String,
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
    pub retries: u32,
}

impl TraceEntry {
    pub fn success(request: Value, response: Value, retries: u32) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            request,
            response: Some(response),
            error: None,
            retries,
        }
    }

    pub fn failure(request: Value, error: TraceError, retries: u32) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            request,
            response: None,
            error: Some(error),
            retries,
        }
    }
}

/// Append-only sink for trace entries.
pub trait TraceSink: Send {
    fn push(&mut self, entry: TraceEntry);
}

/// In-memory trace, exported as pretty JSON.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    entries: Vec<TraceEntry>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}

impl TraceSink for TraceLog {
    fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }
}
