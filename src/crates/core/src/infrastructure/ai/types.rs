//! Conversation and file types shared by the provider layer and the session.
//!
//! The serde shapes match the Gemini `Content` schema so turns can be sent
//! to the provider without a conversion pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Durable handle to an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    #[serde(rename = "fileUri")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One part of a turn: either text or a file reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, rename = "fileData", skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<FileReference>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file_reference: None,
        }
    }

    pub fn file(reference: FileReference) -> Self {
        Self {
            text: None,
            file_reference: Some(reference),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<String>()
    }

    /// True when the turn is a single text part equal to `trigger`.
    pub fn is_exactly_text(&self, trigger: &str) -> bool {
        matches!(self.parts.as_slice(), [only] if only.file_reference.is_none()
            && only.text.as_deref() == Some(trigger))
    }

    pub fn references_file(&self, uri: &str) -> bool {
        self.parts
            .iter()
            .any(|p| p.file_reference.as_ref().is_some_and(|f| f.uri == uri))
    }
}

/// Per-request configuration block.
///
/// `temperature` is `None` when the sampling override is disabled; the field
/// is then left out of the request entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    pub system_instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Turn>,
    pub config: RequestConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u64>,
    #[serde(default)]
    pub candidates_token_count: Option<u64>,
    #[serde(default)]
    pub total_token_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<UsageMetadata>,
    /// Raw provider payload, kept for the trace.
    #[serde(default)]
    pub raw: Value,
}

impl GenerateResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            raw: Value::Null,
        }
    }

    pub fn candidates_token_count(&self) -> Option<u64> {
        self.usage.as_ref().and_then(|u| u.candidates_token_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
    #[serde(other)]
    StateUnspecified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub state: FileState,
}

impl UploadedFile {
    pub fn reference(&self) -> FileReference {
        FileReference {
            uri: self.uri.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// The document being distilled, held in memory for (re-)uploads.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Guess the mime type from the file extension.
    pub fn mime_type_for(name: &str) -> &'static str {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("pdf") => "application/pdf",
            Some("epub") => "application/epub+zip",
            Some("txt") => "text/plain",
            Some("md") | Some("markdown") => "text/markdown",
            Some("html") | Some("htm") => "text/html",
            _ => "application/octet-stream",
        }
    }
}
