//! Gemini REST client
//!
//! Implements `GenerationProvider` on top of the Generative Language API:
//! `models/{model}:generateContent`, the resumable Files upload protocol, and
//! `files/{id}` status lookups.

use super::error::ProviderError;
use super::provider::GenerationProvider;
use super::types::{
    GenerateRequest, GenerateResponse, SourceDocument, Turn, UploadedFile, UsageMetadata,
};
use crate::util::errors::{DistillError, DistillResult};
use async_trait::async_trait;
use log::{debug, trace};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const CONNECT_TIMEOUT_SECS: u64 = 10;
// Long book turns can take several minutes to generate.
const REQUEST_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl<'a> From<&'a GenerateRequest> for GenerateContentBody<'a> {
    fn from(request: &'a GenerateRequest) -> Self {
        let instruction = request.config.system_instruction.as_str();
        Self {
            contents: &request.contents,
            system_instruction: (!instruction.trim().is_empty()).then(|| SystemInstruction {
                parts: vec![TextPart { text: instruction }],
            }),
            generation_config: request
                .config
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, all parts concatenated.
    fn first_candidate_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: UploadedFile,
}

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> DistillResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> DistillResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(DistillError::config("Gemini API key is empty"));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(DistillError::Http)?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.trim().to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn check_response(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = header_map_to_hash(response.headers());
        let body = response.text().await.unwrap_or_default();
        debug!(
            "Gemini request failed: status={}, body_len={}",
            status.as_u16(),
            body.len()
        );
        Err(ProviderError::from_response(status.as_u16(), headers, &body))
    }

    async fn read_json(response: Response) -> Result<Value, ProviderError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::from_transport(&e))
    }
}

fn header_map_to_hash(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, ProviderError> {
    serde_json::from_value(value.clone()).map_err(|e| {
        ProviderError::new(format!("Malformed {} response: {}", what, e)).with_body(value)
    })
}

#[async_trait]
impl GenerationProvider for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let url = self.url(&format!("v1beta/models/{}:generateContent", request.model));
        let body = GenerateContentBody::from(request);
        trace!(
            "Gemini generateContent: model={}, turns={}",
            request.model,
            request.contents.len()
        );

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;
        let response = Self::check_response(response).await?;
        let raw = Self::read_json(response).await?;
        let parsed: GenerateContentResponse = decode(raw.clone(), "generateContent")?;

        Ok(GenerateResponse {
            text: parsed.first_candidate_text(),
            usage: parsed.usage_metadata,
            raw,
        })
    }

    async fn upload_file(&self, document: &SourceDocument) -> Result<UploadedFile, ProviderError> {
        debug!(
            "Gemini upload start: name={}, mime_type={}, bytes={}",
            document.name,
            document.mime_type,
            document.bytes.len()
        );
        let start = self
            .http
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header(
                "X-Goog-Upload-Header-Content-Length",
                document.bytes.len().to_string(),
            )
            .header("X-Goog-Upload-Header-Content-Type", &document.mime_type)
            .header(CONTENT_TYPE, "application/json")
            .json(&serde_json::json!({ "file": { "display_name": document.name } }))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;
        let start = Self::check_response(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| ProviderError::new("Upload session did not return an upload URL"))?;

        let finish = self
            .http
            .post(upload_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(document.bytes.clone())
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;
        let finish = Self::check_response(finish).await?;
        let raw = Self::read_json(finish).await?;
        let uploaded: UploadFileResponse = decode(raw, "files.upload")?;

        debug!(
            "Gemini upload finished: name={}, state={:?}",
            uploaded.file.name, uploaded.file.state
        );
        Ok(uploaded.file)
    }

    async fn get_file_status(&self, name: &str) -> Result<UploadedFile, ProviderError> {
        let response = self
            .http
            .get(self.url(&format!("v1beta/{}", name)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;
        let response = Self::check_response(response).await?;
        let raw = Self::read_json(response).await?;
        decode(raw, "files.get")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ai::types::{FileReference, Part, RequestConfig};
    use serde_json::json;

    fn request(temperature: Option<f32>) -> GenerateRequest {
        GenerateRequest {
            model: "gemini-2.5-pro".to_string(),
            contents: vec![Turn::user(vec![
                Part::file(FileReference {
                    uri: "https://files/1".to_string(),
                    mime_type: Some("application/pdf".to_string()),
                }),
                Part::text("Begin"),
            ])],
            config: RequestConfig {
                system_instruction: "Distill the book".to_string(),
                temperature,
            },
        }
    }

    #[test]
    fn body_carries_system_instruction_and_temperature() {
        let req = request(Some(0.5));
        let body = serde_json::to_value(GenerateContentBody::from(&req)).expect("serialize body");
        assert_eq!(
            body["systemInstruction"],
            json!({ "parts": [{ "text": "Distill the book" }] })
        );
        assert_eq!(body["generationConfig"], json!({ "temperature": 0.5 }));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["fileData"]["fileUri"], "https://files/1");
    }

    #[test]
    fn body_omits_generation_config_without_temperature() {
        let req = request(None);
        let body = serde_json::to_value(GenerateContentBody::from(&req)).expect("serialize body");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn joins_candidate_parts() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": "Hello " }, { "text": "world" }] } }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 3, "totalTokenCount": 13 }
        }))
        .expect("valid response");
        assert_eq!(parsed.first_candidate_text(), "Hello world");
        assert_eq!(
            parsed.usage_metadata.and_then(|u| u.candidates_token_count),
            Some(3)
        );
    }

    #[test]
    fn empty_candidates_yield_empty_text() {
        let parsed: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [] })).expect("valid response");
        assert_eq!(parsed.first_candidate_text(), "");
    }

    #[test]
    fn rejects_blank_api_key() {
        assert!(GeminiClient::new("   ").is_err());
    }
}
