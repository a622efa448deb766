//! Generation provider contract.

use super::error::ProviderError;
use super::types::{GenerateRequest, GenerateResponse, SourceDocument, UploadedFile};
use async_trait::async_trait;

/// The three provider operations the distillation loop needs.
///
/// Implementations must not retry on their own; retrying is the job of the
/// session's retry executor.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    async fn upload_file(&self, document: &SourceDocument) -> Result<UploadedFile, ProviderError>;

    async fn get_file_status(&self, name: &str) -> Result<UploadedFile, ProviderError>;
}
