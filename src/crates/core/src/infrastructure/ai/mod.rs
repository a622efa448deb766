//! AI provider module
//!
//! Provider-neutral conversation types, the provider trait and the Gemini
//! REST implementation.

pub mod error;
pub mod gemini;
pub mod provider;
pub mod types;

pub use error::ProviderError;
pub use gemini::GeminiClient;
pub use provider::GenerationProvider;
pub use types::*;
