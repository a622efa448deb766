//! Utility layer
//!
//! Shared error types and text helpers used by every other layer.

pub mod errors;
pub mod text;

pub use errors::*;
pub use text::{estimate_tokens, trigram_similarity};
