//! Agentic layer
//!
//! Drives the distillation session on top of the provider and storage layers.

pub mod distill;
