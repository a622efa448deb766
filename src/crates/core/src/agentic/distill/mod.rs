//! Distill - turn-by-turn book distillation
//!
//! A session uploads one source document, asks the model for the first
//! section, then keeps sending a continuation trigger until the model emits
//! the end marker. Provider failures are retried by [`retry::RetryExecutor`];
//! replies are screened by [`anomaly::AnomalyDetector`]. Front ends observe
//! progress through [`crate::infrastructure::events::DistillEvent`].

pub mod anomaly;
pub mod classifier;
pub mod control;
pub mod orchestrator;
pub mod policy;
pub mod request_builder;
pub mod retry;
pub mod timer;
pub mod transcript;
pub mod types;

pub use crate::infrastructure::ai::SourceDocument;
pub use anomaly::{Anomaly, AnomalyDetector};
pub use control::{DistillHandle, SessionControl};
pub use orchestrator::DistillOrchestrator;
pub use policy::RetryPolicy;
pub use retry::{CallFailure, CallOutcome, RetryExecutor, TransientDecision, TransientHook};
pub use transcript::{SectionCounters, SectionRecord, Transcript, TurnId};
pub use types::*;
