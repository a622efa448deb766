// Distill Core Library - Platform-agnostic book distillation engine
// Four-layer architecture: Util -> Infrastructure -> Service -> Agentic

pub mod agentic; // Agentic layer - distillation session, retry executor, anomaly checks
pub mod infrastructure; // Infrastructure layer - AI provider client, settings storage, trace, events
pub mod service; // Service layer - Export
pub mod util; // Utility layer - Errors, text helpers

// Export main types
pub use util::errors::*;

// Export infrastructure components
pub use infrastructure::ai::{GeminiClient, GenerationProvider};
pub use infrastructure::events::{DistillEvent, EventEmitter};
pub use infrastructure::storage::{DistillSettings, SettingsStore};
pub use infrastructure::trace::{TraceEntry, TraceLog};

// Export Agentic session core types
pub use agentic::distill::{
    DistillConfig, DistillHandle, DistillOrchestrator, SectionRecord, SessionStatus,
    SourceDocument, Transcript,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CORE_NAME: &str = "Distill Core";
