//! Storage system
//!
//! Key/value settings persistence and the typed settings built on top of it.

pub mod settings;
pub mod settings_store;

pub use settings::{DistillSettings, SavedKey, ThemeMode, ALLOWED_MODELS, DEFAULT_MODEL};
pub use settings_store::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore};
