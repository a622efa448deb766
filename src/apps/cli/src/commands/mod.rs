pub mod run;
pub mod settings;

use anyhow::Context;
use distill_core::infrastructure::storage::JsonFileSettingsStore;
use std::path::{Path, PathBuf};

const LOCAL_SETTINGS_FILE: &str = "distill-settings.json";

/// Settings file at `path`, else under the user config dir, else in the
/// working directory.
pub fn open_store(path: Option<&Path>) -> anyhow::Result<JsonFileSettingsStore> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(JsonFileSettingsStore::default_path)
        .unwrap_or_else(|| PathBuf::from(LOCAL_SETTINGS_FILE));
    JsonFileSettingsStore::open(&path)
        .with_context(|| format!("Failed to open settings: {}", path.display()))
}
