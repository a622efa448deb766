//! Key/value settings stores.

use crate::util::errors::DistillResult;
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Minimal string key/value persistence.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> DistillResult<()>;

    fn remove(&self, key: &str) -> DistillResult<()>;
}

/// Process-local store, used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: DashMap<String, String>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> DistillResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> DistillResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Settings persisted as a flat JSON object in a single file.
///
/// Every write rewrites the whole file; the settings map is tiny.
pub struct JsonFileSettingsStore {
    path: PathBuf,
    values: DashMap<String, String>,
}

impl JsonFileSettingsStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and also starts empty rather than blocking startup.
    pub fn open(path: impl Into<PathBuf>) -> DistillResult<Self> {
        let path = path.into();
        let values = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => {
                    for (k, v) in map {
                        values.insert(k, v);
                    }
                }
                Err(e) => {
                    warn!(
                        "Ignoring corrupt settings file: path={}, error={}",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Settings file not found, starting empty: path={}", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self { path, values })
    }

    /// Default location: `<config dir>/distill/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("distill").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> DistillResult<()> {
        let snapshot: BTreeMap<String, String> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> DistillResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&self, key: &str) -> DistillResult<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
