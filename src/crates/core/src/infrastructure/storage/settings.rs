//! Typed user settings on top of a `SettingsStore`.

use super::settings_store::SettingsStore;
use crate::util::errors::{DistillError, DistillResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const KEY_API_KEY: &str = "distill.apiKey";
pub const KEY_PROMPT: &str = "distill.prompt";
pub const KEY_MODEL: &str = "distill.model";
pub const KEY_USE_TEMPERATURE: &str = "distill.useTemperature";
pub const KEY_TEMPERATURE: &str = "distill.temperature";
pub const KEY_THEME_MODE: &str = "distill.themeMode";
pub const KEY_AUTO_WAIT: &str = "distill.autoWaitBetweenRequests";
pub const KEY_SAVED_KEYS: &str = "distill.savedKeys";

pub const ALLOWED_MODELS: &[&str] = &[
    "gemini-3-pro-preview",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_PROMPT: &str = include_str!("../../../prompts/default_prompt.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Auto,
    Light,
    Dark,
}

impl ThemeMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "auto" => Some(Self::Auto),
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

/// A labelled API key kept for quick switching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedKey {
    pub label: String,
    pub key: String,
    /// Creation time, unix millis.
    pub created: i64,
}

impl SavedKey {
    /// Key with everything but the last four characters masked.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), tail)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistillSettings {
    pub api_key: String,
    pub prompt: String,
    pub model: String,
    pub use_temperature: bool,
    pub temperature: f32,
    pub theme_mode: ThemeMode,
    pub auto_wait_between_requests: bool,
    pub saved_keys: Vec<SavedKey>,
}

impl Default for DistillSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            prompt: DEFAULT_PROMPT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            use_temperature: true,
            temperature: DEFAULT_TEMPERATURE,
            theme_mode: ThemeMode::Auto,
            auto_wait_between_requests: false,
            saved_keys: Vec::new(),
        }
    }
}

impl DistillSettings {
    /// Read settings, falling back to defaults for missing or invalid values.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();

        let model = match store.get(KEY_MODEL) {
            Some(m) if ALLOWED_MODELS.contains(&m.as_str()) => m,
            Some(m) => {
                warn!("Unknown model in settings, using default: model={}", m);
                defaults.model.clone()
            }
            None => defaults.model.clone(),
        };

        let prompt = store
            .get(KEY_PROMPT)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(defaults.prompt);

        let use_temperature = store
            .get(KEY_USE_TEMPERATURE)
            .map(|v| v == "true")
            .unwrap_or(defaults.use_temperature);

        let temperature = store
            .get(KEY_TEMPERATURE)
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|t| t.is_finite())
            .unwrap_or(defaults.temperature);

        let theme_mode = store
            .get(KEY_THEME_MODE)
            .and_then(|v| ThemeMode::parse(&v))
            .unwrap_or_default();

        let auto_wait_between_requests = store
            .get(KEY_AUTO_WAIT)
            .map(|v| v == "true")
            .unwrap_or(defaults.auto_wait_between_requests);

        let saved_keys = match store.get(KEY_SAVED_KEYS) {
            Some(raw) => serde_json::from_str::<Vec<SavedKey>>(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable saved keys: error={}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        Self {
            api_key: store.get(KEY_API_KEY).unwrap_or_default(),
            prompt,
            model,
            use_temperature,
            temperature,
            theme_mode,
            auto_wait_between_requests,
            saved_keys,
        }
    }

    /// Write every user preference back to the store. The active API key and
    /// saved keys are written by their own operations.
    pub fn persist(&self, store: &dyn SettingsStore) -> DistillResult<()> {
        store.set(KEY_PROMPT, &self.prompt)?;
        store.set(KEY_MODEL, &self.model)?;
        store.set(KEY_USE_TEMPERATURE, &self.use_temperature.to_string())?;
        store.set(KEY_TEMPERATURE, &self.temperature.to_string())?;
        store.set(KEY_THEME_MODE, self.theme_mode.as_str())?;
        store.set(KEY_AUTO_WAIT, &self.auto_wait_between_requests.to_string())?;
        debug!("Settings persisted: model={}", self.model);
        Ok(())
    }

    /// Sampling temperature to send, or `None` for the provider default.
    pub fn effective_temperature(&self) -> Option<f32> {
        self.use_temperature.then_some(self.temperature)
    }

    pub fn set_model(&mut self, model: &str) -> DistillResult<()> {
        if !ALLOWED_MODELS.contains(&model) {
            return Err(DistillError::validation(format!(
                "Unsupported model '{}', expected one of: {}",
                model,
                ALLOWED_MODELS.join(", ")
            )));
        }
        self.model = model.to_string();
        Ok(())
    }

    /// Save the current API key under `label`. Returns the label it is saved
    /// under, which is the existing label when the key was saved before.
    pub fn save_key(&mut self, store: &dyn SettingsStore, label: &str) -> DistillResult<String> {
        let key = self.api_key.trim().to_string();
        if key.is_empty() {
            return Err(DistillError::validation("Empty key not saved"));
        }
        if let Some(existing) = self.saved_keys.iter().find(|s| s.key == key) {
            return Ok(existing.label.clone());
        }
        let label = if label.trim().is_empty() {
            "Default".to_string()
        } else {
            label.trim().to_string()
        };
        self.saved_keys.push(SavedKey {
            label: label.clone(),
            key: key.clone(),
            created: chrono::Utc::now().timestamp_millis(),
        });
        self.persist_keys(store)?;
        store.set(KEY_API_KEY, &key)?;
        Ok(label)
    }

    pub fn delete_key(&mut self, store: &dyn SettingsStore, index: usize) -> DistillResult<SavedKey> {
        if index >= self.saved_keys.len() {
            return Err(DistillError::NotFound(format!("Saved key #{}", index)));
        }
        let removed = self.saved_keys.remove(index);
        self.persist_keys(store)?;
        Ok(removed)
    }

    /// Make a saved key the active one.
    pub fn load_key(&mut self, store: &dyn SettingsStore, index: usize) -> DistillResult<&SavedKey> {
        let entry = self
            .saved_keys
            .get(index)
            .ok_or_else(|| DistillError::NotFound(format!("Saved key #{}", index)))?;
        self.api_key = entry.key.clone();
        store.set(KEY_API_KEY, &entry.key)?;
        Ok(entry)
    }

    pub fn clear_key(&mut self, store: &dyn SettingsStore) -> DistillResult<()> {
        self.api_key.clear();
        store.remove(KEY_API_KEY)
    }

    fn persist_keys(&self, store: &dyn SettingsStore) -> DistillResult<()> {
        store.set(KEY_SAVED_KEYS, &serde_json::to_string(&self.saved_keys)?)
    }
}
