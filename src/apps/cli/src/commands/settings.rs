use anyhow::{anyhow, bail, Context};
use distill_core::infrastructure::storage::settings::{DEFAULT_PROMPT, KEY_API_KEY};
use distill_core::infrastructure::storage::{
    DistillSettings, JsonFileSettingsStore, SettingsStore, ThemeMode, ALLOWED_MODELS,
};

pub fn show(store: &JsonFileSettingsStore) -> anyhow::Result<()> {
    let settings = DistillSettings::load(store);

    println!("settings file:   {}", store.path().display());
    println!("model:           {}", settings.model);
    println!(
        "temperature:     {}",
        match settings.effective_temperature() {
            Some(t) => t.to_string(),
            None => format!("(default, saved {})", settings.temperature),
        }
    );
    println!("auto-wait:       {}", settings.auto_wait_between_requests);
    println!("theme:           {}", settings.theme_mode.as_str());
    println!(
        "api key:         {}",
        if settings.api_key.is_empty() {
            "(not set)".to_string()
        } else {
            mask(&settings.api_key)
        }
    );
    println!("saved keys:      {}", settings.saved_keys.len());
    let custom = settings.prompt != DEFAULT_PROMPT;
    println!(
        "prompt:          {} ({} chars)",
        if custom { "custom" } else { "built-in" },
        settings.prompt.chars().count()
    );
    Ok(())
}

pub fn set(store: &JsonFileSettingsStore, key: &str, value: &str) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);

    match key {
        "model" => settings.set_model(value)?,
        "prompt-file" => {
            let prompt = std::fs::read_to_string(value)
                .with_context(|| format!("Failed to read prompt file: {}", value))?;
            if prompt.trim().is_empty() {
                bail!("Prompt file is empty: {}", value);
            }
            settings.prompt = prompt;
        }
        "temperature" => {
            let t: f32 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid temperature: {}", value))?;
            if !t.is_finite() || !(0.0..=2.0).contains(&t) {
                bail!("Temperature must be between 0 and 2: {}", value);
            }
            settings.temperature = t;
            settings.use_temperature = true;
        }
        "use-temperature" => settings.use_temperature = parse_bool(value)?,
        "auto-wait" => settings.auto_wait_between_requests = parse_bool(value)?,
        "theme" => {
            settings.theme_mode = ThemeMode::parse(value)
                .ok_or_else(|| anyhow!("Theme must be auto, light or dark: {}", value))?
        }
        "api-key" => {
            store.set(KEY_API_KEY, value.trim())?;
            println!("api key set: {}", mask(value.trim()));
            return Ok(());
        }
        other => bail!(
            "Unknown setting '{}'. Known: model ({}), prompt-file, temperature, use-temperature, auto-wait, theme, api-key",
            other,
            ALLOWED_MODELS.join("|")
        ),
    }

    settings.persist(store)?;
    println!("{} updated", key);
    Ok(())
}

pub fn reset_prompt(store: &JsonFileSettingsStore) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);
    settings.prompt = DEFAULT_PROMPT.to_string();
    settings.persist(store)?;
    println!("prompt reset to built-in");
    Ok(())
}

pub fn list_keys(store: &JsonFileSettingsStore) -> anyhow::Result<()> {
    let settings = DistillSettings::load(store);
    if settings.saved_keys.is_empty() {
        println!("no saved keys");
        return Ok(());
    }
    for (i, saved) in settings.saved_keys.iter().enumerate() {
        let active = if saved.key == settings.api_key { "*" } else { " " };
        let created = chrono::DateTime::from_timestamp_millis(saved.created)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!("{} {:>2}. {:<20} {}  {}", active, i + 1, saved.label, saved.masked(), created);
    }
    Ok(())
}

pub fn add_key(store: &JsonFileSettingsStore, label: &str) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);
    let saved_as = settings.save_key(store, label)?;
    println!("key saved as '{}'", saved_as);
    Ok(())
}

pub fn remove_key(store: &JsonFileSettingsStore, number: usize) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);
    let removed = settings.delete_key(store, list_index(number)?)?;
    println!("removed '{}'", removed.label);
    Ok(())
}

pub fn use_key(store: &JsonFileSettingsStore, number: usize) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);
    let entry = settings.load_key(store, list_index(number)?)?;
    println!("using '{}'", entry.label);
    Ok(())
}

pub fn clear_key(store: &JsonFileSettingsStore) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);
    settings.clear_key(store)?;
    println!("active key cleared");
    Ok(())
}

/// Keys are listed from 1.
fn list_index(number: usize) -> anyhow::Result<usize> {
    number
        .checked_sub(1)
        .ok_or_else(|| anyhow!("Key numbers start at 1"))
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => bail!("Expected true or false: {}", value),
    }
}

fn mask(key: &str) -> String {
    distill_core::infrastructure::storage::SavedKey {
        label: String::new(),
        key: key.to_string(),
        created: 0,
    }
    .masked()
}
