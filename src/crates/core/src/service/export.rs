//! Plain-text and markdown exports of the combined distillation.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const EXPORT_GENERATOR: &str = "distill";
const FALLBACK_BOOK_NAME: &str = "Distillation";
const MAX_TITLE_CHARS: usize = 96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub title: String,
    /// Source file name; empty when unknown.
    pub source: String,
    pub model: String,
    /// `None` when the provider default temperature was used.
    pub temperature: Option<f32>,
    pub sections: usize,
    pub created_at: DateTime<Utc>,
}

impl ExportMeta {
    pub fn new(source: Option<&str>, model: &str, temperature: Option<f32>, sections: usize) -> Self {
        Self {
            title: format!("{} - book excerpt", book_base_name(source)),
            source: source.unwrap_or_default().to_string(),
            model: model.to_string(),
            temperature,
            sections,
            created_at: Utc::now(),
        }
    }

    fn temperature_label(&self) -> String {
        match self.temperature {
            Some(t) => t.to_string(),
            None => "(default)".to_string(),
        }
    }

    fn date_label(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Source file name without its extension.
pub fn book_base_name(source: Option<&str>) -> String {
    source
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Path::new(s).file_stem().and_then(|stem| stem.to_str()))
        .map(|stem| stem.to_string())
        .unwrap_or_else(|| FALLBACK_BOOK_NAME.to_string())
}

/// Replace characters illegal in file names with `-` and collapse whitespace.
pub fn sanitize_filename(name: &str) -> String {
    static ILLEGAL: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let illegal = ILLEGAL.get_or_init(|| Regex::new(r#"[\\/:*?"<>|]+"#).expect("valid filename regex"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"));
    let replaced = illegal.replace_all(name, "-");
    spaces.replace_all(&replaced, " ").trim().to_string()
}

/// `<book> - book excerpt`, sanitized; callers append the extension.
pub fn export_base_name(source: Option<&str>) -> String {
    sanitize_filename(&format!("{} - book excerpt", book_base_name(source)))
}

/// Text of the first markdown heading, else the first non-empty line.
pub fn title_from_markdown(markdown: &str) -> Option<String> {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    let heading = HEADING.get_or_init(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.+)").expect("valid heading regex"));
    for line in markdown.lines() {
        if let Some(caps) = heading.captures(line) {
            return caps.get(1).map(|m| m.as_str().trim().to_string());
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.chars().take(MAX_TITLE_CHARS).collect());
        }
    }
    None
}

pub fn render_markdown(meta: &ExportMeta, body: &str) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("title: {}\n", meta.title));
    if !meta.source.is_empty() {
        out.push_str(&format!("source_file: {}\n", meta.source));
    }
    out.push_str(&format!("model: {}\n", meta.model));
    out.push_str(&format!("temperature: {}\n", meta.temperature_label()));
    out.push_str(&format!("sections: {}\n", meta.sections));
    out.push_str(&format!("date: {}\n", meta.date_label()));
    out.push_str(&format!("generator: {}\n", EXPORT_GENERATOR));
    out.push_str("---\n\n");
    out.push_str(body);
    out
}

pub fn render_text(meta: &ExportMeta, body: &str) -> String {
    let mut lines = vec![meta.title.clone()];
    if !meta.source.is_empty() {
        lines.push(format!("Source: {}", meta.source));
    }
    lines.push(format!("Model: {}", meta.model));
    lines.push(format!("Temperature: {}", meta.temperature_label()));
    lines.push(format!("Sections: {}", meta.sections));
    lines.push(format!("Date: {}", meta.date_label()));
    lines.push(String::new());
    format!("{}\n{}", lines.join("\n"), body)
}
