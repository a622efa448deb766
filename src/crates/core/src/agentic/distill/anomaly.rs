//! Post-turn checks on a candidate section.

use crate::util::text::{strip_fenced_code, trigram_similarity};
use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_MIN_SECTION_CHARS: usize = 200;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// The end marker closes the text.
    Complete,
    LeakedArtifact,
    TooShort,
    Refusal,
    Repeating,
    Ok,
}

impl Anomaly {
    /// The same request should be sent again after a wait.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Anomaly::LeakedArtifact | Anomaly::TooShort)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Anomaly::Complete => "complete",
            Anomaly::LeakedArtifact => "Artifact leak",
            Anomaly::TooShort => "Short/empty response",
            Anomaly::Refusal => "likely refusal",
            Anomaly::Repeating => "response repeating",
            Anomaly::Ok => "ok",
        }
    }
}

fn leak_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<ctrl\d+>").expect("valid leak regex"))
}

fn refusal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(i\s+(can't|cannot|won't)|as an ai|i'm unable|i do not have access)")
            .expect("valid refusal regex")
    })
}

pub fn has_leaked_artifact(text: &str) -> bool {
    leak_regex().is_match(text)
}

pub fn is_refusal(text: &str) -> bool {
    refusal_regex().is_match(text)
}

/// Fewer than `min_chars` characters once trimmed and stripped of fenced code.
pub fn is_too_short(text: &str, min_chars: usize) -> bool {
    strip_fenced_code(text).trim().chars().count() < min_chars
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    end_marker: String,
    min_chars: usize,
    similarity_threshold: f64,
    pause_on_anomaly: bool,
}

impl AnomalyDetector {
    pub fn new(end_marker: impl Into<String>) -> Self {
        Self {
            end_marker: end_marker.into(),
            min_chars: DEFAULT_MIN_SECTION_CHARS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            pause_on_anomaly: true,
        }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// When off, only leaks and completion are reported.
    pub fn with_pause_on_anomaly(mut self, enabled: bool) -> Self {
        self.pause_on_anomaly = enabled;
        self
    }

    pub fn is_complete(&self, text: &str) -> bool {
        !self.end_marker.is_empty() && text.trim_end().ends_with(self.end_marker.as_str())
    }

    /// Classify `candidate` against the previously accepted section.
    ///
    /// First match wins: leaked artifact, completion, too short, refusal,
    /// repetition.
    pub fn detect(&self, candidate: &str, previous: &str) -> Anomaly {
        if has_leaked_artifact(candidate) {
            return Anomaly::LeakedArtifact;
        }
        if self.is_complete(candidate) {
            return Anomaly::Complete;
        }
        if !self.pause_on_anomaly {
            return Anomaly::Ok;
        }
        if is_too_short(candidate, self.min_chars) {
            return Anomaly::TooShort;
        }
        if is_refusal(candidate) {
            return Anomaly::Refusal;
        }
        if !previous.is_empty() && trigram_similarity(candidate, previous) > self.similarity_threshold {
            return Anomaly::Repeating;
        }
        Anomaly::Ok
    }
}

/// [`AnomalyDetector::detect`] with default thresholds.
pub fn detect(candidate: &str, previous: &str, end_marker: &str) -> Anomaly {
    AnomalyDetector::new(end_marker).detect(candidate, previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    const END: &str = "<end_of_book>";

    fn section(words: &str) -> String {
        format!("## {}\n\n{}", words, "A long paragraph about the book. ".repeat(12))
    }

    #[test]
    fn end_marker_completes() {
        let text = format!("{}\n{}\n", section("Finale"), END);
        assert_eq!(detect(&text, "", END), Anomaly::Complete);
        assert_eq!(detect(END, "", END), Anomaly::Complete);
    }

    #[test]
    fn marker_in_the_middle_does_not_complete() {
        let text = format!("{} then more {}", END, section("After"));
        assert_eq!(detect(&text, "", END), Anomaly::Ok);
    }

    #[test]
    fn short_and_code_only_replies_are_too_short() {
        assert_eq!(detect("", "", END), Anomaly::TooShort);
        assert_eq!(detect("Too brief.", "", END), Anomaly::TooShort);
        let code_only = format!("```\n{}\n```", "x".repeat(500));
        assert_eq!(detect(&code_only, "", END), Anomaly::TooShort);
    }

    #[test]
    fn too_short_uses_character_count() {
        let text = "é".repeat(199);
        assert!(is_too_short(&text, 200));
        assert!(!is_too_short(&"é".repeat(200), 200));
    }

    #[test]
    fn leaked_control_tokens_are_caught_first() {
        let text = format!("{}<CTRL94>{}", section("Leak"), END);
        assert_eq!(detect(&text, "", END), Anomaly::LeakedArtifact);
    }

    #[test]
    fn refusals_are_detected() {
        let text = format!("I can't help with that. {}", "Padding sentence. ".repeat(20));
        assert_eq!(detect(&text, "", END), Anomaly::Refusal);
        let text = format!("  As an AI, {}", "padding ".repeat(40));
        assert_eq!(detect(&text, "", END), Anomaly::Refusal);
    }

    #[test]
    fn repeated_sections_are_detected() {
        let first = section("Chapter One");
        assert_eq!(detect(&first, &first, END), Anomaly::Repeating);
        let other = format!(
            "## Chapter Two\n\n{}",
            "Different material entirely, with new arguments and examples. ".repeat(6)
        );
        assert_eq!(detect(&other, &first, END), Anomaly::Ok);
    }

    #[test]
    fn disabling_pauses_keeps_leak_and_completion_checks() {
        let detector = AnomalyDetector::new(END).with_pause_on_anomaly(false);
        assert_eq!(detector.detect("short", ""), Anomaly::Ok);
        assert_eq!(detector.detect("<ctrl3>", ""), Anomaly::LeakedArtifact);
        assert_eq!(detector.detect(END, ""), Anomaly::Complete);
    }
}
