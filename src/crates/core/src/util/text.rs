//! Text helpers: token estimation, shingle similarity, code-fence stripping.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

fn normalize_for_shingles(text: &str) -> Vec<char> {
    let lowered = text.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().collect()
}

fn shingles(text: &str) -> HashSet<String> {
    let chars = normalize_for_shingles(text);
    if chars.len() < 3 {
        return HashSet::new();
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

/// Jaccard similarity over 3-character shingles.
///
/// Case and whitespace runs are ignored. Two texts without any shingle
/// score 0.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let left = shingles(a);
    let right = shingles(b);
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();
    intersection as f64 / union as f64
}

fn fenced_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("valid fenced code regex"))
}

/// Trimmed text with every fenced code block removed.
pub fn strip_fenced_code(text: &str) -> String {
    fenced_code_regex().replace_all(text.trim(), "").into_owned()
}
