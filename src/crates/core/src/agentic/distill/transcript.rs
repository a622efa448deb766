//! Conversation transcript and the accepted sections derived from it.

use crate::infrastructure::ai::{FileReference, Role, Turn};
use crate::util::errors::{DistillError, DistillResult};
use crate::util::text::estimate_tokens;
use serde::{Deserialize, Serialize};

/// Stable identity of a transcript turn; survives deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: TurnId,
    pub turn: Turn,
}

/// Ordered user/model turns sent back to the provider on every continuation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) -> TurnId {
        let id = TurnId(self.next_id);
        self.next_id += 1;
        self.entries.push(TranscriptEntry { id, turn });
        id
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Turns in order, ready for a request body.
    pub fn turns(&self) -> Vec<Turn> {
        self.entries.iter().map(|e| e.turn.clone()).collect()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.turn)
    }

    pub fn remove(&mut self, id: TurnId) -> Option<Turn> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index).turn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn references_file(&self, uri: &str) -> bool {
        self.entries.iter().any(|e| e.turn.references_file(uri))
    }

    /// Copy of the transcript with every user-turn reference to `old_uri`
    /// pointing at `replacement`. Turn ids are preserved.
    pub fn with_file_reference(&self, old_uri: &str, replacement: &FileReference) -> Transcript {
        let mut patched = self.clone();
        for entry in patched.entries.iter_mut().filter(|e| e.turn.role == Role::User) {
            for part in &mut entry.turn.parts {
                if part.file_reference.as_ref().is_some_and(|f| f.uri == old_uri) {
                    part.file_reference = Some(replacement.clone());
                }
            }
        }
        patched
    }
}

/// One accepted model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRecord {
    pub id: u64,
    pub text: String,
    pub model_turn: TurnId,
    pub user_turn: TurnId,
    /// Provider-reported output tokens, when available. Informational only;
    /// budgets and counters use [`SectionRecord::estimated_tokens`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_tokens: Option<u64>,
}

impl SectionRecord {
    /// `ceil(chars / 4)`; the figure budgets are checked against.
    pub fn estimated_tokens(&self) -> u64 {
        estimate_tokens(&self.text)
    }

    /// First markdown heading, or the first non-empty line.
    pub fn title(&self) -> String {
        crate::service::export::title_from_markdown(&self.text)
            .unwrap_or_else(|| format!("Section {}", self.id + 1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionCounters {
    pub sections: usize,
    pub token_tally: u64,
}

impl SectionCounters {
    pub fn from_sections(sections: &[SectionRecord]) -> Self {
        Self {
            sections: sections.len(),
            token_tally: sections.iter().map(SectionRecord::estimated_tokens).sum(),
        }
    }
}

/// What a deletion removed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedSection {
    pub section: SectionRecord,
    pub removed_user_turn: bool,
}

/// Transcript plus the section list kept in step with it.
#[derive(Debug, Clone, Default)]
pub struct DistillDocument {
    transcript: Transcript,
    sections: Vec<SectionRecord>,
    next_section_id: u64,
    counters: SectionCounters,
}

impl DistillDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn sections(&self) -> &[SectionRecord] {
        &self.sections
    }

    pub fn counters(&self) -> SectionCounters {
        self.counters
    }

    pub fn last_section(&self) -> Option<&SectionRecord> {
        self.sections.last()
    }

    /// Append the user turn and the model's reply, recording a section.
    pub fn accept(&mut self, user_turn: Turn, text: String, usage_tokens: Option<u64>) -> &SectionRecord {
        let user_id = self.transcript.push(user_turn);
        let model_id = self.transcript.push(Turn::model_text(text.clone()));
        let record = SectionRecord {
            id: self.next_section_id,
            text,
            model_turn: model_id,
            user_turn: user_id,
            usage_tokens,
        };
        self.next_section_id += 1;
        self.counters.sections += 1;
        self.counters.token_tally += record.estimated_tokens();
        self.sections.push(record);
        &self.sections[self.sections.len() - 1]
    }

    /// Remove a section and its model turn.
    ///
    /// The preceding user turn goes too when it is exactly the continuation
    /// trigger. The first turn carries the document and instruction, so it
    /// stays; the transcript then holds two consecutive user turns.
    pub fn delete_section(&mut self, id: u64, trigger: &str) -> DistillResult<DeletedSection> {
        let index = self
            .sections
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| DistillError::NotFound(format!("Section not found: {}", id)))?;
        let section = self.sections.remove(index);

        self.transcript.remove(section.model_turn);
        let removed_user_turn = self
            .transcript
            .get(section.user_turn)
            .is_some_and(|t| t.role == Role::User && t.is_exactly_text(trigger));
        if removed_user_turn {
            self.transcript.remove(section.user_turn);
        }

        self.counters = SectionCounters::from_sections(&self.sections);
        Ok(DeletedSection {
            section,
            removed_user_turn,
        })
    }

    /// Swap in a transcript whose stale file references point at `replacement`.
    pub fn repair_file_reference(&mut self, old_uri: &str, replacement: &FileReference) -> bool {
        if !self.transcript.references_file(old_uri) {
            return false;
        }
        self.transcript = self.transcript.with_file_reference(old_uri, replacement);
        true
    }

    /// Model text of every section, joined by blank lines.
    pub fn combined_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
