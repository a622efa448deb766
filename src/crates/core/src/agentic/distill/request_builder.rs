//! Builds provider requests for the first turn and for continuations.

use crate::infrastructure::ai::{
    FileReference, GenerateRequest, Part, RequestConfig, Turn,
};

/// A request plus the user turn it appends to the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub request: GenerateRequest,
    pub user_turn: Turn,
}

impl TurnRequest {
    /// Point every reference to `old_uri` at `replacement`.
    pub fn replace_file_reference(&mut self, old_uri: &str, replacement: &FileReference) {
        for turn in self
            .request
            .contents
            .iter_mut()
            .chain(std::iter::once(&mut self.user_turn))
        {
            for part in &mut turn.parts {
                if part.file_reference.as_ref().is_some_and(|f| f.uri == old_uri) {
                    part.file_reference = Some(replacement.clone());
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequestBuilder {
    model: String,
    system_instruction: String,
    temperature: Option<f32>,
}

impl TurnRequestBuilder {
    pub fn new(model: impl Into<String>, system_instruction: impl Into<String>, temperature: Option<f32>) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            temperature,
        }
    }

    fn request(&self, contents: Vec<Turn>) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            contents,
            config: RequestConfig {
                system_instruction: self.system_instruction.clone(),
                temperature: self.temperature,
            },
        }
    }

    /// Single user turn: the document reference, then the instruction.
    pub fn build_first_turn(&self, file: &FileReference, instruction: &str) -> TurnRequest {
        let user_turn = Turn::user(vec![Part::file(file.clone()), Part::text(instruction)]);
        TurnRequest {
            request: self.request(vec![user_turn.clone()]),
            user_turn,
        }
    }

    /// Full history plus a trigger turn, optionally re-attaching the document.
    pub fn build_continuation(
        &self,
        history: &[Turn],
        trigger: &str,
        reattach: Option<&FileReference>,
    ) -> TurnRequest {
        let mut parts = Vec::with_capacity(2);
        if let Some(file) = reattach {
            parts.push(Part::file(file.clone()));
        }
        parts.push(Part::text(trigger));
        let user_turn = Turn::user(parts);

        let mut contents = Vec::with_capacity(history.len() + 1);
        contents.extend_from_slice(history);
        contents.push(user_turn.clone());
        TurnRequest {
            request: self.request(contents),
            user_turn,
        }
    }
}
