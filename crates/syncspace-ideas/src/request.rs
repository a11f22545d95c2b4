//! Request payload and prompt.

use serde::{Deserialize, Serialize};
use syncspace_canvas::{Canvas, NoteId};

/// How many other notes are offered to the model as context.
pub const MAX_CONTEXT_NOTES: usize = 3;

/// Body of an idea request: `{ noteContent, contextNotes }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaRequest {
    pub note_content: String,
    #[serde(default)]
    pub context_notes: Vec<String>,
}

impl IdeaRequest {
    pub fn new(note_content: impl Into<String>) -> Self {
        Self {
            note_content: note_content.into(),
            context_notes: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl IntoIterator<Item = String>) -> Self {
        self.context_notes = context.into_iter().collect();
        self
    }

    /// Build a request for `note` from the current canvas.
    ///
    /// Context is the first few other notes in canvas order, skipping empty
    /// ones. Returns `None` when the note has no content to expand on.
    pub fn for_note(canvas: &Canvas, note: &NoteId) -> Option<Self> {
        let content = canvas.note_content(note);
        if content.trim().is_empty() {
            return None;
        }
        let context = canvas
            .notes_with_content()
            .into_iter()
            .filter(|view| &view.note.id != note)
            .take(MAX_CONTEXT_NOTES)
            .map(|view| view.content)
            .filter(|c| !c.trim().is_empty());
        Some(Self::new(content).with_context(context))
    }

    /// The prompt sent to the model.
    pub fn prompt(&self) -> String {
        let context = if self.context_notes.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nContext from other notes:\n{}",
                self.context_notes.join("\n")
            )
        };

        format!(
            r#"You are a creative brainstorming assistant for SyncSpace, a collaborative canvas app.

The user has a note with this content: "{content}"{context}

Generate exactly 3 related ideas that could branch from this note. Each idea should be:
- Brief (1-2 sentences max)
- Creative and inspiring
- Connected to the original idea but exploring different angles

Format your response as a JSON array with exactly 3 strings:
["Idea 1", "Idea 2", "Idea 3"]

Only output the JSON array, nothing else."#,
            content = self.note_content,
        )
    }
}
