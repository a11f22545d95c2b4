//! JSON export and import of a canvas.
//!
//! The export format is lossy and unversioned: notes keep their id, content,
//! color and position; creation times are not exported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::error::CanvasError;
use crate::types::{Edge, Note, NoteId, PopColor};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportedNote {
    pub id: NoteId,
    pub content: String,
    pub color: PopColor,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasExport {
    pub notes: Vec<ExportedNote>,
    pub edges: Vec<Edge>,
    pub exported_at: DateTime<Utc>,
}

/// What an import actually added.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub notes_added: usize,
    pub edges_added: usize,
}

impl CanvasExport {
    /// Capture the current converged canvas.
    pub fn capture(canvas: &Canvas) -> Self {
        let snapshot = canvas.snapshot();
        let notes = canvas
            .notes_with_content()
            .into_iter()
            .map(|view| ExportedNote {
                id: view.note.id,
                content: view.content,
                color: view.note.color,
                x: view.note.x,
                y: view.note.y,
            })
            .collect();
        Self {
            notes,
            edges: snapshot.edges,
            exported_at: Utc::now(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, CanvasError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CanvasError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add every note and edge not already on `canvas`, in one transaction.
    ///
    /// Edges are skipped unless both endpoints exist once the notes are in.
    pub fn import_into(&self, canvas: &Canvas) -> ImportSummary {
        let mut summary = ImportSummary::default();
        canvas.batch(|canvas| {
            let existing = canvas.snapshot();
            for exported in &self.notes {
                if existing.contains_note(&exported.id) {
                    continue;
                }
                let note = Note {
                    id: exported.id.clone(),
                    color: exported.color,
                    x: exported.x,
                    y: exported.y,
                    created_at: Utc::now(),
                };
                if !canvas.insert_note(note, &exported.content).is_empty() {
                    summary.notes_added += 1;
                }
            }
            let merged = canvas.snapshot();
            for edge in &self.edges {
                let id = Edge::between(edge.source.clone(), edge.target.clone()).id;
                if existing.edge(&id).is_some() {
                    continue;
                }
                if !merged.contains_note(&edge.source) || !merged.contains_note(&edge.target) {
                    tracing::debug!(edge = %id, "skipping edge with missing endpoint");
                    continue;
                }
                if !canvas.add_edge(&edge.source, &edge.target).is_empty() {
                    summary.edges_added += 1;
                }
            }
        });
        tracing::debug!(?summary, "imported canvas");
        summary
    }
}
