//! Canvas mutation API.
//!
//! Every operation runs in its own transaction unless it is called inside
//! [`Canvas::batch`]. Operations never fail from the caller's point of view:
//! a canvas without a store, or a substrate error, turns the call into a
//! no-op that returns the empty sentinel id.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::error::CanvasError;
use crate::store::CanvasStore;
use crate::text::replace_note_text;
use crate::types::{CanvasSnapshot, Edge, EdgeId, Note, NoteId, PopColor};

/// A note together with its current text.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NoteView {
    #[serde(flatten)]
    pub note: Note,
    pub content: String,
}

/// Handle for mutating the shared canvas.
#[derive(Clone, Debug, Default)]
pub struct Canvas {
    store: Option<CanvasStore>,
}

impl Canvas {
    pub fn new(store: CanvasStore) -> Self {
        Self { store: Some(store) }
    }

    /// A canvas whose every operation is a silent no-op.
    pub fn not_ready() -> Self {
        Self { store: None }
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&CanvasStore> {
        self.store.as_ref()
    }

    fn run<R>(
        &self,
        op: &'static str,
        fallback: R,
        f: impl FnOnce(&CanvasStore) -> Result<R, CanvasError>,
    ) -> R {
        let Some(store) = &self.store else {
            tracing::trace!(op, "canvas not ready, skipping");
            return fallback;
        };
        match f(store) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(op, "canvas operation failed: {e}");
                fallback
            }
        }
    }

    /// Run several canvas operations as one transaction.
    ///
    /// Observers see one change and the undo manager records one entry.
    pub fn batch(&self, f: impl FnOnce(&Canvas)) {
        self.run("batch", (), |store| {
            store.transact(|_| {
                f(self);
                Ok(())
            })
        })
    }

    // ---- notes ----

    /// Create a note with empty content. The id is usable immediately.
    pub fn add_note(&self, x: f64, y: f64, color: PopColor) -> NoteId {
        self.add_note_with_content(x, y, color, "")
    }

    /// Create a note and set its content in the same transaction.
    pub fn add_note_with_content(&self, x: f64, y: f64, color: PopColor, content: &str) -> NoteId {
        let note = Note::new(x, y, color);
        self.insert_note(note, content)
    }

    /// Insert a fully formed note record, keeping its id.
    pub(crate) fn insert_note(&self, note: Note, content: &str) -> NoteId {
        self.run("add_note", NoteId::empty(), |store| {
            store.transact(|txn| {
                txn.push(&note)?;
                txn.ensure_text(&note.id);
                txn.replace_text(&note.id, content)?;
                Ok(())
            })?;
            tracing::debug!(note = %note.id, "added note");
            Ok(note.id)
        })
    }

    pub fn update_note_content(&self, id: &NoteId, content: &str) {
        self.run("update_note_content", (), |store| {
            if !store.read().contains_note(id) {
                return Ok(());
            }
            replace_note_text(store, id, content).map(|_| ())
        })
    }

    pub fn update_note_color(&self, id: &NoteId, color: PopColor) {
        self.modify_note("update_note_color", id, |note| note.with_color(color))
    }

    pub fn update_note_position(&self, id: &NoteId, x: f64, y: f64) {
        self.modify_note("update_note_position", id, |note| note.with_position(x, y))
    }

    fn modify_note(&self, op: &'static str, id: &NoteId, f: impl FnOnce(&Note) -> Note) {
        self.run(op, (), |store| {
            store.transact(|txn| {
                let Some(current) = txn.read().note(id).cloned() else {
                    return Ok(());
                };
                let updated = f(&current);
                if updated != current {
                    txn.replace(&updated)?;
                }
                Ok(())
            })
        })
    }

    /// Move several notes at once.
    pub fn move_notes(&self, moves: &[(NoteId, f64, f64)]) {
        self.run("move_notes", (), |store| {
            store.transact(|txn| {
                let snapshot = txn.read();
                for (id, x, y) in moves {
                    if let Some(note) = snapshot.note(id) {
                        txn.replace(&note.with_position(*x, *y))?;
                    }
                }
                Ok(())
            })
        })
    }

    /// Every note reachable from `id` by following edges source to target.
    ///
    /// Breadth-first; `id` itself is not included, cycles are visited once.
    pub fn connected_note_ids(&self, id: &NoteId) -> Vec<NoteId> {
        let snapshot = self.snapshot();
        let mut seen: HashSet<&NoteId> = HashSet::from([id]);
        let mut queue: VecDeque<&NoteId> = VecDeque::from([id]);
        let mut found = Vec::new();

        while let Some(current) = queue.pop_front() {
            for edge in snapshot.edges.iter().filter(|e| &e.source == current) {
                if seen.insert(&edge.target) {
                    found.push(edge.target.clone());
                    queue.push_back(&edge.target);
                }
            }
        }
        found
    }

    /// Move a note and all its descendants by a delta.
    pub fn drag_group(&self, id: &NoteId, dx: f64, dy: f64) {
        let snapshot = self.snapshot();
        let moves: Vec<(NoteId, f64, f64)> = std::iter::once(id.clone())
            .chain(self.connected_note_ids(id))
            .filter_map(|nid| snapshot.note(&nid).map(|n| (nid, n.x + dx, n.y + dy)))
            .collect();
        self.move_notes(&moves);
    }

    /// Remove a note, clear its text and drop every edge touching it.
    pub fn delete_note(&self, id: &NoteId) {
        self.run("delete_note", (), |store| {
            store.transact(|txn| {
                txn.remove::<Note>(id.as_str())?;
                txn.replace_text(id, "")?;
                let edges = txn.remove_matching::<Edge>(|e| e.touches(id))?;
                tracing::debug!(note = %id, edges, "deleted note");
                Ok(())
            })
        })
    }

    // ---- edges ----

    /// Connect `source` to `target`. Adding an existing pair returns its id
    /// without writing anything.
    pub fn add_edge(&self, source: &NoteId, target: &NoteId) -> EdgeId {
        self.run("add_edge", EdgeId::empty(), |store| {
            let edge = Edge::between(source.clone(), target.clone());
            store.transact(|txn| {
                let exists = txn.read().edge(&edge.id).is_some();
                if !exists {
                    txn.push(&edge)?;
                }
                Ok(())
            })?;
            Ok(edge.id)
        })
    }

    pub fn delete_edge(&self, id: &EdgeId) {
        self.run("delete_edge", (), |store| {
            store.transact(|txn| txn.remove::<Edge>(id.as_str()).map(|_| ()))
        })
    }

    // ---- reads ----

    pub fn snapshot(&self) -> CanvasSnapshot {
        self.store.as_ref().map(|s| s.read()).unwrap_or_default()
    }

    pub fn note_content(&self, id: &NoteId) -> String {
        self.store.as_ref().map(|s| s.text(id)).unwrap_or_default()
    }

    pub fn notes_with_content(&self) -> Vec<NoteView> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store
            .read()
            .notes
            .into_iter()
            .map(|note| {
                let content = store.text(&note.id);
                NoteView { note, content }
            })
            .collect()
    }
}
