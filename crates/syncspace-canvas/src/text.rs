//! Two-way binding between a note's editable string and its CRDT text.
//!
//! Local edits arrive as whole new strings (the replace protocol). A full
//! replace racing with someone typing into the same note does not merge: one
//! side's characters may be lost or doubled. Callers that need character-level
//! merging should use [`NoteTextBinding::insert`] and [`NoteTextBinding::delete`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::CanvasError;
use crate::observer::Subscription;
use crate::store::CanvasStore;
use crate::types::NoteId;

/// Replace a note's whole text in one transaction.
///
/// Returns `false` without touching the document when `content` already
/// matches.
pub fn replace_note_text(
    store: &CanvasStore,
    note: &NoteId,
    content: &str,
) -> Result<bool, CanvasError> {
    if store.text(note) == content {
        return Ok(false);
    }
    store.transact(|txn| txn.replace_text(note, content))?;
    Ok(true)
}

/// Keeps a local string in step with one note's text.
pub struct NoteTextBinding {
    store: CanvasStore,
    note: NoteId,
    value: Rc<RefCell<String>>,
    watch: Option<Subscription>,
}

impl NoteTextBinding {
    pub fn bind(store: &CanvasStore, note: NoteId) -> Self {
        Self::bind_with(store, note, |_| {})
    }

    /// Bind and call `on_change` with the new text whenever it changes,
    /// whoever changed it.
    pub fn bind_with(
        store: &CanvasStore,
        note: NoteId,
        on_change: impl Fn(&str) + 'static,
    ) -> Self {
        let value = Rc::new(RefCell::new(store.text(&note)));

        let bound = value.clone();
        let watch = store.watch_text(&note, move |text| {
            *bound.borrow_mut() = text.to_string();
            on_change(text);
        });
        tracing::debug!(note = %note, "bound note text");

        Self {
            store: store.clone(),
            note,
            value,
            watch: Some(watch),
        }
    }

    pub fn note_id(&self) -> &NoteId {
        &self.note
    }

    pub fn current_text(&self) -> String {
        self.value.borrow().clone()
    }

    /// Push a locally edited full string into the document.
    ///
    /// Returns whether anything was written.
    pub fn on_local_edit(&self, new_full: &str) -> Result<bool, CanvasError> {
        let changed = replace_note_text(&self.store, &self.note, new_full)?;
        if changed {
            *self.value.borrow_mut() = self.store.text(&self.note);
        }
        Ok(changed)
    }

    /// Insert at a unicode scalar position.
    pub fn insert(&self, pos: usize, s: &str) -> Result<(), CanvasError> {
        self.store.transact(|txn| txn.insert_text(&self.note, pos, s))?;
        *self.value.borrow_mut() = self.store.text(&self.note);
        Ok(())
    }

    /// Delete `len` unicode scalars starting at `pos`.
    pub fn delete(&self, pos: usize, len: usize) -> Result<(), CanvasError> {
        self.store
            .transact(|txn| txn.delete_text(&self.note, pos, len))?;
        *self.value.borrow_mut() = self.store.text(&self.note);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.watch.is_some()
    }

    /// Stop following the document. Safe to call more than once.
    pub fn unbind(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.unsubscribe();
            tracing::debug!(note = %self.note, "unbound note text");
        }
    }
}

impl Drop for NoteTextBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_binding_before_text_exists() {
        let store = CanvasStore::new();
        let binding = NoteTextBinding::bind(&store, NoteId::from("later"));
        assert_eq!(binding.current_text(), "");
    }

    #[test]
    fn test_local_edit_is_idempotent() {
        let store = CanvasStore::new();
        let note = NoteId::from("n");
        let changes = Rc::new(Cell::new(0));
        let c = changes.clone();
        let binding = NoteTextBinding::bind_with(&store, note.clone(), move |_| c.set(c.get() + 1));

        assert!(binding.on_local_edit("hello").unwrap());
        assert!(!binding.on_local_edit("hello").unwrap());

        assert_eq!(store.text(&note), "hello");
        assert_eq!(binding.current_text(), "hello");
        assert_eq!(changes.get(), 1);
    }

    #[test]
    fn test_binding_follows_other_writers() {
        let store = CanvasStore::new();
        let note = NoteId::from("n");
        let binding = NoteTextBinding::bind(&store, note.clone());

        store.transact(|txn| txn.replace_text(&note, "from elsewhere")).unwrap();
        assert_eq!(binding.current_text(), "from elsewhere");

        binding.insert(4, " far").unwrap();
        assert_eq!(binding.current_text(), "from far elsewhere");
        binding.delete(0, 5).unwrap();
        assert_eq!(store.text(&note), "far elsewhere");
    }

    #[test]
    fn test_rebinding_keeps_existing_content() {
        let store = CanvasStore::new();
        let note = NoteId::from("n");
        let first = NoteTextBinding::bind(&store, note.clone());
        first.on_local_edit("keep me").unwrap();

        let second = NoteTextBinding::bind(&store, note.clone());
        assert_eq!(second.current_text(), "keep me");
    }

    #[test]
    fn test_unbind_twice_is_noop() {
        let store = CanvasStore::new();
        let note = NoteId::from("n");
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let mut binding = NoteTextBinding::bind_with(&store, note.clone(), move |_| c.set(c.get() + 1));

        binding.unbind();
        binding.unbind();
        assert!(!binding.is_bound());

        store.transact(|txn| txn.replace_text(&note, "ignored")).unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(binding.current_text(), "");
    }
}
