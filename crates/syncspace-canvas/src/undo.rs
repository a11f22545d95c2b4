//! Collaborative undo/redo over the note and edge lists.
//!
//! History is kept per replica but records every tracked transaction,
//! local or remote, so anyone can revert anyone's recent change. Text edits
//! are not tracked: undoing a note deletion restores the note and its edges
//! with empty content.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Deserialize;
use web_time::Instant;

use crate::changes::ChangeSet;
use crate::error::CanvasError;
use crate::observer::{Registry, Subscription};
use crate::store::{CanvasEvent, CanvasStore, Origin};
use crate::types::{Edge, Note};

/// Undo manager settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Tracked changes closer together than this coalesce into one entry.
    pub capture_timeout_ms: u64,
    /// Oldest entries are evicted past this many.
    pub max_steps: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 500,
            max_steps: 100,
        }
    }
}

impl UndoConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

/// Sent to subscribers whenever either stack changes size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoStatus {
    pub undo_depth: usize,
    pub redo_depth: usize,
}

impl UndoStatus {
    pub fn can_undo(&self) -> bool {
        self.undo_depth > 0
    }

    pub fn can_redo(&self) -> bool {
        self.redo_depth > 0
    }
}

#[derive(Default)]
struct History {
    undo: Vec<ChangeSet>,
    redo: Vec<ChangeSet>,
    last_change: Option<Instant>,
}

impl History {
    fn status(&self) -> UndoStatus {
        UndoStatus {
            undo_depth: self.undo.len(),
            redo_depth: self.redo.len(),
        }
    }
}

struct UndoInner {
    store: CanvasStore,
    config: UndoConfig,
    history: RefCell<History>,
    listeners: Rc<Registry<UndoStatus>>,
    notified: Cell<UndoStatus>,
    subscription: RefCell<Option<Subscription>>,
}

/// Undo/redo stacks bound to one store.
#[derive(Clone)]
pub struct UndoManager {
    inner: Rc<UndoInner>,
}

impl UndoManager {
    pub fn new(store: &CanvasStore) -> Self {
        Self::with_config(store, UndoConfig::default())
    }

    pub fn with_config(store: &CanvasStore, config: UndoConfig) -> Self {
        let inner = Rc::new(UndoInner {
            store: store.clone(),
            config,
            history: RefCell::new(History::default()),
            listeners: Registry::new(),
            notified: Cell::new(History::default().status()),
            subscription: RefCell::new(None),
        });

        let weak: Weak<UndoInner> = Rc::downgrade(&inner);
        let sub = store.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.record(event);
            }
        });
        *inner.subscription.borrow_mut() = Some(sub);

        Self { inner }
    }

    pub fn config(&self) -> UndoConfig {
        self.inner.config
    }

    pub fn can_undo(&self) -> bool {
        !self.inner.history.borrow().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.inner.history.borrow().redo.is_empty()
    }

    pub fn status(&self) -> UndoStatus {
        self.inner.history.borrow().status()
    }

    /// Revert the most recent entry. Returns false if there was nothing to
    /// undo, or if called inside a [`Canvas::batch`](crate::canvas::Canvas::batch)
    /// where the revert would be folded into the outer transaction.
    pub fn undo(&self) -> bool {
        self.replay(Origin::Undo)
    }

    /// Reapply the most recently undone entry. Same rules as [`Self::undo`].
    pub fn redo(&self) -> bool {
        self.replay(Origin::Redo)
    }

    /// Make the next tracked change start a new entry.
    pub fn stop_capturing(&self) {
        self.inner.history.borrow_mut().last_change = None;
    }

    /// Clear all undo/redo history.
    pub fn clear_history(&self) {
        {
            let mut history = self.inner.history.borrow_mut();
            history.undo.clear();
            history.redo.clear();
            history.last_change = None;
        }
        self.inner.notify();
    }

    /// Observe stack size changes.
    pub fn subscribe(&self, f: impl Fn(&UndoStatus) + 'static) -> Subscription {
        self.inner.listeners.subscribe(f)
    }

    fn replay(&self, origin: Origin) -> bool {
        if self.inner.store.in_transaction() {
            tracing::warn!(?origin, "cannot replay history inside a transaction");
            return false;
        }
        loop {
            let entry = {
                let mut history = self.inner.history.borrow_mut();
                let stack = match origin {
                    Origin::Redo => &mut history.redo,
                    _ => &mut history.undo,
                };
                stack.pop()
            };
            let Some(entry) = entry else {
                return false;
            };

            let applied = match revert(&self.inner.store, &entry, origin) {
                Ok(applied) => applied,
                Err(e) => {
                    tracing::warn!(?origin, "failed to replay history entry: {e}");
                    false
                }
            };
            self.inner.history.borrow_mut().last_change = None;
            self.inner.notify();

            if applied {
                tracing::debug!(?origin, records = entry.len(), "replayed history entry");
                return true;
            }
            // nothing left to revert in this entry, try the next one
        }
    }
}

impl std::fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoManager")
            .field("status", &self.status())
            .finish()
    }
}

impl UndoInner {
    fn record(&self, event: &CanvasEvent) {
        {
            let mut history = self.history.borrow_mut();
            match event.origin {
                Origin::Local | Origin::Remote => {
                    history.redo.clear();
                    let now = Instant::now();
                    let within_window = history
                        .last_change
                        .is_some_and(|last| now.duration_since(last) < self.config.capture_timeout());

                    match history.undo.last_mut() {
                        Some(top) if within_window => {
                            top.merge(event.changes.clone());
                            if top.is_empty() {
                                history.undo.pop();
                            }
                        }
                        _ => history.undo.push(event.changes.clone()),
                    }
                    history.last_change = Some(now);

                    while history.undo.len() > self.config.max_steps {
                        history.undo.remove(0);
                    }
                }
                Origin::Undo => history.redo.push(event.changes.clone()),
                Origin::Redo => history.undo.push(event.changes.clone()),
            }
        }
        self.notify();
    }

    fn notify(&self) {
        let status = self.history.borrow().status();
        if status != self.notified.replace(status) {
            self.listeners.emit(&status);
        }
    }
}

/// Put every record touched by `entry` back to its `before` state.
///
/// Returns whether the document actually changed.
fn revert(store: &CanvasStore, entry: &ChangeSet, origin: Origin) -> Result<bool, CanvasError> {
    let start = store.read();
    store.transact_with(origin, |txn| {
        for key in entry.notes.keys() {
            txn.remove::<Note>(key)?;
        }
        for key in entry.edges.keys() {
            txn.remove::<Edge>(key)?;
        }

        let mut notes: Vec<&(usize, Note)> =
            entry.notes.values().filter_map(|c| c.before.as_ref()).collect();
        notes.sort_by_key(|(index, _)| *index);
        for (index, note) in notes {
            txn.insert(*index, note)?;
        }

        let mut edges: Vec<&(usize, Edge)> =
            entry.edges.values().filter_map(|c| c.before.as_ref()).collect();
        edges.sort_by_key(|(index, _)| *index);
        for (index, edge) in edges {
            txn.insert(*index, edge)?;
        }
        Ok(())
    })?;
    Ok(!ChangeSet::between(&start, &store.read()).is_empty())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::canvas::Canvas;
    use crate::types::PopColor;

    fn setup(config: UndoConfig) -> (Canvas, UndoManager) {
        let store = CanvasStore::new();
        let undo = UndoManager::with_config(&store, config);
        (Canvas::new(store), undo)
    }

    fn separate_entries() -> UndoConfig {
        UndoConfig {
            capture_timeout_ms: 0,
            ..UndoConfig::default()
        }
    }

    #[test]
    fn test_empty_stacks() {
        let (_canvas, undo) = setup(UndoConfig::default());
        assert!(!undo.can_undo());
        assert!(!undo.undo());
        assert!(!undo.redo());
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (canvas, undo) = setup(UndoConfig::default());
        let s0 = canvas.snapshot();
        let id = canvas.add_note(1.0, 2.0, PopColor::Pink);
        let s1 = canvas.snapshot();

        assert!(undo.undo());
        assert_eq!(canvas.snapshot(), s0);
        assert!(undo.can_redo());

        assert!(undo.redo());
        assert_eq!(canvas.snapshot(), s1);
        assert!(canvas.snapshot().contains_note(&id));
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_capture_window_coalesces() {
        let (canvas, undo) = setup(UndoConfig::default());
        let id = canvas.add_note(0.0, 0.0, PopColor::Yellow);
        for i in 1..=5 {
            canvas.update_note_position(&id, i as f64, 0.0);
        }
        assert_eq!(undo.status().undo_depth, 1);

        undo.undo();
        assert!(canvas.snapshot().is_empty());
    }

    #[test]
    fn test_batch_is_one_entry() {
        let (canvas, undo) = setup(separate_entries());
        let ids: Vec<_> = (0..5)
            .map(|i| canvas.add_note(i as f64, 0.0, PopColor::Yellow))
            .collect();
        let before = canvas.snapshot();
        let depth = undo.status().undo_depth;

        canvas.batch(|canvas| {
            for id in &ids {
                canvas.update_note_position(id, 50.0, 50.0);
            }
        });
        assert_eq!(undo.status().undo_depth, depth + 1);

        assert!(undo.undo());
        assert_eq!(canvas.snapshot(), before);
    }

    #[test]
    fn test_stop_capturing_splits_entries() {
        let (canvas, undo) = setup(UndoConfig::default());
        let id = canvas.add_note(0.0, 0.0, PopColor::Yellow);
        undo.stop_capturing();
        canvas.update_note_position(&id, 9.0, 9.0);
        assert_eq!(undo.status().undo_depth, 2);

        undo.undo();
        assert_eq!(canvas.snapshot().note(&id).unwrap().x, 0.0);
    }

    #[test]
    fn test_capture_window_rolls_from_last_change() {
        let (canvas, undo) = setup(UndoConfig {
            capture_timeout_ms: 200,
            ..UndoConfig::default()
        });
        let pause = |ms| std::thread::sleep(Duration::from_millis(ms));

        let id = canvas.add_note(0.0, 0.0, PopColor::Yellow);
        pause(120);
        canvas.update_note_position(&id, 1.0, 0.0);
        pause(120);
        // past the timeout since the entry began, inside it since the last change
        canvas.update_note_position(&id, 2.0, 0.0);
        assert_eq!(undo.status().undo_depth, 1);

        pause(400);
        canvas.update_note_position(&id, 3.0, 0.0);
        assert_eq!(undo.status().undo_depth, 2);

        assert!(undo.undo());
        assert_eq!(canvas.snapshot().note(&id).unwrap().x, 2.0);
        assert!(undo.undo());
        assert!(canvas.snapshot().is_empty());
    }

    #[test]
    fn test_replay_refused_inside_batch() {
        let (canvas, undo) = setup(separate_entries());
        let id = canvas.add_note(0.0, 0.0, PopColor::Yellow);
        canvas.update_note_position(&id, 5.0, 0.0);
        let status = undo.status();

        canvas.batch(|_| {
            assert!(!undo.undo());
            assert!(!undo.redo());
        });
        assert_eq!(undo.status(), status);
        assert_eq!(canvas.snapshot().note(&id).unwrap().x, 5.0);

        assert!(undo.undo());
        assert_eq!(canvas.snapshot().note(&id).unwrap().x, 0.0);
        assert!(undo.can_redo());
    }

    #[test]
    fn test_new_change_clears_redo() {
        let (canvas, undo) = setup(separate_entries());
        canvas.add_note(0.0, 0.0, PopColor::Yellow);
        undo.undo();
        assert!(undo.can_redo());

        canvas.add_note(5.0, 5.0, PopColor::Blue);
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_undo_delete_restores_note_and_edges() {
        let (canvas, undo) = setup(separate_entries());
        let a = canvas.add_note(0.0, 0.0, PopColor::Yellow);
        let b = canvas.add_note(0.0, 0.0, PopColor::Blue);
        canvas.add_edge(&a, &b);
        canvas.update_note_content(&b, "gone for good");
        let before = canvas.snapshot();

        canvas.delete_note(&b);
        assert!(undo.undo());
        assert_eq!(canvas.snapshot(), before);
        // text is not part of history
        assert_eq!(canvas.note_content(&b), "");
    }

    #[test]
    fn test_skips_entries_with_nothing_to_revert() {
        let (canvas, first) = setup(separate_entries());
        let second = UndoManager::with_config(canvas.store().unwrap(), separate_entries());
        let keep = canvas.add_note(0.0, 0.0, PopColor::Yellow);
        canvas.add_note(1.0, 0.0, PopColor::Yellow);

        // the first manager already reverted the add that tops the second's stack
        assert!(first.undo());
        assert_eq!(second.status().undo_depth, 2);

        assert!(second.undo());
        assert_eq!(second.status().undo_depth, 0);
        assert!(!canvas.snapshot().contains_note(&keep));
        assert!(!second.undo());
    }

    #[test]
    fn test_max_steps_evicts_oldest() {
        let (canvas, undo) = setup(UndoConfig {
            capture_timeout_ms: 0,
            max_steps: 3,
        });
        for i in 0..5 {
            canvas.add_note(i as f64, 0.0, PopColor::Yellow);
        }
        assert_eq!(undo.status().undo_depth, 3);
        while undo.undo() {}
        assert_eq!(canvas.snapshot().notes.len(), 2);
    }

    #[test]
    fn test_subscribe_reports_stack_sizes() {
        let (canvas, undo) = setup(separate_entries());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = undo.subscribe(move |status| s.borrow_mut().push(*status));

        canvas.add_note(0.0, 0.0, PopColor::Yellow);
        undo.undo();
        undo.clear_history();

        let seen = seen.borrow();
        assert_eq!(seen.first().map(|s| s.can_undo()), Some(true));
        assert_eq!(seen.last().copied(), Some(UndoStatus { undo_depth: 0, redo_depth: 0 }));
    }

    #[test]
    fn test_remote_changes_are_undoable() {
        let store = CanvasStore::new();
        let undo = UndoManager::new(&store);
        let remote = Canvas::new(CanvasStore::new());
        remote.add_note(0.0, 0.0, PopColor::Orange);

        store
            .apply_update(&remote.store().unwrap().export_snapshot().unwrap())
            .unwrap();
        assert!(undo.can_undo());
        assert!(undo.undo());
        assert!(store.read().notes.is_empty());
    }

    #[test]
    fn test_dropping_manager_detaches() {
        let store = CanvasStore::new();
        let calls = Rc::new(Cell::new(0));
        {
            let undo = UndoManager::new(&store);
            let c = calls.clone();
            let _sub = undo.subscribe(move |_| c.set(c.get() + 1));
        }
        Canvas::new(store).add_note(0.0, 0.0, PopColor::Yellow);
        assert_eq!(calls.get(), 0);
    }
}
