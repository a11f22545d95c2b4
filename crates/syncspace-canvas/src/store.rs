//! Loro-backed shared document store.
//!
//! One `LoroDoc` per room holds two root lists (`"notes"`, `"edges"`) of whole
//! JSON records plus one root text per note, keyed `note:<id>`. The store owns
//! transaction batching and change notification; it knows nothing about the
//! canvas operations built on top of it.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use loro::{ExportMode, LoroDoc, LoroList, LoroText, ToJson, VersionVector};
use serde_json::Value;
use smol_str::{SmolStr, format_smolstr};
use tokio::sync::mpsc;

use crate::changes::ChangeSet;
use crate::error::CanvasError;
use crate::observer::{Registry, Subscription};
use crate::types::{CanvasSnapshot, Edge, Note, NoteId, Record};

/// Where a committed change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A mutation made on this replica.
    Local,
    /// An update imported from another replica.
    Remote,
    /// Replay of an undo entry.
    Undo,
    /// Replay of a redo entry.
    Redo,
}

impl Origin {
    /// Whether the undo manager records changes with this origin.
    pub fn is_tracked(self) -> bool {
        matches!(self, Origin::Local | Origin::Remote)
    }
}

/// Delivered to structural observers once per committed transaction.
#[derive(Clone, Debug)]
pub struct CanvasEvent {
    pub origin: Origin,
    pub changes: ChangeSet,
    pub snapshot: CanvasSnapshot,
}

/// Root text key for a note's content.
pub fn text_key(note: &NoteId) -> SmolStr {
    format_smolstr!("note:{}", note)
}

#[derive(Default)]
struct TxnState {
    depth: usize,
    origin: Option<Origin>,
    /// View before the first structural mutation of the outermost transaction.
    before: Option<CanvasSnapshot>,
}

struct TextWatch {
    last: String,
    listeners: Rc<Registry<String>>,
}

struct StoreInner {
    doc: LoroDoc,
    notes: LoroList,
    edges: LoroList,
    txn: RefCell<TxnState>,
    events: Rc<Registry<CanvasEvent>>,
    text_watches: RefCell<HashMap<SmolStr, TextWatch>>,
}

/// Shared handle to one replica of the canvas document.
///
/// Cloning is cheap; clones share the same replica.
#[derive(Clone)]
pub struct CanvasStore {
    inner: Rc<StoreInner>,
}

impl CanvasStore {
    /// Create an empty replica.
    pub fn new() -> Self {
        Self::from_doc(LoroDoc::new())
    }

    fn from_doc(doc: LoroDoc) -> Self {
        let notes = doc.get_list(Note::LIST);
        let edges = doc.get_list(Edge::LIST);
        Self {
            inner: Rc::new(StoreInner {
                doc,
                notes,
                edges,
                txn: RefCell::new(TxnState::default()),
                events: Registry::new(),
                text_watches: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Get the underlying Loro document.
    pub fn doc(&self) -> &LoroDoc {
        &self.inner.doc
    }

    pub fn peer_id(&self) -> u64 {
        self.inner.doc.peer_id()
    }

    // ---- reads ----

    /// Converged view of notes and edges.
    ///
    /// Duplicate ids (left behind by concurrent replace-in-place) resolve to
    /// the last occurrence. Edges whose endpoints are not both present are
    /// hidden.
    pub fn read(&self) -> CanvasSnapshot {
        let notes: Vec<Note> = read_records(&self.inner.notes);
        let edges = read_records::<Edge>(&self.inner.edges)
            .into_iter()
            .filter(|e| {
                notes.iter().any(|n| n.id == e.source) && notes.iter().any(|n| n.id == e.target)
            })
            .collect();
        CanvasSnapshot { notes, edges }
    }

    pub fn notes(&self) -> Vec<Note> {
        self.read().notes
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.read().edges
    }

    /// Current content of a note. Empty if the note has no text yet.
    pub fn text(&self, note: &NoteId) -> String {
        self.text_container(note).to_string()
    }

    fn text_container(&self, note: &NoteId) -> LoroText {
        self.inner.doc.get_text(text_key(note).as_str())
    }

    // ---- transactions ----

    /// Run `f` as one local transaction.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&Txn<'_>) -> Result<R, CanvasError>,
    ) -> Result<R, CanvasError> {
        self.transact_with(Origin::Local, f)
    }

    /// Run `f` as one transaction attributed to `origin`.
    ///
    /// Nested calls join the outermost transaction and take its origin. The
    /// outermost call commits once and notifies observers at most once. If `f`
    /// fails, mutations it already made are still committed.
    pub fn transact_with<R>(
        &self,
        origin: Origin,
        f: impl FnOnce(&Txn<'_>) -> Result<R, CanvasError>,
    ) -> Result<R, CanvasError> {
        let outermost = {
            let mut txn = self.inner.txn.borrow_mut();
            txn.depth += 1;
            if txn.depth == 1 {
                txn.origin = Some(origin);
                txn.before = None;
                true
            } else {
                false
            }
        };

        let result = f(&Txn { store: self });

        if outermost {
            let (origin, before) = {
                let mut txn = self.inner.txn.borrow_mut();
                txn.depth = 0;
                (txn.origin.take().unwrap_or(origin), txn.before.take())
            };
            self.inner.doc.commit();
            tracing::debug!(?origin, structural = before.is_some(), "committed transaction");
            self.finish(origin, before);
        } else {
            self.inner.txn.borrow_mut().depth -= 1;
        }

        result
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.txn.borrow().depth > 0
    }

    /// Import a remote update or snapshot, then notify observers.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), CanvasError> {
        if self.in_transaction() {
            return Err(CanvasError::TransactionActive);
        }
        let before = self.read();
        self.inner
            .doc
            .import(update)
            .map_err(|e| CanvasError::Import(e.to_string()))?;
        tracing::debug!(bytes = update.len(), "imported remote update");
        self.finish(Origin::Remote, Some(before));
        Ok(())
    }

    fn finish(&self, origin: Origin, before: Option<CanvasSnapshot>) {
        if let Some(before) = before {
            let snapshot = self.read();
            let changes = ChangeSet::between(&before, &snapshot);
            if !changes.is_empty() {
                self.inner.events.emit(&CanvasEvent {
                    origin,
                    changes,
                    snapshot,
                });
            }
        }
        self.notify_text_watches();
    }

    fn notify_text_watches(&self) {
        let mut fired: Vec<(Rc<Registry<String>>, String)> = Vec::new();
        {
            let mut watches = self.inner.text_watches.borrow_mut();
            for (key, watch) in watches.iter_mut() {
                let current = self.inner.doc.get_text(key.as_str()).to_string();
                if current != watch.last {
                    watch.last = current.clone();
                    fired.push((watch.listeners.clone(), current));
                }
            }
        }
        for (listeners, text) in fired {
            listeners.emit(&text);
        }
    }

    // ---- observers ----

    /// Observe committed structural changes from any origin.
    pub fn subscribe(&self, f: impl Fn(&CanvasEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(f)
    }

    /// Observe a note's text. Fires after a commit or import only when the
    /// text actually changed.
    pub fn watch_text(&self, note: &NoteId, f: impl Fn(&str) + 'static) -> Subscription {
        let key = text_key(note);
        let listeners = {
            let mut watches = self.inner.text_watches.borrow_mut();
            let current = self.inner.doc.get_text(key.as_str()).to_string();
            watches
                .entry(key.clone())
                .or_insert_with(|| TextWatch {
                    last: current,
                    listeners: Registry::new(),
                })
                .listeners
                .clone()
        };

        let mut inner_sub = listeners.subscribe(move |text: &String| f(text));
        let store: Weak<StoreInner> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            inner_sub.unsubscribe();
            if let Some(store) = store.upgrade() {
                let mut watches = store.text_watches.borrow_mut();
                if watches.get(&key).is_some_and(|w| w.listeners.is_empty()) {
                    watches.remove(&key);
                }
            }
        })
    }

    // ---- transport plumbing ----

    /// Export full snapshot.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, CanvasError> {
        self.inner
            .doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CanvasError::Export(e.to_string()))
    }

    /// Export updates since given version. `Ok(None)` when there is nothing new.
    pub fn export_updates_since(
        &self,
        version: &VersionVector,
    ) -> Result<Option<Vec<u8>>, CanvasError> {
        let current_vv = self.inner.doc.oplog_vv();
        if *version == current_vv {
            return Ok(None);
        }

        let updates = self
            .inner
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(version.clone()),
            })
            .map_err(|e| {
                tracing::warn!("failed to export updates: {e}");
                CanvasError::Export(e.to_string())
            })?;

        if updates.is_empty() {
            return Ok(None);
        }
        Ok(Some(updates))
    }

    /// Get current version vector.
    pub fn version(&self) -> VersionVector {
        self.inner.doc.oplog_vv()
    }

    /// Forward every committed local update into a channel.
    ///
    /// The returned Loro subscription must be kept alive for as long as
    /// updates should flow.
    pub fn subscribe_local_updates(
        &self,
    ) -> (loro::Subscription, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self
            .inner
            .doc
            .subscribe_local_update(Box::new(move |update| {
                let _ = tx.send(update.to_vec());
                true
            }));
        (sub, rx)
    }

    fn list<T: Record>(&self) -> &LoroList {
        if T::LIST == Note::LIST {
            &self.inner.notes
        } else {
            &self.inner.edges
        }
    }

    fn mark_structural(&self) {
        let needs_snapshot = self.inner.txn.borrow().before.is_none();
        if needs_snapshot {
            let snapshot = self.read();
            self.inner.txn.borrow_mut().before = Some(snapshot);
        }
    }
}

impl Default for CanvasStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CanvasStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasStore")
            .field("peer_id", &self.peer_id())
            .field("notes", &self.inner.notes.len())
            .field("edges", &self.inner.edges.len())
            .finish()
    }
}

/// Mutation handle passed to [`CanvasStore::transact`] closures.
pub struct Txn<'a> {
    store: &'a CanvasStore,
}

impl<'a> Txn<'a> {
    pub fn store(&self) -> &'a CanvasStore {
        self.store
    }

    /// Current view, including this transaction's uncommitted mutations.
    pub fn read(&self) -> CanvasSnapshot {
        self.store.read()
    }

    /// Append a record.
    pub fn push<T: Record>(&self, record: &T) -> Result<(), CanvasError> {
        self.store.mark_structural();
        let value = serde_json::to_value(record)?;
        self.store.list::<T>().push(value)?;
        Ok(())
    }

    /// Insert a record at `index`, clamped to the list length.
    pub fn insert<T: Record>(&self, index: usize, record: &T) -> Result<(), CanvasError> {
        self.store.mark_structural();
        let list = self.store.list::<T>();
        let value = serde_json::to_value(record)?;
        list.insert(index.min(list.len()), value)?;
        Ok(())
    }

    /// Replace a record in place, collapsing any duplicates of its id.
    ///
    /// Returns `false` if no record with that id exists.
    pub fn replace<T: Record>(&self, record: &T) -> Result<bool, CanvasError> {
        let list = self.store.list::<T>();
        let positions = positions_of(list, record.key());
        let Some(&first) = positions.first() else {
            return Ok(false);
        };
        self.store.mark_structural();
        for &pos in positions.iter().rev() {
            list.delete(pos, 1)?;
        }
        list.insert(first, serde_json::to_value(record)?)?;
        Ok(true)
    }

    /// Remove every record with `key`. Returns whether anything was removed.
    pub fn remove<T: Record>(&self, key: &str) -> Result<bool, CanvasError> {
        let list = self.store.list::<T>();
        let positions = positions_of(list, key);
        if positions.is_empty() {
            return Ok(false);
        }
        self.store.mark_structural();
        for &pos in positions.iter().rev() {
            list.delete(pos, 1)?;
        }
        Ok(true)
    }

    /// Remove every stored record matching `pred`, hidden ones included.
    ///
    /// Positions are collected first, then deleted from the back so earlier
    /// indices stay valid.
    pub fn remove_matching<T: Record>(&self, pred: impl Fn(&T) -> bool) -> Result<usize, CanvasError> {
        let list = self.store.list::<T>();
        let positions: Vec<usize> = (0..list.len())
            .filter(|&i| {
                record_json(list, i)
                    .and_then(|json| serde_json::from_value::<T>(json).ok())
                    .is_some_and(|record| pred(&record))
            })
            .collect();
        if positions.is_empty() {
            return Ok(0);
        }
        self.store.mark_structural();
        for &pos in positions.iter().rev() {
            list.delete(pos, 1)?;
        }
        Ok(positions.len())
    }

    /// Make sure a note's text exists. Never touches existing content.
    pub fn ensure_text(&self, note: &NoteId) -> LoroText {
        self.store.text_container(note)
    }

    /// Insert at a unicode scalar position.
    pub fn insert_text(&self, note: &NoteId, pos: usize, s: &str) -> Result<(), CanvasError> {
        if s.is_empty() {
            return Ok(());
        }
        let text = self.store.text_container(note);
        text.insert(pos.min(text.len_unicode()), s)?;
        Ok(())
    }

    /// Delete `len` unicode scalars starting at `pos`.
    pub fn delete_text(&self, note: &NoteId, pos: usize, len: usize) -> Result<(), CanvasError> {
        let text = self.store.text_container(note);
        let total = text.len_unicode();
        let start = pos.min(total);
        let len = len.min(total - start);
        if len > 0 {
            text.delete(start, len)?;
        }
        Ok(())
    }

    /// Replace the whole text: delete the entire span, then insert at 0.
    pub fn replace_text(&self, note: &NoteId, content: &str) -> Result<(), CanvasError> {
        let text = self.store.text_container(note);
        let len = text.len_unicode();
        if len > 0 {
            text.delete(0, len)?;
        }
        if !content.is_empty() {
            text.insert(0, content)?;
        }
        Ok(())
    }

    /// Nested transaction. Joins this one.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&Txn<'_>) -> Result<R, CanvasError>,
    ) -> Result<R, CanvasError> {
        self.store.transact(f)
    }
}

fn record_json(list: &LoroList, index: usize) -> Option<Value> {
    let value = list.get(index)?;
    let loro_value = value.as_value()?;
    Some(loro_value.to_json_value())
}

fn positions_of(list: &LoroList, key: &str) -> Vec<usize> {
    (0..list.len())
        .filter(|&i| {
            record_json(list, i)
                .and_then(|json| json.get("id").and_then(Value::as_str).map(|id| id == key))
                .unwrap_or(false)
        })
        .collect()
}

fn read_records<T: Record>(list: &LoroList) -> Vec<T> {
    let mut records = Vec::with_capacity(list.len());
    for i in 0..list.len() {
        let Some(json) = record_json(list, i) else {
            let err = CanvasError::InvalidRecord {
                list: T::LIST,
                index: i,
            };
            tracing::warn!("{err}");
            continue;
        };
        match serde_json::from_value::<T>(json) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(list = T::LIST, index = i, "skipping undecodable record: {e}"),
        }
    }

    // last occurrence of an id wins
    let mut seen = std::collections::HashSet::new();
    let mut deduped: Vec<T> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.key().to_string()))
        .collect();
    deduped.reverse();
    deduped
}
