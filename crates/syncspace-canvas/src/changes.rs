//! Per-record structural diffs between two canvas snapshots.
//!
//! A [`ChangeSet`] is what observers and the undo manager see for each
//! committed transaction. Records are compared by value; a record that merely
//! shifted position because a neighbour was inserted or removed is not a
//! change.

use std::collections::BTreeMap;

use smol_str::SmolStr;

use crate::types::{CanvasSnapshot, Edge, Note, Record};

/// How one record differs between two states.
///
/// `before`/`after` carry the record's position in the converged view so that
/// a revert can put it back where it was.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordChange<T> {
    pub before: Option<(usize, T)>,
    pub after: Option<(usize, T)>,
}

impl<T: PartialEq> RecordChange<T> {
    pub fn is_insert(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_remove(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }

    /// True when the record ends up exactly as it started.
    fn is_noop(&self) -> bool {
        match (&self.before, &self.after) {
            (None, None) => true,
            (Some((_, a)), Some((_, b))) => a == b,
            _ => false,
        }
    }
}

/// Structural changes to notes and edges, keyed by record id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub notes: BTreeMap<SmolStr, RecordChange<Note>>,
    pub edges: BTreeMap<SmolStr, RecordChange<Edge>>,
}

impl ChangeSet {
    /// Diff two snapshots.
    pub fn between(before: &CanvasSnapshot, after: &CanvasSnapshot) -> Self {
        Self {
            notes: diff_records(&before.notes, &after.notes),
            edges: diff_records(&before.edges, &after.edges),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notes.len() + self.edges.len()
    }

    /// Fold a later change set into this one.
    ///
    /// Keeps the earliest `before` and the latest `after` per record; records
    /// that end where they started are dropped.
    pub fn merge(&mut self, later: ChangeSet) {
        merge_records(&mut self.notes, later.notes);
        merge_records(&mut self.edges, later.edges);
    }
}

fn diff_records<T: Record>(before: &[T], after: &[T]) -> BTreeMap<SmolStr, RecordChange<T>> {
    let mut changes: BTreeMap<SmolStr, RecordChange<T>> = BTreeMap::new();

    for (index, record) in before.iter().enumerate() {
        changes.insert(
            SmolStr::new(record.key()),
            RecordChange {
                before: Some((index, record.clone())),
                after: None,
            },
        );
    }
    for (index, record) in after.iter().enumerate() {
        changes
            .entry(SmolStr::new(record.key()))
            .or_insert(RecordChange {
                before: None,
                after: None,
            })
            .after = Some((index, record.clone()));
    }

    changes.retain(|_, change| !change.is_noop());
    changes
}

fn merge_records<T: PartialEq>(
    into: &mut BTreeMap<SmolStr, RecordChange<T>>,
    later: BTreeMap<SmolStr, RecordChange<T>>,
) {
    for (key, change) in later {
        match into.get_mut(&key) {
            Some(existing) => existing.after = change.after,
            None => {
                into.insert(key, change);
            }
        }
    }
    into.retain(|_, change| !change.is_noop());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NoteId, PopColor};

    fn note(id: &str, x: f64) -> Note {
        let mut n = Note::new(x, 0.0, PopColor::Yellow);
        n.id = NoteId::from(id);
        n
    }

    fn snapshot(notes: Vec<Note>) -> CanvasSnapshot {
        CanvasSnapshot {
            notes,
            edges: Vec::new(),
        }
    }

    #[test]
    fn test_diff_detects_insert_update_remove() {
        let a = note("a", 0.0);
        let b = note("b", 0.0);
        let c = note("c", 0.0);

        let before = snapshot(vec![a.clone(), b.clone()]);
        let after = snapshot(vec![a.with_position(10.0, 0.0), c.clone()]);
        let changes = ChangeSet::between(&before, &after);

        assert_eq!(changes.len(), 3);
        assert!(changes.notes["b"].is_remove());
        assert!(changes.notes["c"].is_insert());
        assert_eq!(changes.notes["a"].after.as_ref().map(|(_, n)| n.x), Some(10.0));
    }

    #[test]
    fn test_shifted_record_is_not_a_change() {
        let a = note("a", 0.0);
        let b = note("b", 0.0);
        let before = snapshot(vec![a.clone(), b.clone()]);
        let after = snapshot(vec![b.clone()]);

        let changes = ChangeSet::between(&before, &after);
        assert_eq!(changes.notes.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_merge_keeps_earliest_before_and_latest_after() {
        let a = note("a", 0.0);
        let s0 = snapshot(vec![a.clone()]);
        let s1 = snapshot(vec![a.with_position(5.0, 0.0)]);
        let s2 = snapshot(vec![a.with_position(9.0, 0.0)]);

        let mut first = ChangeSet::between(&s0, &s1);
        first.merge(ChangeSet::between(&s1, &s2));

        let change = &first.notes["a"];
        assert_eq!(change.before.as_ref().map(|(_, n)| n.x), Some(0.0));
        assert_eq!(change.after.as_ref().map(|(_, n)| n.x), Some(9.0));
    }

    #[test]
    fn test_merge_drops_records_that_return_to_start() {
        let a = note("a", 0.0);
        let s0 = snapshot(vec![a.clone()]);
        let s1 = snapshot(vec![a.with_position(5.0, 0.0)]);

        let mut changes = ChangeSet::between(&s0, &s1);
        changes.merge(ChangeSet::between(&s1, &s0));
        assert!(changes.is_empty());

        // insert then remove within one capture
        let mut changes = ChangeSet::between(&snapshot(vec![]), &s0);
        changes.merge(ChangeSet::between(&s0, &snapshot(vec![])));
        assert!(changes.is_empty());
    }
}
