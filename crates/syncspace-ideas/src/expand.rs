//! Placing generated ideas on the canvas as children of a note.

use syncspace_canvas::{Canvas, CanvasPoint, Note, NoteId, PopColor};

use crate::parse::IDEA_COUNT;

/// Child offsets from the parent: down-left, straight down, down-right.
const BRANCH_OFFSETS: [(f64, f64); IDEA_COUNT] = [(-220.0, 180.0), (0.0, 220.0), (220.0, 180.0)];

/// Where a child note goes and what it looks like.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Branch {
    pub position: CanvasPoint,
    pub color: PopColor,
}

/// Layout for the children of `parent`.
///
/// Colors cycle through the palette without the parent's own color so each
/// child stands apart from it.
pub fn branch_layout(parent: &Note) -> [Branch; IDEA_COUNT] {
    let colors: Vec<PopColor> = PopColor::ALL
        .into_iter()
        .filter(|c| *c != parent.color)
        .collect();
    let origin = parent.position();
    std::array::from_fn(|i| {
        let (dx, dy) = BRANCH_OFFSETS[i];
        Branch {
            position: origin.offset(dx, dy),
            color: colors[i % colors.len()],
        }
    })
}

/// Create one child note per idea, each connected from `parent`.
///
/// Runs as a single batch, so collaborators see the children appear together
/// and one undo removes them all. Returns the new ids, or nothing if the
/// parent is gone.
pub fn apply_ideas(canvas: &Canvas, parent: &NoteId, ideas: &[String; IDEA_COUNT]) -> Vec<NoteId> {
    let Some(parent_note) = canvas.snapshot().note(parent).cloned() else {
        tracing::warn!(%parent, "parent note missing, dropping ideas");
        return Vec::new();
    };

    let layout = branch_layout(&parent_note);
    let mut children = Vec::with_capacity(IDEA_COUNT);
    canvas.batch(|canvas| {
        for (branch, idea) in layout.iter().zip(ideas) {
            let child = canvas.add_note_with_content(
                branch.position.x,
                branch.position.y,
                branch.color,
                idea,
            );
            canvas.add_edge(parent, &child);
            children.push(child);
        }
    });
    tracing::debug!(%parent, children = children.len(), "applied ideas");
    children
}

#[cfg(test)]
mod tests {
    use syncspace_canvas::{CanvasStore, EdgeId, UndoManager};

    use super::*;

    fn ideas() -> [String; IDEA_COUNT] {
        ["one", "two", "three"].map(String::from)
    }

    #[test]
    fn test_layout_positions_and_colors() {
        let parent = Note::new(100.0, 50.0, PopColor::Blue);
        let layout = branch_layout(&parent);

        let positions: Vec<_> = layout.iter().map(|b| (b.position.x, b.position.y)).collect();
        assert_eq!(positions, vec![(-120.0, 230.0), (100.0, 270.0), (320.0, 230.0)]);

        let colors: Vec<_> = layout.iter().map(|b| b.color).collect();
        assert_eq!(colors, vec![PopColor::Yellow, PopColor::Pink, PopColor::Green]);
    }

    #[test]
    fn test_apply_creates_children_and_edges() {
        let canvas = Canvas::new(CanvasStore::new());
        let parent = canvas.add_note_with_content(0.0, 0.0, PopColor::Yellow, "seed");

        let children = apply_ideas(&canvas, &parent, &ideas());
        assert_eq!(children.len(), 3);

        let snapshot = canvas.snapshot();
        assert_eq!(snapshot.notes.len(), 4);
        for (child, idea) in children.iter().zip(ideas()) {
            assert_eq!(canvas.note_content(child), idea);
            assert!(snapshot.edge(&EdgeId::for_pair(&parent, child)).is_some());
            assert_ne!(snapshot.note(child).unwrap().color, PopColor::Yellow);
        }
    }

    #[test]
    fn test_apply_is_one_undo_step() {
        let store = CanvasStore::new();
        let canvas = Canvas::new(store.clone());
        let undo = UndoManager::new(&store);
        let parent = canvas.add_note(0.0, 0.0, PopColor::Green);
        undo.stop_capturing();

        apply_ideas(&canvas, &parent, &ideas());
        assert!(undo.undo());

        let snapshot = canvas.snapshot();
        assert_eq!(snapshot.notes.len(), 1);
        assert!(snapshot.edges.is_empty());
    }

    #[test]
    fn test_missing_parent() {
        let canvas = Canvas::new(CanvasStore::new());
        assert!(apply_ideas(&canvas, &NoteId::from("gone"), &ideas()).is_empty());
        assert!(canvas.snapshot().is_empty());
    }
}
