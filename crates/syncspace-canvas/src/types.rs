//! Canvas record types: notes, edges, colors and ids.
//!
//! Notes and edges are stored in the shared document as whole JSON values, one
//! list entry per record. Note content is not part of the record; it lives in a
//! separate text container per note (see [`crate::NoteTextBinding`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Identifier of a note. Assigned once at creation and never reused.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(SmolStr);

impl NoteId {
    /// Generate a fresh, globally unique note id.
    pub fn generate() -> Self {
        Self(format_smolstr!("note-{}", uuid::Uuid::now_v7()))
    }

    /// The sentinel returned by canvas operations that could not run.
    pub fn empty() -> Self {
        Self(SmolStr::default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl From<SmolStr> for NoteId {
    fn from(s: SmolStr) -> Self {
        Self(s)
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an edge, derived from its ordered `(source, target)` pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(SmolStr);

impl EdgeId {
    /// Deterministic id for a directed connection.
    ///
    /// The same ordered pair always yields the same id, which is what makes
    /// adding an edge idempotent. `(b, a)` is a different edge from `(a, b)`.
    pub fn for_pair(source: &NoteId, target: &NoteId) -> Self {
        Self(format_smolstr!("edge-{}-{}", source, target))
    }

    pub fn empty() -> Self {
        Self(SmolStr::default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed note palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopColor {
    #[default]
    Yellow,
    Blue,
    Pink,
    Green,
    Purple,
    Orange,
}

impl PopColor {
    pub const ALL: [PopColor; 6] = [
        PopColor::Yellow,
        PopColor::Blue,
        PopColor::Pink,
        PopColor::Green,
        PopColor::Purple,
        PopColor::Orange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PopColor::Yellow => "yellow",
            PopColor::Blue => "blue",
            PopColor::Pink => "pink",
            PopColor::Green => "green",
            PopColor::Purple => "purple",
            PopColor::Orange => "orange",
        }
    }

    /// CSS hex value used when rendering this color.
    pub fn hex(self) -> &'static str {
        match self {
            PopColor::Yellow => "#FFE600",
            PopColor::Blue => "#3B82F6",
            PopColor::Pink => "#EC4899",
            PopColor::Green => "#22C55E",
            PopColor::Purple => "#A855F7",
            PopColor::Orange => "#F97316",
        }
    }
}

impl fmt::Display for PopColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a color name outside the palette.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown color `{0}`")]
pub struct UnknownColor(pub String);

impl FromStr for PopColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PopColor::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

/// A point in canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

impl CanvasPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Structural metadata of one sticky note.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub color: PopColor,
    pub x: f64,
    pub y: f64,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// A new note with a fresh id, created now.
    pub fn new(x: f64, y: f64, color: PopColor) -> Self {
        Self {
            id: NoteId::generate(),
            color,
            x,
            y,
            created_at: Utc::now(),
        }
    }

    pub fn position(&self) -> CanvasPoint {
        CanvasPoint::new(self.x, self.y)
    }

    pub fn with_position(&self, x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..self.clone()
        }
    }

    pub fn with_color(&self, color: PopColor) -> Self {
        Self {
            color,
            ..self.clone()
        }
    }
}

/// A directed connection between two notes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NoteId,
    pub target: NoteId,
}

impl Edge {
    pub fn between(source: NoteId, target: NoteId) -> Self {
        Self {
            id: EdgeId::for_pair(&source, &target),
            source,
            target,
        }
    }

    /// Whether either endpoint is `note`.
    pub fn touches(&self, note: &NoteId) -> bool {
        &self.source == note || &self.target == note
    }
}

/// A record type stored as whole JSON values in one of the document lists.
pub trait Record: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug {
    /// Root list the records live in.
    const LIST: &'static str;

    /// Stable key of the record within its list.
    fn key(&self) -> &str;
}

impl Record for Note {
    const LIST: &'static str = "notes";

    fn key(&self) -> &str {
        self.id.as_str()
    }
}

impl Record for Edge {
    const LIST: &'static str = "edges";

    fn key(&self) -> &str {
        self.id.as_str()
    }
}

/// Converged view of the canvas structure.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CanvasSnapshot {
    pub notes: Vec<Note>,
    pub edges: Vec<Edge>,
}

impl CanvasSnapshot {
    pub fn note(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| &n.id == id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    pub fn contains_note(&self, id: &NoteId) -> bool {
        self.note(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.edges.is_empty()
    }
}
