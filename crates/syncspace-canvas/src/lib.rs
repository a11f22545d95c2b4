//! Collaborative canvas backed by a Loro document.
//!
//! This crate provides:
//! - `CanvasStore`: the replicated note list, edge list and per-note texts,
//!   with transaction batching and change observers
//! - `NoteTextBinding`: keeps an editable string in step with a note's text
//! - `Canvas`: the mutation API (add/update/delete notes and edges)
//! - `UndoManager`: collaborative undo/redo with a capture window
//! - `ConnectionMonitor`: connection state machine and its notices
//! - `CanvasSession`: init/teardown of one replica against a `SyncProvider`
//! - Presence tracking, JSON export/import and an in-process loopback room

mod canvas;
mod changes;
mod connection;
mod error;
mod export;
mod observer;
mod presence;
mod session;
mod store;
mod text;
mod types;
mod undo;

pub mod transport;

pub use canvas::{Canvas, NoteView};
pub use changes::{ChangeSet, RecordChange};
pub use connection::{
    ConnectionChange, ConnectionMonitor, ConnectionStatus, Notice, NoticeLevel,
    SYNCED_NOTICE_DURATION,
};
pub use error::CanvasError;
pub use export::{CanvasExport, ExportedNote, ImportSummary};
pub use observer::Subscription;
pub use presence::{ConnectionId, LocalIdentity, Peer, PeerCursor, PresenceEvent, PresenceTracker};
pub use session::{CanvasSession, InitOutcome};
pub use store::{CanvasEvent, CanvasStore, Origin, Txn, text_key};
pub use text::{NoteTextBinding, replace_note_text};
pub use transport::{LoopbackProvider, LoopbackRoom, ProviderEvent, SyncProvider};
pub use types::{
    CanvasPoint, CanvasSnapshot, Edge, EdgeId, Note, NoteId, PopColor, Record, UnknownColor,
};
pub use undo::{UndoConfig, UndoManager, UndoStatus};

// Re-export Loro types that consumers need
pub use loro::{LoroDoc, VersionVector};
