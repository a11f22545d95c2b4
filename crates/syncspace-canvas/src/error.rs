//! Error types for canvas document operations.

use thiserror::Error;

/// Errors that can occur while reading or mutating the shared canvas document.
///
/// The canvas mutation API never surfaces these to callers; they are logged and
/// the operation degrades to a no-op. Lower layers (store, session, export)
/// return them so tests and tooling can see what went wrong.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CanvasError {
    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    Export(String),

    /// Loro rejected an operation (out of bounds index, detached container...).
    #[error("loro error: {0}")]
    Loro(String),

    /// A record could not be encoded to or decoded from its stored JSON form.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored list entry is not a record value.
    #[error("invalid record at index {index} in `{list}`")]
    InvalidRecord { list: &'static str, index: usize },

    /// The transport failed to connect or deliver.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote updates cannot be imported while a local transaction is open.
    #[error("cannot import remote updates inside an open transaction")]
    TransactionActive,
}

impl From<loro::LoroError> for CanvasError {
    fn from(e: loro::LoroError) -> Self {
        CanvasError::Loro(e.to_string())
    }
}

impl From<serde_json::Error> for CanvasError {
    fn from(e: serde_json::Error) -> Self {
        CanvasError::Serialization(e.to_string())
    }
}
