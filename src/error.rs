//! Crate-level error type and `Result` alias.
//!
//! Persistence failures are kept distinct from state-machine violations:
//! a `Storage` error during `enqueue` means the mutation was NOT durably
//! queued and must surface to the caller, while `NotFound` /
//! `InvalidTransition` indicate a caller bug or a lost race.

use thiserror::Error;

use crate::types::MutationStatus;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The persistent store failed. For `enqueue` this is fatal to the
    /// action — the mutation was not saved.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Mutation not found: {id}")]
    NotFound { id: String },

    #[error("Invalid transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: MutationStatus,
        to: MutationStatus,
    },

    /// Discard refused: the mutation carries scoring data.
    #[error("Cannot discard scoring mutation {id}")]
    DiscardRefused { id: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
