//! Sync-specific types: the send boundary trait, its typed errors, and
//! the manager's published state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::MutationKind;

// ============================================================================
// MutationSender — user-provided network layer
// ============================================================================

/// User-implemented boundary that delivers one mutation to the backend.
///
/// Implementations own the wire protocol (REST, RPC, whatever the show
/// server speaks); the sync layer only consumes the typed result. Sends
/// are raced against the configured timeout by the manager, but an
/// implementation may carry its own tighter bound.
#[async_trait]
pub trait MutationSender: Send + Sync {
    async fn send(&self, kind: MutationKind, payload: &Value)
        -> std::result::Result<(), SendError>;
}

// ============================================================================
// SendError
// ============================================================================

/// Typed failure from a send attempt.
#[derive(Debug, Clone)]
pub struct SendError {
    pub message: String,
    pub kind: SendErrorKind,
}

impl SendError {
    pub fn new(kind: SendErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Server, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Validation, message)
    }

    pub fn retriable(&self) -> bool {
        self.kind.retriable()
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SendError {}

/// Classification of send failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Connectivity failure — retriable.
    Network,
    /// The attempt exceeded its time bound — retriable.
    Timeout,
    /// Backend-side error (5xx) — retriable.
    Server,
    /// Backend rejected the payload as malformed — terminal; retrying
    /// the same payload cannot succeed.
    Validation,
}

impl SendErrorKind {
    pub fn retriable(&self) -> bool {
        !matches!(self, Self::Validation)
    }
}

// ============================================================================
// SyncState
// ============================================================================

/// Aggregate sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Paused,
}

/// Published sync state. Owned exclusively by the
/// [`SyncManager`](super::SyncManager); read-only everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    /// Set only when a drain ends with nothing pending or in flight.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Human-readable description of the last failure category.
    pub error: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_sync_time: None,
            error: None,
        }
    }
}

/// Sync state listener, fired on every state change.
pub type SyncListener = Arc<dyn Fn(&SyncState) + Send + Sync>;
