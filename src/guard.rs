//! Safe-exit guard: vetoes destructive user actions (logout) while
//! unsynced work remains.
//!
//! Data-loss blocks have no bypass. The offline warning does — going
//! back to a login screen without connectivity is a risk, not a loss.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::NetworkDetector;
use crate::queue::OfflineQueue;

/// Why an exit was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitBlockReason {
    /// Undelivered scoring data exists. Never bypassable.
    PendingScores,
    /// Undelivered non-scoring mutations exist. Never bypassable.
    PendingChanges,
    /// No connectivity: logging back in may not be possible. Bypassable.
    Offline,
}

impl ExitBlockReason {
    pub fn bypassable(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl std::fmt::Display for ExitBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingScores => "pending_scores",
            Self::PendingChanges => "pending_changes",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Outcome of an exit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCheck {
    pub allowed: bool,
    pub reason: Option<ExitBlockReason>,
}

impl ExitCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: ExitBlockReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Returned by [`SafeExitGuard::force_exit`] when the block is one of
/// the data-loss cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("exit blocked: {reason}")]
pub struct ExitBlocked {
    pub reason: ExitBlockReason,
}

// ============================================================================
// SafeExitGuard
// ============================================================================

pub struct SafeExitGuard {
    queue: Arc<OfflineQueue>,
    detector: Arc<NetworkDetector>,
}

impl SafeExitGuard {
    pub fn new(queue: Arc<OfflineQueue>, detector: Arc<NetworkDetector>) -> Self {
        Self { queue, detector }
    }

    /// Decision policy, in priority order: any undelivered scoring
    /// mutation denies with `PendingScores`; any other undelivered
    /// mutation denies with `PendingChanges`; being offline denies with
    /// the bypassable `Offline` warning; otherwise the exit is allowed.
    ///
    /// Failed items count as undelivered — they still hold data the
    /// backend never saw. Clearing them (retry to completion, requeue,
    /// or discard for non-scoring kinds) is what unblocks the exit.
    pub fn can_safely_exit(&self) -> ExitCheck {
        let snapshot = self.queue.snapshot();
        if snapshot.iter().any(|m| m.kind.carries_scores()) {
            return ExitCheck::denied(ExitBlockReason::PendingScores);
        }
        if !snapshot.is_empty() {
            return ExitCheck::denied(ExitBlockReason::PendingChanges);
        }
        if !self.detector.is_online() {
            return ExitCheck::denied(ExitBlockReason::Offline);
        }
        ExitCheck::allowed()
    }

    /// Explicit bypass for the `Offline` warning only. The data-loss
    /// cases return the blocking reason instead.
    pub fn force_exit(&self) -> Result<(), ExitBlocked> {
        match self.can_safely_exit().reason {
            None => Ok(()),
            Some(reason) if reason.bypassable() => Ok(()),
            Some(reason) => Err(ExitBlocked { reason }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
