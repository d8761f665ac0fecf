//! Core data model: queued mutations, their status machine, and the
//! engine configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// MutationKind
// ============================================================================

/// Tag identifying what a queued mutation does.
///
/// The payload itself is opaque to the queue; the kind is what the
/// safe-exit policy and the backend dispatch key off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    /// A judge's score sheet for an entry (armband, class, score fields).
    ScoreSubmit,
    /// Steward check-in status change for an entry.
    CheckInChange,
    /// Class-level status change (in ring, completed, moved).
    ClassStatusChange,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScoreSubmit => "score-submit",
            Self::CheckInChange => "check-in-change",
            Self::ClassStatusChange => "class-status-change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "score-submit" => Some(Self::ScoreSubmit),
            "check-in-change" => Some(Self::CheckInChange),
            "class-status-change" => Some(Self::ClassStatusChange),
            _ => None,
        }
    }

    /// Whether losing this mutation would lose scoring data.
    /// Drives the safe-exit guard's hard-deny path.
    pub fn carries_scores(&self) -> bool {
        matches!(self, Self::ScoreSubmit)
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MutationStatus
// ============================================================================

/// Queue status of a mutation.
///
/// Transitions: `Pending -> Syncing -> {removed | Failed}` and
/// `Failed -> Pending` via requeue. `Succeeded` only appears in change
/// events — succeeded items are removed from the store, never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Syncing,
    Failed,
    Succeeded,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "failed" => Some(Self::Failed),
            "succeeded" => Some(Self::Succeeded),
            _ => None,
        }
    }
}

// ============================================================================
// QueuedMutation
// ============================================================================

/// A user-initiated change waiting to reach the backend.
///
/// Exactly one instance exists per user action. The `id` is generated at
/// enqueue time and stays stable across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: String,
    pub kind: MutationKind,
    /// Opaque mutation data, validated by the producer, not the queue.
    pub payload: Value,
    pub status: MutationStatus,
    /// Incremented on each failed send attempt. Monotone non-decreasing
    /// for the lifetime of the item.
    pub retry_count: u32,
    /// Set when the backend classified the failure as non-retriable
    /// (validation rejection). Terminal items never re-enter automatic
    /// retry; only an explicit requeue clears the marker.
    pub terminal: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Time of the most recent send attempt; seeds backoff eligibility.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedMutation {
    /// Build a fresh pending mutation with a generated id.
    pub fn new(kind: MutationKind, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            status: MutationStatus::Pending,
            retry_count: 0,
            terminal: false,
            last_error: None,
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// Whether this item still represents unsynced work (pending or
    /// currently in flight).
    pub fn is_unsynced(&self) -> bool {
        matches!(
            self.status,
            MutationStatus::Pending | MutationStatus::Syncing
        )
    }
}

// ============================================================================
// SyncConfig
// ============================================================================

/// Engine configuration, supplied once at context init.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum concurrent in-flight send attempts per drain cycle.
    pub max_concurrency: usize,
    /// Attempts before a failed item is classified failed-terminal.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub base_backoff_ms: u64,
    /// Cap on the backoff delay.
    pub max_backoff_ms: u64,
    /// Periodic drain interval.
    pub sync_interval_ms: u64,
    /// Upper bound on a single send attempt; exceeding it counts as a
    /// failed attempt with a timeout error.
    pub send_timeout_ms: u64,
    /// Window within which rapid connectivity transitions collapse to a
    /// single notification.
    pub network_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            sync_interval_ms: 30_000,
            send_timeout_ms: 15_000,
            network_debounce_ms: 250,
        }
    }
}

impl SyncConfig {
    /// Retry delay for an item that has failed `retry_count` times:
    /// `base * 2^retry_count`, capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(31);
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn network_debounce(&self) -> Duration {
        Duration::from_millis(self.network_debounce_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
