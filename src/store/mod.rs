//! Persistent queue store boundary.
//!
//! The store is the single shared durable resource; only the
//! [`OfflineQueue`](crate::queue::OfflineQueue) writes to it.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{MutationStatus, QueuedMutation};

/// The full mutable field set of a queued mutation, written as one
/// atomic update. Immutable fields (`id`, `kind`, `payload`,
/// `created_at`) are fixed at save time.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: MutationStatus,
    pub retry_count: u32,
    pub terminal: bool,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// Snapshot the mutable fields of an in-memory item.
    pub fn of(item: &QueuedMutation) -> Self {
        Self {
            status: item.status,
            retry_count: item.retry_count,
            terminal: item.terminal,
            last_error: item.last_error.clone(),
            last_attempt_at: item.last_attempt_at,
        }
    }
}

/// Durable, key-indexed storage for queued mutations. Survives process
/// restart.
///
/// # Threading
/// All methods are synchronous. The SQLite implementation blocks the
/// calling thread; callers in async contexts should be aware of this.
/// Each operation is atomic — a mutation is either fully persisted or
/// not at all.
pub trait QueueStore: Send + Sync {
    /// Persist a new mutation. Commit order must follow call order.
    fn save(&self, mutation: &QueuedMutation) -> Result<()>;

    /// Load every stored mutation in original save order.
    fn load_all(&self) -> Result<Vec<QueuedMutation>>;

    /// Remove a mutation. Deleting an absent id is not an error.
    fn delete(&self, id: &str) -> Result<()>;

    /// Overwrite the mutable fields of a stored mutation.
    fn update(&self, id: &str, update: &StatusUpdate) -> Result<()>;
}
