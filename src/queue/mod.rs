//! Offline queue manager: the in-memory state machine over the
//! persistent store.
//!
//! `OfflineQueue` exclusively owns the mutation collection and is the
//! only writer to the [`QueueStore`]. The sync layer drives transitions
//! through `mark_syncing` / `mark_succeeded` / `mark_failed` and never
//! touches the store directly.
//!
//! Write path is persist-then-mirror: a mutation is visible in memory
//! only after its store write committed, so aggregate counts never get
//! ahead of durable state.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{QueueError, Result};
use crate::listeners::{ListenerSet, Unsubscribe};
use crate::store::{QueueStore, StatusUpdate};
use crate::types::{MutationKind, MutationStatus, QueuedMutation};

// ============================================================================
// Change events
// ============================================================================

/// What happened to a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueChange {
    Enqueued,
    Syncing,
    Failed,
    Succeeded,
    Requeued,
    Discarded,
}

/// Broadcast on every state transition.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub id: String,
    pub kind: MutationKind,
    pub change: QueueChange,
}

/// Queue change listener. Must not synchronously call back into a
/// mutating queue operation (see [`crate::listeners`]).
pub type QueueListener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

// ============================================================================
// OfflineQueue
// ============================================================================

pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    items: Mutex<Vec<QueuedMutation>>,
    listeners: ListenerSet<QueueListener>,
}

impl OfflineQueue {
    /// Load the store into the in-memory mirror.
    ///
    /// Items persisted as `syncing` are normalized back to `pending`: a
    /// restart means the in-flight outcome is unknown, and retrying is
    /// the safe side of the durability guarantee.
    pub fn new(store: Arc<dyn QueueStore>) -> Result<Self> {
        let mut items = store.load_all()?;
        for item in items.iter_mut() {
            if item.status == MutationStatus::Syncing {
                item.status = MutationStatus::Pending;
                store.update(&item.id, &StatusUpdate::of(item))?;
                debug!(id = %item.id, "recovered in-flight mutation as pending");
            }
        }
        Ok(Self {
            store,
            items: Mutex::new(items),
            listeners: ListenerSet::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create and durably persist a pending mutation; returns its id.
    ///
    /// A store failure propagates and leaves no trace in memory — the
    /// caller must never be told "saved" when it was not. Enqueue calls
    /// are serialized, so store commit order equals call order.
    pub fn enqueue(&self, kind: MutationKind, payload: Value) -> Result<String> {
        let mutation = QueuedMutation::new(kind, payload);
        let id = mutation.id.clone();
        {
            let mut items = self.items.lock();
            self.store.save(&mutation)?;
            items.push(mutation);
        }
        debug!(%id, %kind, "mutation enqueued");
        self.emit(id.clone(), kind, QueueChange::Enqueued);
        Ok(id)
    }

    /// `pending -> syncing`. Fails loudly on an unknown id or any other
    /// starting status; the persistence write is part of the transition.
    pub fn mark_syncing(&self, id: &str) -> Result<()> {
        let kind = {
            let mut items = self.items.lock();
            let item = find_mut(&mut items, id)?;
            if item.status != MutationStatus::Pending {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: item.status,
                    to: MutationStatus::Syncing,
                });
            }
            item.status = MutationStatus::Syncing;
            if let Err(e) = self.store.update(id, &StatusUpdate::of(item)) {
                item.status = MutationStatus::Pending;
                return Err(e);
            }
            item.kind
        };
        self.emit(id.to_string(), kind, QueueChange::Syncing);
        Ok(())
    }

    /// Remove a delivered mutation. Idempotent: an absent id is `Ok`.
    ///
    /// Store bookkeeping failures here are retried once and then logged
    /// rather than propagated — the send already succeeded, and the
    /// worst case on restart is one redundant retry.
    pub fn mark_succeeded(&self, id: &str) -> Result<()> {
        let kind = {
            let mut items = self.items.lock();
            let Some(pos) = items.iter().position(|m| m.id == id) else {
                return Ok(());
            };
            self.persist_delete(id);
            items.remove(pos).kind
        };
        debug!(%id, "mutation succeeded");
        self.emit(id.to_string(), kind, QueueChange::Succeeded);
        Ok(())
    }

    /// `syncing -> failed`: increments `retry_count`, records the error
    /// and attempt time. `terminal` marks the failure non-retriable.
    /// Bookkeeping write failures are absorbed like `mark_succeeded`.
    pub fn mark_failed(&self, id: &str, error_msg: &str, terminal: bool) -> Result<()> {
        let kind = {
            let mut items = self.items.lock();
            let item = find_mut(&mut items, id)?;
            if item.status != MutationStatus::Syncing {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: item.status,
                    to: MutationStatus::Failed,
                });
            }
            item.status = MutationStatus::Failed;
            item.retry_count += 1;
            item.terminal = item.terminal || terminal;
            item.last_error = Some(error_msg.to_string());
            item.last_attempt_at = Some(Utc::now());
            let update = StatusUpdate::of(item);
            let kind = item.kind;
            drop(items);
            self.persist_update(id, &update);
            kind
        };
        warn!(%id, error = %error_msg, terminal, "mutation send failed");
        self.emit(id.to_string(), kind, QueueChange::Failed);
        Ok(())
    }

    /// `failed -> pending`. Keeps `retry_count` (history drives backoff
    /// fairness) but clears the terminal marker — retrying a terminal
    /// failure is an explicit decision.
    pub fn requeue(&self, id: &str) -> Result<()> {
        let kind = {
            let mut items = self.items.lock();
            let item = find_mut(&mut items, id)?;
            if item.status != MutationStatus::Failed {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: item.status,
                    to: MutationStatus::Pending,
                });
            }
            let was_terminal = item.terminal;
            item.status = MutationStatus::Pending;
            item.terminal = false;
            if let Err(e) = self.store.update(id, &StatusUpdate::of(item)) {
                item.status = MutationStatus::Failed;
                item.terminal = was_terminal;
                return Err(e);
            }
            item.kind
        };
        self.emit(id.to_string(), kind, QueueChange::Requeued);
        Ok(())
    }

    /// User-initiated removal of a mutation that will never be sent.
    /// Refuses scoring mutations (discarding one loses score data) and
    /// in-flight items (an attempt already started for them).
    pub fn discard(&self, id: &str) -> Result<()> {
        let kind = {
            let mut items = self.items.lock();
            let pos = items
                .iter()
                .position(|m| m.id == id)
                .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;
            let item = &items[pos];
            if item.kind.carries_scores() {
                return Err(QueueError::DiscardRefused { id: id.to_string() });
            }
            if item.status == MutationStatus::Syncing {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: MutationStatus::Syncing,
                    to: MutationStatus::Succeeded,
                });
            }
            self.store.delete(id)?;
            items.remove(pos).kind
        };
        self.emit(id.to_string(), kind, QueueChange::Discarded);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn pending_count(&self) -> usize {
        self.count(MutationStatus::Pending)
    }

    pub fn syncing_count(&self) -> usize {
        self.count(MutationStatus::Syncing)
    }

    pub fn failed_count(&self) -> usize {
        self.count(MutationStatus::Failed)
    }

    /// Pending plus in-flight: the work that would be lost on exit.
    pub fn unsynced_count(&self) -> usize {
        self.items.lock().iter().filter(|m| m.is_unsynced()).count()
    }

    /// Ordered copy of the full queue (insertion order).
    pub fn snapshot(&self) -> Vec<QueuedMutation> {
        self.items.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<QueuedMutation> {
        self.items.lock().iter().find(|m| m.id == id).cloned()
    }

    /// Register a transition listener; fires on every state change.
    pub fn subscribe(&self, listener: QueueListener) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    fn count(&self, status: MutationStatus) -> usize {
        self.items.lock().iter().filter(|m| m.status == status).count()
    }

    fn emit(&self, id: String, kind: MutationKind, change: QueueChange) {
        let event = QueueEvent { id, kind, change };
        self.listeners.notify(|l| l(&event));
    }

    /// Bookkeeping write with one internal retry; divergence is logged,
    /// not propagated.
    fn persist_update(&self, id: &str, update: &StatusUpdate) {
        if let Err(first) = self.store.update(id, update) {
            warn!(%id, error = %first, "queue bookkeeping write failed, retrying");
            if let Err(second) = self.store.update(id, update) {
                error!(
                    %id,
                    error = %second,
                    "queue bookkeeping write failed twice; store lags memory until restart"
                );
            }
        }
    }

    fn persist_delete(&self, id: &str) {
        if let Err(first) = self.store.delete(id) {
            warn!(%id, error = %first, "queue delete failed, retrying");
            if let Err(second) = self.store.delete(id) {
                error!(
                    %id,
                    error = %second,
                    "queue delete failed twice; item may resurrect after restart"
                );
            }
        }
    }
}

fn find_mut<'a>(items: &'a mut [QueuedMutation], id: &str) -> Result<&'a mut QueuedMutation> {
    items
        .iter_mut()
        .find(|m| m.id == id)
        .ok_or_else(|| QueueError::NotFound { id: id.to_string() })
}

// ============================================================================
// Tests
// ============================================================================
