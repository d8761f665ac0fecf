//! Drain-cycle orchestration: drive the queue to empty whenever
//! conditions allow, without flooding the backend.
//!
//! The manager owns [`SyncState`] and never mutates queue contents
//! directly — every transition goes through the queue's `mark_*`
//! operations, preserving single-writer discipline over the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::listeners::{ListenerSet, Unsubscribe};
use crate::queue::OfflineQueue;
use crate::types::{MutationStatus, QueuedMutation, SyncConfig};

use super::types::{
    MutationSender, SendError, SendErrorKind, SyncListener, SyncState, SyncStatus,
};

// ============================================================================
// SyncManager
// ============================================================================

pub struct SyncManager {
    config: SyncConfig,
    queue: Arc<OfflineQueue>,
    sender: Arc<dyn MutationSender>,
    state: Mutex<SyncState>,
    listeners: ListenerSet<SyncListener>,
    /// At most one drain cycle runs at a time; concurrent triggers
    /// coalesce through `rerun`.
    drain_gate: tokio::sync::Mutex<()>,
    /// Set when a trigger arrives mid-drain; the running drain takes one
    /// follow-up pass instead of a second drain starting.
    rerun: AtomicBool,
    paused: AtomicBool,
    /// Wakes the scheduler (reconnect, resume, host nudges).
    kick: Notify,
}

impl SyncManager {
    pub fn new(
        config: SyncConfig,
        queue: Arc<OfflineQueue>,
        sender: Arc<dyn MutationSender>,
    ) -> Self {
        Self {
            config,
            queue,
            sender,
            state: Mutex::new(SyncState::default()),
            listeners: ListenerSet::new(),
            drain_gate: tokio::sync::Mutex::new(()),
            rerun: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            kick: Notify::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sync_state(&self) -> SyncState {
        self.state.lock().clone()
    }

    /// Register a state listener; fires on every state change.
    pub fn subscribe(&self, listener: SyncListener) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop scheduling new send attempts. A cycle already in progress
    /// lets its in-flight sends finish naturally.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("sync paused");
        self.set_status(SyncStatus::Paused, None);
    }

    /// Leave the paused state and wake the scheduler for a drain.
    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("sync resumed");
        self.set_status(SyncStatus::Idle, None);
        self.kick();
    }

    /// Force an immediate drain attempt, regardless of the timer and of
    /// current connectivity (an offline attempt fails fast and feeds the
    /// normal retry path). No-op while paused.
    pub async fn manual_sync(&self) -> SyncState {
        self.drain().await;
        self.sync_state()
    }

    /// Wake the scheduler loop.
    pub(crate) fn kick(&self) {
        self.kick.notify_one();
    }

    pub(crate) fn kick_signal(&self) -> &Notify {
        &self.kick
    }

    // ------------------------------------------------------------------------
    // Drain
    // ------------------------------------------------------------------------

    /// Run drain cycles until the trigger backlog is consumed.
    ///
    /// If a drain is already running this returns immediately after
    /// flagging a follow-up pass — no duplicate concurrent drains.
    pub(crate) async fn drain(&self) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }
        let Ok(_gate) = self.drain_gate.try_lock() else {
            self.rerun.store(true, Ordering::SeqCst);
            return;
        };
        loop {
            self.run_cycle().await;
            if self.paused.load(Ordering::SeqCst) || !self.rerun.swap(false, Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn run_cycle(&self) {
        self.set_status(SyncStatus::Syncing, None);

        let now = Utc::now();
        let mut pending_spawn = self
            .queue
            .snapshot()
            .into_iter()
            .filter(|m| self.eligible_for_attempt(m, now))
            .collect::<Vec<_>>()
            .into_iter();
        debug!(eligible = pending_spawn.len(), "drain cycle started");

        let cap = self.config.max_concurrency.max(1);
        let mut attempts: JoinSet<AttemptOutcome> = JoinSet::new();

        let mut attempted = 0usize;
        let mut succeeded = 0usize;
        let mut unreachable = 0usize;
        let mut last_failure: Option<SendError> = None;

        loop {
            // Keep the in-flight window full; stop scheduling when paused
            // (in-flight attempts still finish below).
            while attempts.len() < cap && !self.paused.load(Ordering::SeqCst) {
                let Some(item) = pending_spawn.next() else { break };
                attempts.spawn(attempt(
                    Arc::clone(&self.queue),
                    Arc::clone(&self.sender),
                    self.config.send_timeout(),
                    item,
                ));
            }
            match attempts.join_next().await {
                None => break,
                Some(Ok(outcome)) => match outcome {
                    AttemptOutcome::Skipped => {}
                    AttemptOutcome::Succeeded => {
                        attempted += 1;
                        succeeded += 1;
                    }
                    AttemptOutcome::Failed(e) => {
                        attempted += 1;
                        if matches!(e.kind, SendErrorKind::Network | SendErrorKind::Timeout) {
                            unreachable += 1;
                        }
                        last_failure = Some(e);
                    }
                },
                Some(Err(join_err)) => warn!(error = %join_err, "send attempt task failed"),
            }
        }

        self.finish_cycle(attempted, succeeded, unreachable, last_failure);
    }

    /// An item may be attempted if it is pending, or failed-retriable
    /// with its exponential backoff elapsed. At most one in-flight
    /// attempt per item: `syncing` items are never re-selected.
    fn eligible_for_attempt(&self, item: &QueuedMutation, now: DateTime<Utc>) -> bool {
        match item.status {
            MutationStatus::Pending => true,
            MutationStatus::Failed => {
                if item.terminal || item.retry_count >= self.config.max_retries {
                    return false;
                }
                match item.last_attempt_at {
                    None => true,
                    Some(at) => {
                        let backoff = chrono::Duration::milliseconds(
                            self.config.backoff_delay(item.retry_count).as_millis() as i64,
                        );
                        now.signed_duration_since(at) >= backoff
                    }
                }
            }
            MutationStatus::Syncing | MutationStatus::Succeeded => false,
        }
    }

    fn finish_cycle(
        &self,
        attempted: usize,
        succeeded: usize,
        unreachable: usize,
        last_failure: Option<SendError>,
    ) {
        let snapshot = self.queue.snapshot();
        let unsynced = snapshot.iter().filter(|m| m.is_unsynced()).count();
        let needs_attention = snapshot
            .iter()
            .filter(|m| {
                m.status == MutationStatus::Failed
                    && (m.terminal || m.retry_count >= self.config.max_retries)
            })
            .count();
        // Every attempt failed to even reach the backend
        let systemic = attempted > 0 && succeeded == 0 && unreachable == attempted;

        let state = {
            let mut state = self.state.lock();
            if self.paused.load(Ordering::SeqCst) {
                state.status = SyncStatus::Paused;
                state.error = None;
            } else if needs_attention > 0 {
                state.status = SyncStatus::Error;
                state.error = Some(format!(
                    "{needs_attention} mutation(s) failed and need attention"
                ));
            } else if systemic {
                state.status = SyncStatus::Error;
                let detail = last_failure
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no response".to_string());
                state.error = Some(format!("backend unreachable: {detail}"));
            } else {
                state.status = SyncStatus::Idle;
                state.error = None;
            }
            if state.status == SyncStatus::Idle && unsynced == 0 {
                state.last_sync_time = Some(Utc::now());
            }
            state.clone()
        };
        info!(status = ?state.status, attempted, succeeded, "drain cycle finished");
        self.listeners.notify(|l| l(&state));
    }

    fn set_status(&self, status: SyncStatus, error: Option<String>) {
        let state = {
            let mut state = self.state.lock();
            if state.status == status && state.error == error {
                return;
            }
            state.status = status;
            state.error = error;
            state.clone()
        };
        self.listeners.notify(|l| l(&state));
    }
}

// ============================================================================
// Single send attempt
// ============================================================================

enum AttemptOutcome {
    /// Lost a race with another transition; nothing was sent.
    Skipped,
    Succeeded,
    Failed(SendError),
}

async fn attempt(
    queue: Arc<OfflineQueue>,
    sender: Arc<dyn MutationSender>,
    send_timeout: Duration,
    item: QueuedMutation,
) -> AttemptOutcome {
    // Failed items re-enter through pending, per the status machine
    if item.status == MutationStatus::Failed && queue.requeue(&item.id).is_err() {
        return AttemptOutcome::Skipped;
    }
    if queue.mark_syncing(&item.id).is_err() {
        return AttemptOutcome::Skipped;
    }

    let result = match tokio::time::timeout(send_timeout, sender.send(item.kind, &item.payload))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(SendError::timeout(format!(
            "send exceeded {}ms",
            send_timeout.as_millis()
        ))),
    };

    match result {
        Ok(()) => {
            if let Err(e) = queue.mark_succeeded(&item.id) {
                warn!(id = %item.id, error = %e, "mark_succeeded failed");
            }
            AttemptOutcome::Succeeded
        }
        Err(send_err) => {
            if let Err(e) = queue.mark_failed(&item.id, &send_err.message, !send_err.retriable()) {
                warn!(id = %item.id, error = %e, "mark_failed failed");
            }
            AttemptOutcome::Failed(send_err)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
