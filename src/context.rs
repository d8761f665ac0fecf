//! Application-level wiring with an explicit lifecycle.
//!
//! One `SyncContext` exists per app instance, constructed at startup and
//! passed by reference to consumers — no hidden global state. `init`
//! wires the queue, detector, manager, and guard together and starts the
//! background scheduler; `dispose` stops background work.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::guard::{ExitBlocked, ExitCheck, SafeExitGuard};
use crate::network::{ConnectivitySource, NetworkDetector, NetworkInfo};
use crate::queue::OfflineQueue;
use crate::store::QueueStore;
use crate::sync::{MutationSender, SyncManager, SyncScheduler, SyncState};
use crate::types::{MutationKind, SyncConfig};

pub struct SyncContext {
    queue: Arc<OfflineQueue>,
    detector: Arc<NetworkDetector>,
    manager: Arc<SyncManager>,
    guard: SafeExitGuard,
    scheduler: Mutex<Option<SyncScheduler>>,
}

impl SyncContext {
    /// Wire the engine and start background sync.
    ///
    /// Must be called within a Tokio runtime: the scheduler and the
    /// detector's debounce timers are spawned tasks. Fails if the store
    /// cannot be loaded — an unreadable queue store means the offline
    /// guarantee cannot be honored, which the host must surface.
    pub fn init(
        config: SyncConfig,
        store: Arc<dyn QueueStore>,
        connectivity: Arc<dyn ConnectivitySource>,
        sender: Arc<dyn MutationSender>,
    ) -> Result<Arc<Self>> {
        let queue = Arc::new(OfflineQueue::new(store)?);
        let detector = Arc::new(NetworkDetector::new(
            connectivity,
            config.network_debounce(),
        ));
        let manager = Arc::new(SyncManager::new(
            config,
            Arc::clone(&queue),
            sender,
        ));
        let scheduler = SyncScheduler::start(Arc::clone(&manager), Arc::clone(&detector));
        let guard = SafeExitGuard::new(Arc::clone(&queue), Arc::clone(&detector));
        info!(unsynced = queue.unsynced_count(), "sync context initialized");

        Ok(Arc::new(Self {
            queue,
            detector,
            manager,
            guard,
            scheduler: Mutex::new(Some(scheduler)),
        }))
    }

    /// Stop background sync. Idempotent. Queued mutations stay persisted
    /// and will drain on the next `init`.
    pub fn dispose(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
            info!("sync context disposed");
        }
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    pub fn network(&self) -> Arc<NetworkDetector> {
        Arc::clone(&self.detector)
    }

    pub fn sync(&self) -> Arc<SyncManager> {
        Arc::clone(&self.manager)
    }

    pub fn guard(&self) -> &SafeExitGuard {
        &self.guard
    }

    // ------------------------------------------------------------------------
    // Convenience surface (status bars, toasts, logout flow)
    // ------------------------------------------------------------------------

    pub fn enqueue(&self, kind: MutationKind, payload: Value) -> Result<String> {
        self.queue.enqueue(kind, payload)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn failed_count(&self) -> usize {
        self.queue.failed_count()
    }

    pub fn sync_state(&self) -> SyncState {
        self.manager.sync_state()
    }

    pub fn network_info(&self) -> NetworkInfo {
        self.detector.network_info()
    }

    pub async fn manual_sync(&self) -> SyncState {
        self.manager.manual_sync().await
    }

    pub fn pause_sync(&self) {
        self.manager.pause();
    }

    pub fn resume_sync(&self) {
        self.manager.resume();
    }

    pub fn can_safely_exit(&self) -> ExitCheck {
        self.guard.can_safely_exit()
    }

    pub fn force_exit(&self) -> std::result::Result<(), ExitBlocked> {
        self.guard.force_exit()
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.dispose();
    }
}
