//! Background scheduling of automatic drains.
//!
//! Owns the periodic timer and the reconnect trigger. Automatic drains
//! are gated on being online and not paused; `manual_sync` bypasses the
//! scheduler entirely.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::listeners::Unsubscribe;
use crate::network::{NetworkChange, NetworkDetector};

use super::SyncManager;

pub struct SyncScheduler {
    handle: JoinHandle<()>,
    network_sub: Mutex<Option<Unsubscribe>>,
}

impl SyncScheduler {
    /// Spawn the scheduler loop. The first interval tick fires
    /// immediately, draining any backlog persisted by a previous run.
    pub fn start(manager: Arc<SyncManager>, detector: Arc<NetworkDetector>) -> Self {
        // Reconnect trigger: wake the loop when connectivity returns.
        let kick_manager = Arc::clone(&manager);
        let network_sub = detector.subscribe(Arc::new(move |change: &NetworkChange| {
            if change.came_online() {
                debug!("back online, waking sync");
                kick_manager.kick();
            }
        }));

        let interval = manager.config().sync_interval();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {}
                    _ = manager.kick_signal().notified() => {}
                }
                if detector.is_online() && !manager.is_paused() {
                    manager.drain().await;
                }
            }
        });

        Self {
            handle,
            network_sub: Mutex::new(Some(network_sub)),
        }
    }

    /// Stop the loop and detach from the detector. Idempotent; in-flight
    /// sends finish under their own timeout.
    pub fn shutdown(&self) {
        self.handle.abort();
        if let Some(unsub) = self.network_sub.lock().take() {
            unsub();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
