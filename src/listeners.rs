//! Shared observer plumbing for queue, network, and sync-state events.
//!
//! Dispatch is serialized: listeners registered on one set are never
//! invoked concurrently, and within a notification they fire in
//! registration order.
//!
//! # Re-entrancy
//! A listener must not synchronously call back into a mutating operation
//! on the component it observes — defer such work to another task. The
//! dispatch lock is not re-entrant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Closure that removes a registered listener. Dropping it without
/// calling leaves the listener registered for the component's lifetime.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// A set of listeners with serialized, ordered dispatch.
pub(crate) struct ListenerSet<L> {
    entries: Arc<Mutex<Vec<(u64, L)>>>,
    next_id: AtomicU64,
    dispatch: Mutex<()>,
}

impl<L: Clone + Send + 'static> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            dispatch: Mutex::new(()),
        }
    }

    /// Register a listener; returns an unsubscribe closure.
    pub fn subscribe(&self, listener: L) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));

        let entries = Arc::downgrade(&self.entries);
        Box::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every registered listener, in registration order, under the
    /// dispatch lock. The entries lock is released before invocation so a
    /// listener may unsubscribe itself (or others) without deadlocking.
    pub fn notify(&self, invoke: impl Fn(&L)) {
        let _serialized = self.dispatch.lock();
        let snapshot: Vec<L> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in &snapshot {
            invoke(listener);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
