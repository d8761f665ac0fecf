//! In-memory `QueueStore`.
//!
//! The platform-agnostic fake: used in tests and by hosts without a
//! durable substrate. Offers no restart survival, but preserves the
//! same ordering and atomicity contract as the SQLite store.

use parking_lot::Mutex;

use crate::error::{QueueError, Result};
use crate::types::QueuedMutation;

use super::{QueueStore, StatusUpdate};

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<QueuedMutation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryStore {
    fn save(&self, mutation: &QueuedMutation) -> Result<()> {
        self.items.lock().push(mutation.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<QueuedMutation>> {
        Ok(self.items.lock().clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.items.lock().retain(|m| m.id != id);
        Ok(())
    }

    fn update(&self, id: &str, update: &StatusUpdate) -> Result<()> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;
        item.status = update.status;
        item.retry_count = update.retry_count;
        item.terminal = update.terminal;
        item.last_error = update.last_error.clone();
        item.last_attempt_at = update.last_attempt_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MutationKind, MutationStatus};

    #[test]
    fn save_then_load_preserves_order() {
        let store = MemoryStore::new();
        let a = QueuedMutation::new(MutationKind::ScoreSubmit, serde_json::json!({"n": 1}));
        let b = QueuedMutation::new(MutationKind::CheckInChange, serde_json::json!({"n": 2}));
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, a.id);
        assert_eq!(loaded[1].id, b.id);
    }

    #[test]
    fn delete_missing_is_ok() {
        let store = MemoryStore::new();
        store.delete("nope").unwrap();
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let m = QueuedMutation::new(MutationKind::ScoreSubmit, serde_json::json!({}));
        let err = store.update("nope", &StatusUpdate::of(&m)).unwrap_err();
        assert!(matches!(err, QueueError::NotFound { .. }));
    }

    #[test]
    fn update_overwrites_mutable_fields() {
        let store = MemoryStore::new();
        let mut m = QueuedMutation::new(MutationKind::ScoreSubmit, serde_json::json!({}));
        store.save(&m).unwrap();

        m.status = MutationStatus::Failed;
        m.retry_count = 3;
        m.last_error = Some("timeout".to_string());
        store.update(&m.id, &StatusUpdate::of(&m)).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].status, MutationStatus::Failed);
        assert_eq!(loaded[0].retry_count, 3);
        assert_eq!(loaded[0].last_error.as_deref(), Some("timeout"));
    }
}
