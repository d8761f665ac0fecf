//! Offline-first mutation queue and sync engine for ring-side scoring
//! apps.
//!
//! Judges and stewards keep scoring while disconnected: every mutation
//! is persisted locally before any network round-trip, tracked through a
//! pending/syncing/failed state machine with retry and backoff, and
//! drained automatically when connectivity returns. A safe-exit guard
//! blocks logout while unsynced work remains.
//!
//! The host supplies three capability implementations at
//! [`SyncContext::init`]: a [`QueueStore`] (durable local storage — the
//! bundled [`SqliteStore`] or anything else), a [`ConnectivitySource`]
//! (platform connectivity probe), and a [`MutationSender`] (the wire
//! protocol to the show backend).

pub mod context;
pub mod error;
pub mod guard;
pub mod listeners;
pub mod network;
pub mod queue;
pub mod store;
pub mod sync;
pub mod types;

pub use context::SyncContext;
pub use error::{QueueError, Result};
pub use guard::{ExitBlockReason, ExitBlocked, ExitCheck, SafeExitGuard};
pub use listeners::Unsubscribe;
pub use network::{
    ConnectionType, ConnectivitySource, EffectiveType, NetworkChange, NetworkDetector,
    NetworkInfo, NetworkListener,
};
pub use queue::{OfflineQueue, QueueChange, QueueEvent, QueueListener};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{MemoryStore, QueueStore, StatusUpdate};
pub use sync::{
    MutationSender, SendError, SendErrorKind, SyncListener, SyncManager, SyncScheduler,
    SyncState, SyncStatus,
};
pub use types::{MutationKind, MutationStatus, QueuedMutation, SyncConfig};
