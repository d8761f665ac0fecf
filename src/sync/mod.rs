pub mod manager;
pub mod scheduler;
pub mod types;

pub use manager::SyncManager;
pub use scheduler::SyncScheduler;
pub use types::{
    MutationSender, SendError, SendErrorKind, SyncListener, SyncState, SyncStatus,
};
