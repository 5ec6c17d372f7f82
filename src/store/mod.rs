// ============================================================================
// Snapshot Storage Module
// ============================================================================

pub mod persistence;
pub mod snapshot_store;

pub use persistence::{FileBackend, InMemoryBackend, PersistenceBackend};
pub use snapshot_store::{CleanupReport, SnapshotStore};
