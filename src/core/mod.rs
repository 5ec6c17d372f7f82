pub mod error;
pub mod events;
pub mod types;

pub use error::{Result, RollbackError};
pub use events::{EventBus, RollbackEvent};
pub use types::{
    ConflictKind, ConflictPolicy, ConflictResolver, ConflictStrategy, DiffEntry, DiffOp,
    ExecutionMode, OperationKind, OperationLogEntry, OperationStatus, RollbackConfig,
    RollbackConflict, RollbackDiff, RollbackMetrics, RollbackOperation, RollbackPoint, Snapshot,
    SnapshotKind,
};
