// ============================================================================
// Core Data Model
// ============================================================================
//
// Rollback points anchor a moment in time; snapshots hold the captured state
// for one category of data; diffs describe how to get from one state to
// another; operations track an in-flight rollback through its state machine.
//
// Everything here is plain data. The SnapshotStore owns lifecycle, the
// DiffEngine produces diff entries, and the RollbackManager drives the
// operation state machine.
//
// ============================================================================

use crate::core::{Result, RollbackError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Named, timestamped anchor to which state may be restored.
///
/// Immutable once stored; destroyed on explicit delete or TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub id: Uuid,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RollbackPoint {
    /// Create a new rollback point stamped with the current time.
    ///
    /// # Errors
    /// Returns `Validation` if `expires_at` is not strictly after the
    /// creation timestamp.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        metadata: HashMap<String, Value>,
        session_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let timestamp = Utc::now();
        if let Some(expiry) = expires_at {
            if expiry <= timestamp {
                return Err(RollbackError::Validation(format!(
                    "expires_at {} must be after creation time {}",
                    expiry, timestamp
                )));
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp,
            description,
            metadata,
            session_id,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Category of captured state a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Entity,
    Relationship,
    File,
    Configuration,
    SessionState,
    Metadata,
}

impl SnapshotKind {
    /// All kinds, in the deterministic order used when composing diffs.
    pub const ALL: [SnapshotKind; 6] = [
        SnapshotKind::Entity,
        SnapshotKind::Relationship,
        SnapshotKind::File,
        SnapshotKind::Configuration,
        SnapshotKind::SessionState,
        SnapshotKind::Metadata,
    ];

    /// Root path segment under which this kind's changes appear in a
    /// composed rollback diff.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            SnapshotKind::Entity => "entities",
            SnapshotKind::Relationship => "relationships",
            SnapshotKind::File => "files",
            SnapshotKind::Configuration => "configuration",
            SnapshotKind::SessionState => "session",
            SnapshotKind::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path_prefix())
    }
}

/// Captured data for one category, exclusively owned by its rollback point.
///
/// Never mutated after capture; destroyed with its point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub rollback_point_id: Uuid,
    pub kind: SnapshotKind,
    pub data: Value,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub checksum: Option<String>,
}

impl Snapshot {
    /// Capture a snapshot of `data`, recording its serialized size and a
    /// content checksum.
    pub fn capture(rollback_point_id: Uuid, kind: SnapshotKind, data: Value) -> Self {
        let encoded = data.to_string();
        Self {
            id: Uuid::new_v4(),
            rollback_point_id,
            kind,
            checksum: Some(checksum_of(&encoded)),
            size: encoded.len(),
            data,
            created_at: Utc::now(),
        }
    }

    /// Re-compute the checksum and compare against the recorded one.
    /// Snapshots captured without a checksum verify trivially.
    pub fn verify_checksum(&self) -> bool {
        match &self.checksum {
            Some(recorded) => checksum_of(&self.data.to_string()) == *recorded,
            None => true,
        }
    }
}

/// FNV-1a over the canonical JSON encoding. Stable across runs, cheap, and
/// sufficient for integrity checks (not cryptographic).
pub(crate) fn checksum_of(encoded: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in encoded.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

/// One change at a structural path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    Create,
    Update,
    Delete,
    Move,
}

impl std::fmt::Display for DiffOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DiffOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffOp::Create => "create",
            DiffOp::Update => "update",
            DiffOp::Delete => "delete",
            DiffOp::Move => "move",
        }
    }
}

/// A single create/update/delete/move at a structural path.
///
/// Produced only by the diff engine; immutable thereafter. For `Move`
/// entries, `old_value`/`new_value` hold the prior and new array index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub op: DiffOp,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub metadata: Option<Value>,
}

/// Ordered set of changes between two states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackDiff {
    pub from: String,
    pub to: String,
    pub changes: Vec<DiffEntry>,
    pub change_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl RollbackDiff {
    pub fn new(from: impl Into<String>, to: impl Into<String>, changes: Vec<DiffEntry>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            change_count: changes.len(),
            changes,
            generated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// What kind of rollback an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Full,
    Partial,
    Selective,
    DryRun,
}

/// How aggressively a strategy applies changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Immediate,
    Gradual,
    #[default]
    Safe,
    Force,
}

/// Operation lifecycle.
///
/// ```text
/// Pending ──start──> InProgress ──complete──> Completed
///    │                   │
///    │                   ├──fail──> Failed
///    └───────────────────┴──cancel──> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InProgress)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Timestamped line in an operation's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// An in-flight (or finished) rollback.
///
/// Mutated only by the manager and the active strategy's progress/log
/// callbacks; removed from the store after a retention window once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub target_rollback_point_id: Uuid,
    pub status: OperationStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mode: ExecutionMode,
    pub log: Vec<OperationLogEntry>,
}

impl RollbackOperation {
    pub fn new(kind: OperationKind, target_rollback_point_id: Uuid, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target_rollback_point_id,
            status: OperationStatus::Pending,
            progress: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            mode,
            log: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.log.push(OperationLogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Raise progress. Monotonically non-decreasing while in progress;
    /// regressions are clamped to the current value.
    pub fn set_progress(&mut self, progress: u8) {
        if self.status == OperationStatus::InProgress {
            self.progress = self.progress.max(progress.min(100));
        }
    }

    /// # Errors
    /// Returns `InvalidState` unless the operation is `Pending`.
    pub fn start(&mut self) -> Result<()> {
        if self.status != OperationStatus::Pending {
            return Err(RollbackError::InvalidState(format!(
                "cannot start operation {}: status is {}",
                self.id, self.status
            )));
        }
        self.status = OperationStatus::InProgress;
        Ok(())
    }

    /// # Errors
    /// Returns `InvalidState` unless the operation is `InProgress`.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != OperationStatus::InProgress {
            return Err(RollbackError::InvalidState(format!(
                "cannot complete operation {}: status is {}",
                self.id, self.status
            )));
        }
        self.status = OperationStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Resolve the operation as failed, recording the error message.
    ///
    /// # Errors
    /// Returns `InvalidState` if already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(RollbackError::InvalidState(format!(
                "cannot fail operation {}: status is {}",
                self.id, self.status
            )));
        }
        self.status = OperationStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// # Errors
    /// Returns `InvalidState` if already terminal.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(RollbackError::InvalidState(format!(
                "cannot cancel operation {}: status is {}",
                self.id, self.status
            )));
        }
        self.status = OperationStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Why the rollback target cannot be unambiguously reconciled with current
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ValueMismatch,
    MissingTarget,
    TypeMismatch,
    PermissionDenied,
    DependencyConflict,
}

/// A detected conflict at one path. Transient: produced during conflict
/// detection, never persisted independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConflict {
    pub path: String,
    pub kind: ConflictKind,
    pub current_value: Option<Value>,
    pub rollback_value: Option<Value>,
    pub context: HashMap<String, String>,
}

impl RollbackConflict {
    pub fn new(path: impl Into<String>, kind: ConflictKind) -> Self {
        Self {
            path: path.into(),
            kind,
            current_value: None,
            rollback_value: None,
            context: HashMap::new(),
        }
    }

    pub fn with_values(mut self, current: Option<Value>, rollback: Option<Value>) -> Self {
        self.current_value = current;
        self.rollback_value = rollback;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Policy applied when conflicts are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Raise an error carrying the full conflict list; nothing is committed.
    Abort,
    /// Drop the conflicting entries and continue.
    Skip,
    /// Apply rollback values unconditionally.
    Overwrite,
    /// Delegate each conflict to the caller-supplied resolver.
    Merge,
    /// Surface a `conflict-detected` event; the headless core then skips.
    AskUser,
}

/// Caller-supplied resolver consulted under the `Merge` policy.
#[async_trait::async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Decide how to handle one conflict. Returning `Merge` again is treated
    /// as `Skip` to guarantee termination.
    async fn resolve(&self, conflict: &RollbackConflict) -> ConflictStrategy;
}

/// Conflict strategy plus the optional resolver backing `Merge`.
#[derive(Clone)]
pub struct ConflictPolicy {
    pub strategy: ConflictStrategy,
    pub resolver: Option<std::sync::Arc<dyn ConflictResolver>>,
}

impl ConflictPolicy {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: std::sync::Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::new(ConflictStrategy::Abort)
    }
}

impl std::fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictPolicy")
            .field("strategy", &self.strategy)
            .field("resolver", &self.resolver.as_ref().map(|_| "<resolver>"))
            .finish()
    }
}

/// Aggregate counters for the subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackMetrics {
    pub total_rollback_points: u64,
    pub successful_rollbacks: u64,
    pub failed_rollbacks: u64,
    /// Weighted running mean over successful rollbacks, in milliseconds.
    pub average_rollback_time_ms: f64,
    /// Estimated bytes held by points, snapshots and operations.
    pub memory_usage: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl RollbackMetrics {
    /// Fold a successful rollback's elapsed time into the running mean:
    /// `(old * (n - 1) + new) / n` where `n` is the post-increment count.
    pub fn record_success(&mut self, elapsed_ms: f64) {
        self.successful_rollbacks += 1;
        let n = self.successful_rollbacks as f64;
        self.average_rollback_time_ms =
            (self.average_rollback_time_ms * (n - 1.0) + elapsed_ms) / n;
    }

    pub fn record_failure(&mut self) {
        self.failed_rollbacks += 1;
    }
}

/// Subsystem configuration.
#[derive(Debug, Clone)]
pub struct RollbackConfig {
    /// LRU capacity for rollback points.
    pub max_points: usize,
    /// TTL applied to new points unless overridden per point.
    pub default_ttl: Option<Duration>,
    /// Interval between scheduled cleanup passes.
    pub cleanup_interval: std::time::Duration,
    /// How long terminal operations are retained before cleanup removes them.
    pub operation_retention: Duration,
}

impl RollbackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn cleanup_interval(mut self, interval: std::time::Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn operation_retention(mut self, retention: Duration) -> Self {
        self.operation_retention = retention;
        self
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_points: 50,
            default_ttl: None,
            cleanup_interval: std::time::Duration::from_secs(300),
            operation_retention: Duration::hours(24),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rollback_point_expiry_validation() {
        let past = Utc::now() - Duration::hours(1);
        let result = RollbackPoint::new("bad", None, HashMap::new(), None, Some(past));
        assert!(result.is_err());

        let future = Utc::now() + Duration::hours(1);
        let point = RollbackPoint::new("good", None, HashMap::new(), None, Some(future)).unwrap();
        assert!(!point.is_expired(Utc::now()));
        assert!(point.is_expired(Utc::now() + Duration::hours(2)));
    }

    #[test]
    fn test_snapshot_checksum_roundtrip() {
        let snapshot = Snapshot::capture(
            Uuid::new_v4(),
            SnapshotKind::Entity,
            json!({"e1": {"name": "alpha"}}),
        );
        assert!(snapshot.checksum.is_some());
        assert!(snapshot.verify_checksum());
        assert!(snapshot.size > 0);
    }

    #[test]
    fn test_operation_lifecycle() {
        let mut op = RollbackOperation::new(
            OperationKind::Full,
            Uuid::new_v4(),
            ExecutionMode::Immediate,
        );
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(op.status.is_active());

        op.start().unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);

        op.set_progress(40);
        op.set_progress(20); // regression clamped
        assert_eq!(op.progress, 40);

        op.complete().unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.progress, 100);
        assert!(op.status.is_terminal());
        assert!(op.completed_at.is_some());
    }

    #[test]
    fn test_operation_cannot_complete_twice() {
        let mut op = RollbackOperation::new(
            OperationKind::Full,
            Uuid::new_v4(),
            ExecutionMode::Immediate,
        );
        op.start().unwrap();
        op.complete().unwrap();
        assert!(op.complete().is_err());
        assert!(op.fail("late").is_err());
        assert!(op.cancel().is_err());
    }

    #[test]
    fn test_metrics_running_mean() {
        let mut metrics = RollbackMetrics::default();
        metrics.record_success(100.0);
        metrics.record_success(200.0);
        metrics.record_success(300.0);
        assert_eq!(metrics.successful_rollbacks, 3);
        assert!((metrics.average_rollback_time_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_diff_invariant_change_count() {
        let diff = RollbackDiff::new(
            "current",
            "target",
            vec![DiffEntry {
                path: "entities.e1".into(),
                op: DiffOp::Delete,
                old_value: Some(json!({"name": "alpha"})),
                new_value: None,
                metadata: None,
            }],
        );
        assert_eq!(diff.change_count, diff.changes.len());
    }
}
