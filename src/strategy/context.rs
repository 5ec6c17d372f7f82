// ============================================================================
// Strategy Context
// ============================================================================
//
// Everything a strategy needs to run: the diff to consume, the caller's
// options, a sink for progress/log/conflict updates, a cooperative
// cancellation flag, and the applier that commits individual changes.
// Strategies never talk to the store or the event bus directly.
//
// ============================================================================

use crate::core::{
    ConflictPolicy, DiffEntry, ExecutionMode, OperationKind, Result, RollbackConflict,
    RollbackDiff, RollbackPoint,
};
use crate::diff::DiffSummary;
use crate::strategy::deps::DependencyMap;
use crate::strategy::partial::SelectionCriteria;
use crate::strategy::time_based::TimeFilter;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Caller-facing options for one rollback request.
#[derive(Clone, Default)]
pub struct RollbackOptions {
    pub kind: Option<OperationKind>,
    pub mode: ExecutionMode,
    pub conflict_policy: ConflictPolicy,
    pub selections: Vec<SelectionCriteria>,
    pub time_filter: Option<TimeFilter>,
    pub dependencies: Option<DependencyMap>,
    /// Advisory budget; strategies report estimates against it but no hard
    /// deadline is enforced.
    pub max_duration: Option<std::time::Duration>,
}

impl RollbackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn selection(mut self, criteria: SelectionCriteria) -> Self {
        self.selections.push(criteria);
        self
    }

    pub fn time_filter(mut self, filter: TimeFilter) -> Self {
        self.time_filter = Some(filter);
        self
    }

    pub fn dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    pub fn max_duration(mut self, budget: std::time::Duration) -> Self {
        self.max_duration = Some(budget);
        self
    }

    /// The operation kind recorded for this request; inferred from the
    /// supplied filters when not set explicitly.
    pub fn effective_kind(&self) -> OperationKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        if !self.selections.is_empty() {
            OperationKind::Partial
        } else if self.time_filter.is_some() {
            OperationKind::Selective
        } else {
            OperationKind::Full
        }
    }
}

/// Live feedback from an executing strategy, drained by the manager.
#[derive(Debug, Clone)]
pub enum StrategyUpdate {
    Progress(u8),
    Log(String),
    Conflict(RollbackConflict),
}

pub type UpdateSender = mpsc::UnboundedSender<StrategyUpdate>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<StrategyUpdate>;

/// Commits one diff entry to the live platform state.
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    async fn apply(&self, entry: &DiffEntry) -> Result<()>;
}

/// Applier that does nothing. Backs dry runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopApplier;

#[async_trait]
impl ChangeApplier for NoopApplier {
    async fn apply(&self, _entry: &DiffEntry) -> Result<()> {
        Ok(())
    }
}

/// Execution context handed to a strategy.
pub struct StrategyContext {
    pub diff: RollbackDiff,
    pub target: RollbackPoint,
    pub options: RollbackOptions,
    pub applier: Arc<dyn ChangeApplier>,
    pub updates: UpdateSender,
    pub cancelled: Arc<AtomicBool>,
}

impl StrategyContext {
    pub fn progress(&self, pct: u8) {
        let _ = self.updates.send(StrategyUpdate::Progress(pct.min(100)));
    }

    pub fn log(&self, message: impl Into<String>) {
        let _ = self.updates.send(StrategyUpdate::Log(message.into()));
    }

    pub fn conflict(&self, conflict: RollbackConflict) {
        let _ = self.updates.send(StrategyUpdate::Conflict(conflict));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What a dry run would have done.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunPreview {
    pub would_apply: Vec<DiffEntry>,
    pub conflicts: Vec<RollbackConflict>,
    /// Dependency cycles found in the supplied map, each as the chain of
    /// paths forming the loop.
    pub cycles: Vec<Vec<String>>,
    pub estimated_duration_ms: u64,
    pub summary: DiffSummary,
}

/// Result of a strategy run.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    pub applied: Vec<DiffEntry>,
    pub skipped: Vec<DiffEntry>,
    pub conflicts: Vec<RollbackConflict>,
    pub cancelled: bool,
    pub preview: Option<DryRunPreview>,
}
