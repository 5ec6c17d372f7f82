// ============================================================================
// Rollback Strategies
// ============================================================================
//
// A strategy selects, orders and applies a subset of diff entries. The
// manager owns the operation state machine; strategies report progress and
// conflicts through the context's update channel and commit changes through
// its applier.
//
// ============================================================================

pub mod conflict;
pub mod context;
pub mod deps;
pub mod dry_run;
pub mod full;
pub mod partial;
pub mod time_based;

pub use conflict::{PolicyDecision, apply_policy, cycle_conflicts, detect_conflicts};
pub use context::{
    ChangeApplier, DryRunPreview, NoopApplier, RollbackOptions, StrategyContext, StrategyOutcome,
    StrategyUpdate, UpdateReceiver, UpdateSender,
};
pub use deps::{DependencyMap, DependencyOrder, order_by_dependencies};
pub use dry_run::DryRunStrategy;
pub use full::FullStrategy;
pub use partial::{PartialStrategy, SelectionCriteria, SelectionKind};
pub use time_based::{TimeBasedStrategy, TimeFilter};

use crate::core::{DiffEntry, OperationKind, Result};
use async_trait::async_trait;

/// Pluggable rollback algorithm.
#[async_trait]
pub trait RollbackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check whether this strategy can run against the context. A `false`
    /// resolves the surrounding operation as failed; the reason is logged
    /// through the context.
    async fn validate(&self, ctx: &StrategyContext) -> Result<bool>;

    /// Advisory wall-clock estimate for executing against the context.
    fn estimate_duration(&self, ctx: &StrategyContext) -> std::time::Duration;

    /// Run the strategy. Domain failures (conflicts under abort, invalid
    /// filters) surface as errors for the manager to fold into the
    /// operation; a dry run returns a preview without mutating anything.
    async fn execute(&self, ctx: &StrategyContext) -> Result<StrategyOutcome>;
}

/// Pick the strategy for a request: explicit dry-run wins, then a time
/// filter selects time-based, then selection criteria select partial,
/// otherwise the full baseline runs.
pub fn select_strategy(options: &RollbackOptions) -> Box<dyn RollbackStrategy> {
    match options.effective_kind() {
        OperationKind::DryRun => Box::new(DryRunStrategy),
        OperationKind::Full => Box::new(FullStrategy),
        OperationKind::Partial | OperationKind::Selective => {
            if options.selections.is_empty() && options.time_filter.is_some() {
                Box::new(TimeBasedStrategy)
            } else {
                Box::new(PartialStrategy)
            }
        }
    }
}

const BASE_OVERHEAD_MS: u64 = 50;
const PER_CHANGE_MS: u64 = 5;

pub(crate) fn estimate_for(change_count: usize) -> std::time::Duration {
    std::time::Duration::from_millis(BASE_OVERHEAD_MS + PER_CHANGE_MS * change_count as u64)
}

/// Progress consumed by the selection/ordering/conflict phases; application
/// then ramps linearly to 100.
pub(crate) const APPLY_BASE_PROGRESS: u8 = 35;

/// Apply entries in order through the context's applier, reporting linear
/// progress and honoring cancellation at change boundaries.
///
/// Returns the applied entries and whether the run was cancelled. A
/// cancelled run's already-applied changes are not reverted.
pub(crate) async fn apply_entries(
    ctx: &StrategyContext,
    entries: Vec<DiffEntry>,
    base_progress: u8,
) -> Result<(Vec<DiffEntry>, bool)> {
    let total = entries.len();
    if total == 0 {
        ctx.progress(100);
        return Ok((Vec::new(), false));
    }

    let base = u32::from(base_progress.min(100));
    let span = 100 - base;
    let mut applied = Vec::with_capacity(total);
    for (index, entry) in entries.into_iter().enumerate() {
        if ctx.is_cancelled() {
            ctx.log(format!("cancelled after {index} of {total} changes"));
            return Ok((applied, true));
        }
        ctx.applier.apply(&entry).await?;
        applied.push(entry);
        let pct = base + span * (index as u32 + 1) / total as u32;
        ctx.progress(pct as u8);
    }
    Ok((applied, false))
}
