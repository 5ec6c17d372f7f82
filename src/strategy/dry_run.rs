// ============================================================================
// Dry-run Strategy
// ============================================================================
//
// Never mutates anything. Computes a full preview over the entire diff:
// what would apply (in dependency order), every conflict including true
// dependency cycles, the estimated duration and a change summary.
//
// ============================================================================

use crate::core::Result;
use crate::diff::summarize_diff;
use crate::strategy::conflict::{cycle_conflicts, detect_conflicts};
use crate::strategy::context::{DryRunPreview, StrategyContext, StrategyOutcome};
use crate::strategy::deps::order_by_dependencies;
use crate::strategy::{RollbackStrategy, estimate_for};
use async_trait::async_trait;

pub struct DryRunStrategy;

#[async_trait]
impl RollbackStrategy for DryRunStrategy {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    /// A preview is always possible.
    async fn validate(&self, _ctx: &StrategyContext) -> Result<bool> {
        Ok(true)
    }

    fn estimate_duration(&self, ctx: &StrategyContext) -> std::time::Duration {
        // Preview only walks the diff; a fraction of a real run.
        std::time::Duration::from_millis(10 + ctx.diff.change_count as u64)
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<StrategyOutcome> {
        ctx.log(format!(
            "dry run over {} change(s); nothing will be applied",
            ctx.diff.change_count
        ));
        ctx.progress(10);

        let dependencies = ctx.options.dependencies.as_ref();
        let (ordered, cycles) = match dependencies {
            Some(map) => {
                let order = order_by_dependencies(ctx.diff.changes.clone(), map);
                (order.entries, order.cycles)
            }
            None => (ctx.diff.changes.clone(), Vec::new()),
        };
        ctx.progress(40);

        let mut conflicts = detect_conflicts(&ordered, dependencies);
        conflicts.extend(cycle_conflicts(&cycles));
        ctx.progress(70);

        let estimated = estimate_for(ordered.len());
        let preview = DryRunPreview {
            would_apply: ordered,
            conflicts: conflicts.clone(),
            cycles,
            estimated_duration_ms: estimated.as_millis() as u64,
            summary: summarize_diff(&ctx.diff),
        };
        ctx.progress(100);

        Ok(StrategyOutcome {
            applied: Vec::new(),
            skipped: Vec::new(),
            conflicts,
            cancelled: false,
            preview: Some(preview),
        })
    }
}
