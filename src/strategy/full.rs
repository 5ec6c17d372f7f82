// ============================================================================
// Full Rollback Strategy
// ============================================================================

use crate::strategy::conflict::{apply_policy, cycle_conflicts, detect_conflicts};
use crate::strategy::context::{StrategyContext, StrategyOutcome};
use crate::strategy::deps::order_by_dependencies;
use crate::strategy::{APPLY_BASE_PROGRESS, RollbackStrategy, apply_entries, estimate_for};
use async_trait::async_trait;

/// Baseline strategy: the whole diff, in listed order (or dependency order
/// when a map is supplied), with conflicts checked over the full set.
pub struct FullStrategy;

#[async_trait]
impl RollbackStrategy for FullStrategy {
    fn name(&self) -> &'static str {
        "full"
    }

    async fn validate(&self, _ctx: &StrategyContext) -> crate::core::Result<bool> {
        Ok(true)
    }

    fn estimate_duration(&self, ctx: &StrategyContext) -> std::time::Duration {
        estimate_for(ctx.diff.change_count)
    }

    async fn execute(&self, ctx: &StrategyContext) -> crate::core::Result<StrategyOutcome> {
        ctx.log(format!(
            "full rollback: {} change(s) against point {}",
            ctx.diff.change_count, ctx.target.id
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
        ctx.progress(20);

        let mut conflicts = detect_conflicts(&ordered, dependencies);
        conflicts.extend(cycle_conflicts(&cycles));
        ctx.progress(30);

        let decision =
            apply_policy(ordered, conflicts, &ctx.options.conflict_policy, ctx).await?;
        if !decision.skipped.is_empty() {
            ctx.log(format!(
                "{} conflicting change(s) skipped by policy",
                decision.skipped.len()
            ));
        }

        let (applied, cancelled) = apply_entries(ctx, decision.entries, APPLY_BASE_PROGRESS).await?;
        Ok(StrategyOutcome {
            applied,
            skipped: decision.skipped,
            conflicts: decision.conflicts,
            cancelled,
            preview: None,
        })
    }
}
