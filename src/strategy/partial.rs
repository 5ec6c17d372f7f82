// ============================================================================
// Partial Rollback Strategy
// ============================================================================
//
// Filters the full diff by caller-supplied selections, evaluated
// highest-priority-first and de-duplicated by path, then orders the
// survivors by the shared dependency walk and checks conflicts only within
// the selected subset.
//
// ============================================================================

use crate::core::{DiffEntry, Result, RollbackError};
use crate::diff::path as diff_path;
use crate::strategy::conflict::{apply_policy, cycle_conflicts, detect_conflicts};
use crate::strategy::context::{StrategyContext, StrategyOutcome};
use crate::strategy::deps::order_by_dependencies;
use crate::strategy::{APPLY_BASE_PROGRESS, RollbackStrategy, apply_entries, estimate_for};
use async_trait::async_trait;
use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// What a selection criterion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Entity,
    Relationship,
    File,
    Namespace,
    Component,
}

impl SelectionKind {
    /// Root diff-path segment this kind is confined to, if any. Namespace
    /// and component selections match across all categories.
    fn path_prefix(&self) -> Option<&'static str> {
        match self {
            SelectionKind::Entity => Some("entities"),
            SelectionKind::Relationship => Some("relationships"),
            SelectionKind::File => Some("files"),
            SelectionKind::Namespace | SelectionKind::Component => None,
        }
    }
}

/// One filter over the diff. Patterns are regexes matched against the
/// display form of a path (unescaped segments joined with '.').
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub kind: SelectionKind,
    pub identifiers: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub priority: i32,
}

impl SelectionCriteria {
    pub fn new(kind: SelectionKind) -> Self {
        Self {
            kind,
            identifiers: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            priority: 0,
        }
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifiers.push(identifier.into());
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// # Errors
    /// `Validation` when an include/exclude pattern is not a valid regex.
    fn matches(&self, entry: &DiffEntry) -> Result<bool> {
        let segments = diff_path::display_segments(&entry.path);

        if let Some(prefix) = self.kind.path_prefix() {
            if segments.first().map(String::as_str) != Some(prefix) {
                return Ok(false);
            }
        }

        if !self.identifiers.is_empty() {
            let hit = match self.kind {
                // A namespace identifier is a prefix of the segment it names.
                SelectionKind::Namespace => segments.iter().any(|segment| {
                    self.identifiers.iter().any(|id| segment.starts_with(id.as_str()))
                }),
                SelectionKind::Component => segments
                    .iter()
                    .any(|segment| self.identifiers.contains(segment)),
                // Prefixed kinds name the identifier right under the prefix.
                _ => segments
                    .iter()
                    .skip(1)
                    .any(|segment| self.identifiers.contains(segment)),
            };
            if !hit {
                return Ok(false);
            }
        }

        let display = diff_path::display_path(&entry.path);
        if !self.include_patterns.is_empty() {
            let mut included = false;
            for pattern in &self.include_patterns {
                if compiled(pattern)?.is_match(&display) {
                    included = true;
                    break;
                }
            }
            if !included {
                return Ok(false);
            }
        }
        for pattern in &self.exclude_patterns {
            if compiled(pattern)?.is_match(&display) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Compiled selection patterns, cached across rollbacks.
fn compiled(pattern: &str) -> Result<Arc<Regex>> {
    static CACHE: OnceLock<Mutex<LruCache<String, Arc<Regex>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(128).unwrap_or(NonZeroUsize::MIN),
        ))
    });

    let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(regex) = guard.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Arc::new(Regex::new(pattern).map_err(|e| {
        RollbackError::Validation(format!("invalid selection pattern '{pattern}': {e}"))
    })?);
    guard.put(pattern.to_string(), regex.clone());
    Ok(regex)
}

pub struct PartialStrategy;

impl PartialStrategy {
    /// Evaluate criteria highest-priority-first, de-duplicating by path:
    /// the first (highest-priority) selection of a path wins.
    fn select(
        criteria: &[SelectionCriteria],
        changes: &[DiffEntry],
    ) -> Result<Vec<DiffEntry>> {
        let mut ranked: Vec<&SelectionCriteria> = criteria.iter().collect();
        ranked.sort_by_key(|c| std::cmp::Reverse(c.priority));

        let mut seen: HashSet<&str> = HashSet::new();
        let mut selected = Vec::new();
        for criterion in ranked {
            for entry in changes {
                if seen.contains(entry.path.as_str()) {
                    continue;
                }
                if criterion.matches(entry)? {
                    seen.insert(entry.path.as_str());
                    selected.push(entry.clone());
                }
            }
        }
        Ok(selected)
    }
}

#[async_trait]
impl RollbackStrategy for PartialStrategy {
    fn name(&self) -> &'static str {
        "partial"
    }

    async fn validate(&self, ctx: &StrategyContext) -> Result<bool> {
        if ctx.options.selections.is_empty() {
            ctx.log("partial rollback requires at least one selection criterion");
            return Ok(false);
        }
        for criterion in &ctx.options.selections {
            for pattern in criterion
                .include_patterns
                .iter()
                .chain(criterion.exclude_patterns.iter())
            {
                if let Err(e) = compiled(pattern) {
                    ctx.log(e.to_string());
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn estimate_duration(&self, ctx: &StrategyContext) -> std::time::Duration {
        // Upper bound: selection can only shrink the set.
        estimate_for(ctx.diff.change_count)
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<StrategyOutcome> {
        if ctx.options.selections.is_empty() {
            return Err(RollbackError::Validation(
                "partial rollback requires at least one selection criterion".to_string(),
            ));
        }

        ctx.progress(5);
        let selected = Self::select(&ctx.options.selections, &ctx.diff.changes)?;
        ctx.log(format!(
            "selected {} of {} change(s)",
            selected.len(),
            ctx.diff.change_count
        ));
        ctx.progress(15);

        let dependencies = ctx.options.dependencies.as_ref();
        let (ordered, cycles) = match dependencies {
            Some(map) => {
                let order = order_by_dependencies(selected, map);
                (order.entries, order.cycles)
            }
            None => (selected, Vec::new()),
        };
        ctx.progress(25);

        let mut conflicts = detect_conflicts(&ordered, dependencies);
        conflicts.extend(cycle_conflicts(&cycles));

        let decision =
            apply_policy(ordered, conflicts, &ctx.options.conflict_policy, ctx).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DiffOp;
    use serde_json::json;

    fn entry(path: &str) -> DiffEntry {
        DiffEntry {
            path: path.to_string(),
            op: DiffOp::Update,
            old_value: Some(json!("old")),
            new_value: Some(json!("new")),
            metadata: None,
        }
    }

    fn mixed_changes() -> Vec<DiffEntry> {
        vec![
            entry("entities.e1.name"),
            entry("entities.e2.name"),
            entry("entities.e3.name"),
            entry("relationships.r1.weight"),
            entry("relationships.r2.weight"),
            entry("files.main\\.ts"),
            entry("files.util\\.ts"),
            entry("files.legacy_mod\\.ts"),
            entry("files.api\\.ts"),
            entry("files.cli\\.ts"),
        ]
    }

    #[test]
    fn test_kind_selection_picks_exactly_the_files() {
        let criteria = vec![SelectionCriteria::new(SelectionKind::File)];
        let selected = PartialStrategy::select(&criteria, &mixed_changes()).unwrap();
        assert_eq!(selected.len(), 5);
        assert!(selected.iter().all(|e| e.path.starts_with("files.")));
    }

    #[test]
    fn test_exclude_pattern_removes_strict_subset() {
        let all_files = vec![SelectionCriteria::new(SelectionKind::File)];
        let baseline = PartialStrategy::select(&all_files, &mixed_changes()).unwrap();

        let filtered = vec![SelectionCriteria::new(SelectionKind::File).exclude("legacy")];
        let narrowed = PartialStrategy::select(&filtered, &mixed_changes()).unwrap();

        assert!(narrowed.len() < baseline.len());
        assert_eq!(narrowed.len(), 4);
        assert!(narrowed.iter().all(|e| !e.path.contains("legacy")));
    }

    #[test]
    fn test_identifier_selection() {
        let criteria =
            vec![SelectionCriteria::new(SelectionKind::File).identifier("main.ts")];
        let selected = PartialStrategy::select(&criteria, &mixed_changes()).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].path, "files.main\\.ts");
    }

    #[test]
    fn test_priority_orders_evaluation_and_dedupes_by_path() {
        let criteria = vec![
            SelectionCriteria::new(SelectionKind::File).priority(1),
            SelectionCriteria::new(SelectionKind::Entity).priority(10),
        ];
        let selected = PartialStrategy::select(&criteria, &mixed_changes()).unwrap();
        // Entity criterion ran first; each path appears once.
        assert!(selected[0].path.starts_with("entities."));
        let unique: HashSet<&str> = selected.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(unique.len(), selected.len());
    }

    #[test]
    fn test_namespace_matches_prefix() {
        let changes = vec![
            entry("entities.auth/login.name"),
            entry("entities.billing/invoice.name"),
        ];
        let criteria =
            vec![SelectionCriteria::new(SelectionKind::Namespace).identifier("auth/")];
        let selected = PartialStrategy::select(&criteria, &changes).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected[0].path.contains("auth/login"));
    }

    #[test]
    fn test_invalid_pattern_is_a_validation_error() {
        let criteria = vec![SelectionCriteria::new(SelectionKind::File).include("([unclosed")];
        let result = PartialStrategy::select(&criteria, &mixed_changes());
        assert!(matches!(result, Err(RollbackError::Validation(_))));
    }
}
