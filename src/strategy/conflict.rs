// ============================================================================
// Conflict Detection & Resolution
// ============================================================================
//
// A conflict exists when the selected change set targets one path more than
// once, when an update's old/new values disagree on type, or when a change
// depends on a path absent from the selection. The policy then decides what
// survives: abort, skip, overwrite, merge via the caller's resolver, or
// surface-and-skip for ask-user.
//
// ============================================================================

use crate::core::{
    ConflictKind, ConflictPolicy, ConflictStrategy, DiffEntry, DiffOp, Result, RollbackConflict,
    RollbackError,
};
use crate::strategy::context::StrategyContext;
use crate::strategy::deps::DependencyMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scan a change set for conflicts. Detection is deterministic: paths are
/// examined in sorted order.
pub fn detect_conflicts(
    entries: &[DiffEntry],
    dependencies: Option<&DependencyMap>,
) -> Vec<RollbackConflict> {
    let mut conflicts = Vec::new();

    // Duplicate targets: the same path changed more than once in one set.
    let mut by_path: BTreeMap<&str, Vec<&DiffEntry>> = BTreeMap::new();
    for entry in entries {
        by_path.entry(entry.path.as_str()).or_default().push(entry);
    }
    for (path, hits) in &by_path {
        if hits.len() > 1 {
            conflicts.push(
                RollbackConflict::new(*path, ConflictKind::ValueMismatch)
                    .with_values(hits[0].old_value.clone(), hits[hits.len() - 1].new_value.clone())
                    .with_context("reason", "duplicate_changes")
                    .with_context("count", hits.len().to_string()),
            );
        }
    }

    // Type disagreements on updates.
    for entry in entries {
        if entry.op != DiffOp::Update {
            continue;
        }
        if let (Some(old), Some(new)) = (&entry.old_value, &entry.new_value) {
            let (old_type, new_type) = (value_type(old), value_type(new));
            if old_type != new_type {
                conflicts.push(
                    RollbackConflict::new(&entry.path, ConflictKind::TypeMismatch)
                        .with_values(Some(old.clone()), Some(new.clone()))
                        .with_context("current_type", old_type)
                        .with_context("rollback_type", new_type),
                );
            }
        } else if entry.old_value.is_none() {
            // An update expects an existing target.
            conflicts.push(
                RollbackConflict::new(&entry.path, ConflictKind::MissingTarget)
                    .with_values(None, entry.new_value.clone())
                    .with_context("reason", "update_without_current_value"),
            );
        }
    }

    // Dependencies naming paths outside the selected set.
    if let Some(dependencies) = dependencies {
        let selected: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        for entry in entries {
            let Some(required) = dependencies.get(&entry.path) else {
                continue;
            };
            for dependency in required {
                if dependency != &entry.path && !selected.contains(dependency.as_str()) {
                    conflicts.push(
                        RollbackConflict::new(&entry.path, ConflictKind::DependencyConflict)
                            .with_context("missing_dependency", dependency.clone()),
                    );
                }
            }
        }
    }

    conflicts
}

/// Build one conflict per detected dependency cycle.
pub fn cycle_conflicts(cycles: &[Vec<String>]) -> Vec<RollbackConflict> {
    cycles
        .iter()
        .map(|cycle| {
            RollbackConflict::new(
                cycle.first().cloned().unwrap_or_default(),
                ConflictKind::DependencyConflict,
            )
            .with_context("reason", "dependency_cycle")
            .with_context("cycle", cycle.join(" -> "))
        })
        .collect()
}

/// Entries surviving a conflict policy, the entries it dropped, and the
/// conflicts that were tolerated.
#[derive(Debug, Clone, Default)]
pub struct PolicyDecision {
    pub entries: Vec<DiffEntry>,
    pub skipped: Vec<DiffEntry>,
    pub conflicts: Vec<RollbackConflict>,
}

/// Apply the conflict policy to a change set, surfacing every conflict
/// through the context first.
///
/// # Errors
/// `Conflict` under `Abort` (carrying the full list), or when the caller's
/// resolver answers `Abort` for one conflict. `Validation` when `Merge` is
/// requested without a resolver.
pub async fn apply_policy(
    entries: Vec<DiffEntry>,
    conflicts: Vec<RollbackConflict>,
    policy: &ConflictPolicy,
    ctx: &StrategyContext,
) -> Result<PolicyDecision> {
    if conflicts.is_empty() {
        return Ok(PolicyDecision {
            entries,
            skipped: Vec::new(),
            conflicts,
        });
    }

    for conflict in &conflicts {
        ctx.conflict(conflict.clone());
    }

    match policy.strategy {
        ConflictStrategy::Abort => Err(RollbackError::Conflict(conflicts)),
        ConflictStrategy::Overwrite => Ok(PolicyDecision {
            entries,
            skipped: Vec::new(),
            conflicts,
        }),
        ConflictStrategy::Skip | ConflictStrategy::AskUser => {
            let conflicting: HashSet<&str> =
                conflicts.iter().map(|c| c.path.as_str()).collect();
            let (skipped, survivors): (Vec<DiffEntry>, Vec<DiffEntry>) = entries
                .into_iter()
                .partition(|entry| conflicting.contains(entry.path.as_str()));
            Ok(PolicyDecision {
                entries: survivors,
                skipped,
                conflicts,
            })
        }
        ConflictStrategy::Merge => {
            let resolver = policy.resolver.as_ref().ok_or_else(|| {
                RollbackError::Validation(
                    "merge conflict policy requires a resolver".to_string(),
                )
            })?;

            let mut skip_paths: HashSet<String> = HashSet::new();
            for conflict in &conflicts {
                match resolver.resolve(conflict).await {
                    ConflictStrategy::Abort => {
                        return Err(RollbackError::Conflict(vec![conflict.clone()]));
                    }
                    ConflictStrategy::Overwrite => {}
                    // A resolver answering Merge/AskUser again is treated as
                    // Skip to guarantee termination.
                    ConflictStrategy::Skip
                    | ConflictStrategy::Merge
                    | ConflictStrategy::AskUser => {
                        skip_paths.insert(conflict.path.clone());
                    }
                }
            }
            let (skipped, survivors): (Vec<DiffEntry>, Vec<DiffEntry>) = entries
                .into_iter()
                .partition(|entry| skip_paths.contains(&entry.path));
            Ok(PolicyDecision {
                entries: survivors,
                skipped,
                conflicts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(path: &str, op: DiffOp, old: Option<Value>, new: Option<Value>) -> DiffEntry {
        DiffEntry {
            path: path.to_string(),
            op,
            old_value: old,
            new_value: new,
            metadata: None,
        }
    }

    #[test]
    fn test_duplicate_paths_conflict() {
        let entries = vec![
            entry("files.a", DiffOp::Update, Some(json!(1)), Some(json!(2))),
            entry("files.a", DiffOp::Delete, Some(json!(2)), None),
            entry("files.b", DiffOp::Update, Some(json!(1)), Some(json!(3))),
        ];

        let conflicts = detect_conflicts(&entries, None);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "files.a");
        assert_eq!(conflicts[0].kind, ConflictKind::ValueMismatch);
        assert_eq!(
            conflicts[0].context.get("reason").map(String::as_str),
            Some("duplicate_changes")
        );
    }

    #[test]
    fn test_type_mismatch_conflict() {
        let entries = vec![entry(
            "entities.e1.count",
            DiffOp::Update,
            Some(json!(3)),
            Some(json!("three")),
        )];

        let conflicts = detect_conflicts(&entries, None);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::TypeMismatch);
    }

    #[test]
    fn test_missing_dependency_conflict() {
        let entries = vec![entry(
            "entities.child",
            DiffOp::Update,
            Some(json!(1)),
            Some(json!(2)),
        )];
        let mut deps = DependencyMap::new();
        deps.insert("entities.child".into(), vec!["entities.parent".into()]);

        let conflicts = detect_conflicts(&entries, Some(&deps));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::DependencyConflict);
        assert_eq!(
            conflicts[0].context.get("missing_dependency").map(String::as_str),
            Some("entities.parent")
        );
    }

    #[test]
    fn test_clean_set_has_no_conflicts() {
        let entries = vec![
            entry("a", DiffOp::Update, Some(json!(1)), Some(json!(2))),
            entry("b", DiffOp::Create, None, Some(json!(5))),
            entry("c", DiffOp::Delete, Some(json!(9)), None),
        ];
        assert!(detect_conflicts(&entries, None).is_empty());
    }

    #[test]
    fn test_cycle_conflicts_name_the_chain() {
        let cycles = vec![vec!["a".to_string(), "b".to_string(), "a".to_string()]];
        let conflicts = cycle_conflicts(&cycles);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].context.get("cycle").map(String::as_str),
            Some("a -> b -> a")
        );
    }
}
