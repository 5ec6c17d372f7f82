// ============================================================================
// Dependency Ordering
// ============================================================================
//
// One ordering algorithm shared by every strategy: a post-order walk over
// the caller-supplied dependency map, so a change's dependencies are applied
// before the change itself. True cycles are detected with a visited-path
// stack and reported rather than silently tolerated; the members of a cycle
// still apply, in their original relative order.
//
// ============================================================================

use crate::core::DiffEntry;
use std::collections::{BTreeMap, HashMap};

/// Path -> paths that must be applied before it.
pub type DependencyMap = HashMap<String, Vec<String>>;

/// Entries reordered by dependencies plus any cycles found along the way.
#[derive(Debug, Clone, Default)]
pub struct DependencyOrder {
    pub entries: Vec<DiffEntry>,
    /// Each cycle as its chain of paths; the last element closes the loop.
    pub cycles: Vec<Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InStack,
    Done,
}

/// Reorder `entries` so dependencies come first. Dependencies naming paths
/// outside the entry set are skipped; duplicate paths keep their original
/// relative order. Deterministic for identical inputs.
pub fn order_by_dependencies(
    entries: Vec<DiffEntry>,
    dependencies: &DependencyMap,
) -> DependencyOrder {
    if dependencies.is_empty() {
        return DependencyOrder {
            entries,
            cycles: Vec::new(),
        };
    }

    let mut by_path: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        by_path.entry(entry.path.clone()).or_default().push(index);
    }

    let mut walk = Walk {
        dependencies,
        by_path: &by_path,
        state: HashMap::new(),
        stack: Vec::new(),
        ordered: Vec::new(),
        cycles: Vec::new(),
    };

    // Roots are visited in listed order so the result is stable.
    for entry in &entries {
        walk.visit(&entry.path);
    }

    let Walk { ordered, cycles, .. } = walk;

    let mut remaining: Vec<Option<DiffEntry>> = entries.into_iter().map(Some).collect();
    let mut by_path = by_path;
    let mut result = Vec::with_capacity(remaining.len());
    for path in ordered {
        if let Some(indices) = by_path.remove(&path) {
            for index in indices {
                if let Some(entry) = remaining[index].take() {
                    result.push(entry);
                }
            }
        }
    }

    DependencyOrder {
        entries: result,
        cycles,
    }
}

struct Walk<'a> {
    dependencies: &'a DependencyMap,
    by_path: &'a BTreeMap<String, Vec<usize>>,
    state: HashMap<String, Visit>,
    stack: Vec<String>,
    ordered: Vec<String>,
    cycles: Vec<Vec<String>>,
}

impl Walk<'_> {
    fn visit(&mut self, path: &str) {
        match self.state.get(path) {
            Some(Visit::Done) => return,
            Some(Visit::InStack) => {
                // True cycle: capture the loop from its first occurrence on
                // the stack back to here.
                let start = self.stack.iter().position(|p| p == path).unwrap_or(0);
                let mut chain: Vec<String> = self.stack[start..].to_vec();
                chain.push(path.to_string());
                self.cycles.push(chain);
                return;
            }
            None => {}
        }

        self.state.insert(path.to_string(), Visit::InStack);
        self.stack.push(path.to_string());

        let dependencies = self.dependencies;
        let by_path = self.by_path;
        if let Some(required) = dependencies.get(path) {
            for dependency in required {
                if by_path.contains_key(dependency) {
                    self.visit(dependency);
                }
            }
        }

        self.stack.pop();
        self.state.insert(path.to_string(), Visit::Done);
        self.ordered.push(path.to_string());
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
            old_value: Some(json!(0)),
            new_value: Some(json!(1)),
            metadata: None,
        }
    }

    fn paths(order: &DependencyOrder) -> Vec<&str> {
        order.entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_dependencies_apply_first() {
        let entries = vec![entry("a"), entry("b"), entry("c")];
        let mut deps = DependencyMap::new();
        deps.insert("a".into(), vec!["b".into()]);
        deps.insert("b".into(), vec!["c".into()]);

        let order = order_by_dependencies(entries, &deps);
        assert_eq!(paths(&order), vec!["c", "b", "a"]);
        assert!(order.cycles.is_empty());
    }

    #[test]
    fn test_missing_dependency_target_is_skipped() {
        let entries = vec![entry("a")];
        let mut deps = DependencyMap::new();
        deps.insert("a".into(), vec!["not-selected".into()]);

        let order = order_by_dependencies(entries, &deps);
        assert_eq!(paths(&order), vec!["a"]);
    }

    #[test]
    fn test_cycle_is_reported_not_dropped() {
        let entries = vec![entry("a"), entry("b")];
        let mut deps = DependencyMap::new();
        deps.insert("a".into(), vec!["b".into()]);
        deps.insert("b".into(), vec!["a".into()]);

        let order = order_by_dependencies(entries, &deps);
        assert_eq!(order.entries.len(), 2);
        assert_eq!(order.cycles.len(), 1);
        assert!(order.cycles[0].contains(&"a".to_string()));
        assert!(order.cycles[0].contains(&"b".to_string()));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let entries = vec![entry("a")];
        let mut deps = DependencyMap::new();
        deps.insert("a".into(), vec!["a".into()]);

        let order = order_by_dependencies(entries, &deps);
        assert_eq!(paths(&order), vec!["a"]);
        assert_eq!(order.cycles, vec![vec!["a".to_string(), "a".to_string()]]);
    }

    #[test]
    fn test_no_dependencies_preserves_order() {
        let entries = vec![entry("z"), entry("a"), entry("m")];
        let order = order_by_dependencies(entries, &DependencyMap::new());
        assert_eq!(paths(&order), vec!["z", "a", "m"]);
    }
}
