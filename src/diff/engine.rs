// ============================================================================
// Diff Engine
// ============================================================================
//
// Computes structural diffs between JSON documents and applies them back.
// Determinism is a hard contract: identical inputs must always produce
// identical diff entry order. Object keys are walked in sorted order and the
// LCS backtrack breaks ties the same way on every run.
//
// ============================================================================

use crate::core::{DiffEntry, DiffOp, Result, RollbackDiff, RollbackError, Snapshot};
use crate::diff::path::{self, PathSegment};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-property equality override. Keyed by property name; consulted instead
/// of structural recursion wherever that property appears.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Options steering a diff walk.
#[derive(Clone)]
pub struct DiffOptions {
    /// Recursion limit for nested objects. Levels past the limit compare
    /// with `deep_equals` and surface as a single update.
    pub max_depth: usize,
    /// Property names skipped entirely, at every level.
    pub ignore_properties: HashSet<String>,
    pub custom_comparators: HashMap<String, Comparator>,
}

impl DiffOptions {
    pub fn ignore(mut self, property: impl Into<String>) -> Self {
        self.ignore_properties.insert(property.into());
        self
    }

    pub fn comparator(mut self, property: impl Into<String>, comparator: Comparator) -> Self {
        self.custom_comparators.insert(property.into(), comparator);
        self
    }
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            max_depth: 32,
            ignore_properties: HashSet::new(),
            custom_comparators: HashMap::new(),
        }
    }
}

/// Stateless diff/patch engine over `serde_json::Value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Diff two documents rooted at objects. Entries transform `a` into `b`.
    pub fn diff_objects(&self, a: &Value, b: &Value, opts: &DiffOptions) -> Vec<DiffEntry> {
        let mut entries = Vec::new();
        match (a.as_object(), b.as_object()) {
            (Some(ao), Some(bo)) => self.walk_objects("", ao, bo, 0, opts, &mut entries),
            _ => {
                if !self.deep_equals(a, b, opts) {
                    entries.push(update_entry(String::new(), a.clone(), b.clone()));
                }
            }
        }
        entries
    }

    fn walk_objects(
        &self,
        prefix: &str,
        a: &Map<String, Value>,
        b: &Map<String, Value>,
        depth: usize,
        opts: &DiffOptions,
        out: &mut Vec<DiffEntry>,
    ) {
        let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            if opts.ignore_properties.contains(key.as_str()) {
                continue;
            }
            let entry_path = path::join_key(prefix, key);
            match (a.get(key), b.get(key)) {
                (None, Some(new)) => out.push(DiffEntry {
                    path: entry_path,
                    op: DiffOp::Create,
                    old_value: None,
                    new_value: Some(new.clone()),
                    metadata: None,
                }),
                (Some(old), None) => out.push(DiffEntry {
                    path: entry_path,
                    op: DiffOp::Delete,
                    old_value: Some(old.clone()),
                    new_value: None,
                    metadata: None,
                }),
                (Some(old), Some(new)) => {
                    if let Some(comparator) = opts.custom_comparators.get(key.as_str()) {
                        if !comparator(old, new) {
                            out.push(update_entry(entry_path, old.clone(), new.clone()));
                        }
                        continue;
                    }
                    match (old.as_object(), new.as_object()) {
                        (Some(old_obj), Some(new_obj)) if depth + 1 < opts.max_depth => {
                            self.walk_objects(&entry_path, old_obj, new_obj, depth + 1, opts, out);
                        }
                        _ => {
                            if !self.deep_equals(old, new, opts) {
                                out.push(update_entry(entry_path, old.clone(), new.clone()));
                            }
                        }
                    }
                }
                (None, None) => unreachable!("key came from the union of both maps"),
            }
        }
    }

    /// Diff two arrays by LCS alignment, minimizing edits.
    ///
    /// Aligned-but-differing positions become updates; unmatched elements
    /// become creates/deletes; an unmatched delete whose value deep-equals
    /// an unmatched create becomes a move carrying the prior and new index.
    pub fn diff_arrays(&self, a: &[Value], b: &[Value], opts: &DiffOptions) -> Vec<DiffEntry> {
        self.diff_arrays_at("", a, b, opts)
    }

    fn diff_arrays_at(
        &self,
        prefix: &str,
        a: &[Value],
        b: &[Value],
        opts: &DiffOptions,
    ) -> Vec<DiffEntry> {
        let matches = self.lcs_pairs(a, b, opts);

        let mut updates = Vec::new();
        let mut deletes: Vec<(usize, Value)> = Vec::new();
        let mut creates: Vec<(usize, Value)> = Vec::new();

        let sentinel = (a.len(), b.len());
        let bounds = matches.iter().copied().chain(std::iter::once(sentinel));
        let (mut ai, mut bj) = (0usize, 0usize);
        for (mi, mj) in bounds {
            let gap_a = mi - ai;
            let gap_b = mj - bj;
            let paired = gap_a.min(gap_b);
            for k in 0..paired {
                updates.push(update_entry(
                    path::join_index(prefix, ai + k),
                    a[ai + k].clone(),
                    b[bj + k].clone(),
                ));
            }
            for k in paired..gap_a {
                deletes.push((ai + k, a[ai + k].clone()));
            }
            for k in paired..gap_b {
                creates.push((bj + k, b[bj + k].clone()));
            }
            if (mi, mj) != sentinel {
                ai = mi + 1;
                bj = mj + 1;
            }
        }

        // Pair leftover deletes with equal-valued leftover creates: the
        // element survived, only its index shifted.
        let mut moves = Vec::new();
        let mut plain_creates = Vec::new();
        for (j, value) in creates {
            match deletes
                .iter()
                .position(|(_, deleted)| self.deep_equals(deleted, &value, opts))
            {
                Some(slot) => {
                    let (i, _) = deletes.remove(slot);
                    moves.push(DiffEntry {
                        path: path::join_index(prefix, j),
                        op: DiffOp::Move,
                        old_value: Some(json!(i)),
                        new_value: Some(json!(j)),
                        metadata: None,
                    });
                }
                None => plain_creates.push((j, value)),
            }
        }

        // Emission order keeps in-order application sound: in-place updates
        // first, then removals from the back, then moves and inserts from
        // the front.
        let mut entries = updates;
        deletes.sort_by(|left, right| right.0.cmp(&left.0));
        for (i, value) in deletes {
            entries.push(DiffEntry {
                path: path::join_index(prefix, i),
                op: DiffOp::Delete,
                old_value: Some(value),
                new_value: None,
                metadata: None,
            });
        }
        entries.extend(moves);
        for (j, value) in plain_creates {
            entries.push(DiffEntry {
                path: path::join_index(prefix, j),
                op: DiffOp::Create,
                old_value: None,
                new_value: Some(value),
                metadata: None,
            });
        }
        entries
    }

    /// Longest common subsequence match pairs, strictly increasing in both
    /// coordinates. Ties in the backtrack always prefer advancing `a`.
    fn lcs_pairs(&self, a: &[Value], b: &[Value], opts: &DiffOptions) -> Vec<(usize, usize)> {
        let n = a.len();
        let m = b.len();
        if n == 0 || m == 0 {
            return Vec::new();
        }

        let mut table = vec![vec![0usize; m + 1]; n + 1];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                table[i][j] = if self.deep_equals(&a[i], &b[j], opts) {
                    table[i + 1][j + 1] + 1
                } else {
                    table[i + 1][j].max(table[i][j + 1])
                };
            }
        }

        let mut pairs = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        while i < n && j < m {
            if self.deep_equals(&a[i], &b[j], opts) && table[i][j] == table[i + 1][j + 1] + 1 {
                pairs.push((i, j));
                i += 1;
                j += 1;
            } else if table[i + 1][j] >= table[i][j + 1] {
                i += 1;
            } else {
                j += 1;
            }
        }
        pairs
    }

    /// Diff two snapshots' payloads, dispatching on shape.
    pub fn diff_snapshots(
        &self,
        from: &Snapshot,
        to: &Snapshot,
        opts: &DiffOptions,
    ) -> RollbackDiff {
        let changes = self.diff_values(&from.data, &to.data, opts);
        RollbackDiff::new(from.id.to_string(), to.id.to_string(), changes)
    }

    /// Shape dispatch shared by snapshot diffing and composed diffs:
    /// arrays align by LCS, objects walk the key union, anything else is a
    /// single root update when unequal.
    pub fn diff_values(&self, from: &Value, to: &Value, opts: &DiffOptions) -> Vec<DiffEntry> {
        match (from, to) {
            (Value::Array(a), Value::Array(b)) => self.diff_arrays(a, b, opts),
            (Value::Object(_), Value::Object(_)) => self.diff_objects(from, to, opts),
            _ => {
                if self.deep_equals(from, to, opts) {
                    Vec::new()
                } else {
                    vec![update_entry(String::new(), from.clone(), to.clone())]
                }
            }
        }
    }

    /// Apply a diff to a document without mutating it.
    ///
    /// # Errors
    /// Returns `Validation` for malformed entries (a create without a new
    /// value, a move without numeric indices).
    pub fn apply_diff(&self, source: &Value, diff: &RollbackDiff) -> Result<Value> {
        let mut result = source.clone();
        for entry in &diff.changes {
            self.apply_entry(&mut result, entry)?;
        }
        Ok(result)
    }

    /// Apply a single entry in place.
    pub fn apply_entry(&self, target: &mut Value, entry: &DiffEntry) -> Result<()> {
        let segments = path::parse_path(&entry.path);
        match entry.op {
            DiffOp::Create | DiffOp::Update => {
                let value = entry.new_value.clone().ok_or_else(|| {
                    RollbackError::Validation(format!(
                        "{} entry at '{}' has no new value",
                        entry.op, entry.path
                    ))
                })?;
                path::set_at(target, &segments, value);
            }
            DiffOp::Delete => path::remove_at(target, &segments),
            DiffOp::Move => self.apply_move(target, entry, &segments)?,
        }
        Ok(())
    }

    fn apply_move(
        &self,
        target: &mut Value,
        entry: &DiffEntry,
        segments: &[PathSegment],
    ) -> Result<()> {
        let indices = entry
            .old_value
            .as_ref()
            .and_then(Value::as_u64)
            .zip(entry.new_value.as_ref().and_then(Value::as_u64));
        let Some((old_index, new_index)) = indices else {
            return Err(RollbackError::Validation(format!(
                "move entry at '{}' is missing its indices",
                entry.path
            )));
        };

        // The path addresses the element's new position; its parent is the
        // array being reordered.
        let parent = &segments[..segments.len().saturating_sub(1)];
        let Some(mut array) = path::get_at(target, parent).and_then(Value::as_array).cloned()
        else {
            return Ok(());
        };
        if array.is_empty() {
            return Ok(());
        }

        // Clamp: surrounding deletes may have shrunk the array since the
        // indices were recorded.
        let from = (old_index as usize).min(array.len() - 1);
        let element = array.remove(from);
        let to = (new_index as usize).min(array.len());
        array.insert(to, element);
        path::set_at(target, parent, Value::Array(array));
        Ok(())
    }

    /// Strict recursive equality honoring the ignore-list and custom
    /// comparators. Arrays compare positionally.
    pub fn deep_equals(&self, a: &Value, b: &Value, opts: &DiffOptions) -> bool {
        match (a, b) {
            (Value::Object(ao), Value::Object(bo)) => {
                let live = |map: &Map<String, Value>| {
                    map.keys()
                        .filter(|key| !opts.ignore_properties.contains(key.as_str()))
                        .count()
                };
                if live(ao) != live(bo) {
                    return false;
                }
                ao.iter()
                    .filter(|(key, _)| !opts.ignore_properties.contains(key.as_str()))
                    .all(|(key, old)| match bo.get(key) {
                        Some(new) => match opts.custom_comparators.get(key.as_str()) {
                            Some(comparator) => comparator(old, new),
                            None => self.deep_equals(old, new, opts),
                        },
                        None => false,
                    })
            }
            (Value::Array(xs), Value::Array(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys.iter())
                        .all(|(x, y)| self.deep_equals(x, y, opts))
            }
            _ => a == b,
        }
    }
}

fn update_entry(path: String, old: Value, new: Value) -> DiffEntry {
    DiffEntry {
        path,
        op: DiffOp::Update,
        old_value: Some(old),
        new_value: Some(new),
        metadata: None,
    }
}
