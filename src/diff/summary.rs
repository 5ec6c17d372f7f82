use crate::core::{DiffOp, RollbackDiff};
use serde::{Deserialize, Serialize};

/// Coarse complexity bucket for a diff, by change count.
///
/// Thresholds are monotone: fewer than 10 changes is `Low`, fewer than 50 is
/// `Medium`, anything else is `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffComplexity {
    Low,
    Medium,
    High,
}

const MEDIUM_THRESHOLD: usize = 10;
const HIGH_THRESHOLD: usize = 50;

impl DiffComplexity {
    pub fn for_change_count(count: usize) -> Self {
        if count < MEDIUM_THRESHOLD {
            DiffComplexity::Low
        } else if count < HIGH_THRESHOLD {
            DiffComplexity::Medium
        } else {
            DiffComplexity::High
        }
    }
}

/// Per-operation tallies, affected paths and a complexity bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_changes: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub moves: usize,
    pub affected_paths: Vec<String>,
    pub complexity: DiffComplexity,
}

/// Tally a diff by operation and bucket its complexity.
pub fn summarize_diff(diff: &RollbackDiff) -> DiffSummary {
    let mut summary = DiffSummary {
        total_changes: diff.change_count,
        creates: 0,
        updates: 0,
        deletes: 0,
        moves: 0,
        affected_paths: Vec::with_capacity(diff.changes.len()),
        complexity: DiffComplexity::for_change_count(diff.change_count),
    };
    for entry in &diff.changes {
        match entry.op {
            DiffOp::Create => summary.creates += 1,
            DiffOp::Update => summary.updates += 1,
            DiffOp::Delete => summary.deletes += 1,
            DiffOp::Move => summary.moves += 1,
        }
        summary.affected_paths.push(entry.path.clone());
    }
    summary
}
