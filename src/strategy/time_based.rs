// ============================================================================
// Time-based Rollback Strategy
// ============================================================================
//
// Filters the diff by a time window. A change's timestamp is resolved from
// its metadata, an ISO-8601 fragment embedded in its path, or timestamp
// fields on its old/new values; a change with no resolvable timestamp is
// included by default. Selected changes apply newest-first so an older
// write can never resurrect state a newer change already rolled back.
//
// ============================================================================

use crate::core::{
    ConflictKind, DiffEntry, Result, RollbackConflict, RollbackError,
};
use crate::diff::path as diff_path;
use crate::strategy::conflict::apply_policy;
use crate::strategy::context::{StrategyContext, StrategyOutcome};
use crate::strategy::{APPLY_BASE_PROGRESS, RollbackStrategy, apply_entries, estimate_for};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Two changes to one path closer together than this are a temporal
/// conflict.
const TEMPORAL_CONFLICT_WINDOW_SECS: i64 = 60;

/// Time window selecting which changes to roll back.
#[derive(Debug, Clone, Default)]
pub struct TimeFilter {
    /// Roll back changes made after this instant.
    pub rollback_to_timestamp: Option<DateTime<Utc>>,
    /// Only include changes made after this instant.
    pub include_changes_after: Option<DateTime<Utc>>,
    /// Drop changes made after this instant.
    pub exclude_changes_after: Option<DateTime<Utc>>,
    /// Drop changes older than this.
    pub max_change_age: Option<Duration>,
}

impl TimeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rollback_to(mut self, instant: DateTime<Utc>) -> Self {
        self.rollback_to_timestamp = Some(instant);
        self
    }

    pub fn include_after(mut self, instant: DateTime<Utc>) -> Self {
        self.include_changes_after = Some(instant);
        self
    }

    pub fn exclude_after(mut self, instant: DateTime<Utc>) -> Self {
        self.exclude_changes_after = Some(instant);
        self
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_change_age = Some(age);
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.rollback_to_timestamp.is_none()
            && self.include_changes_after.is_none()
            && self.exclude_changes_after.is_none()
            && self.max_change_age.is_none()
    }

    fn selects(&self, timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        // Unknown timestamps are included by default.
        let Some(ts) = timestamp else { return true };

        if let Some(target) = self.rollback_to_timestamp {
            if ts <= target {
                return false;
            }
        }
        if let Some(after) = self.include_changes_after {
            if ts <= after {
                return false;
            }
        }
        if let Some(cutoff) = self.exclude_changes_after {
            if ts > cutoff {
                return false;
            }
        }
        if let Some(max_age) = self.max_change_age {
            if now - ts > max_age {
                return false;
            }
        }
        true
    }
}

fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp_str(text),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

const TIMESTAMP_FIELDS: [&str; 5] = [
    "timestamp",
    "updated_at",
    "updatedAt",
    "modified_at",
    "created_at",
];

fn value_field_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let object = value.as_object()?;
    TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(parse_timestamp_value))
}

fn iso_fragment(path: &str) -> Option<DateTime<Utc>> {
    static ISO_RE: OnceLock<Regex> = OnceLock::new();
    let regex = ISO_RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?")
            .expect("literal ISO-8601 pattern")
    });
    regex
        .find(path)
        .and_then(|hit| parse_timestamp_str(hit.as_str()))
}

/// Resolve when a change happened: metadata first, then an ISO-8601
/// fragment in the path, then timestamp fields on the old/new values.
pub fn resolve_change_timestamp(entry: &DiffEntry) -> Option<DateTime<Utc>> {
    if let Some(metadata) = entry.metadata.as_ref().and_then(Value::as_object) {
        if let Some(ts) = metadata.get("timestamp").and_then(parse_timestamp_value) {
            return Some(ts);
        }
    }
    if let Some(ts) = iso_fragment(&diff_path::display_path(&entry.path)) {
        return Some(ts);
    }
    entry
        .old_value
        .as_ref()
        .and_then(value_field_timestamp)
        .or_else(|| entry.new_value.as_ref().and_then(value_field_timestamp))
}

fn temporal_conflicts(
    selected: &[(DiffEntry, Option<DateTime<Utc>>)],
) -> Vec<RollbackConflict> {
    let mut by_path: BTreeMap<&str, Vec<(&DiffEntry, DateTime<Utc>)>> = BTreeMap::new();
    for (entry, timestamp) in selected {
        if let Some(ts) = timestamp {
            by_path.entry(entry.path.as_str()).or_default().push((entry, *ts));
        }
    }

    let mut conflicts = Vec::new();
    for (path, mut hits) in by_path {
        if hits.len() < 2 {
            continue;
        }
        hits.sort_by_key(|(_, ts)| *ts);
        for pair in hits.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            if second.1 - first.1 <= Duration::seconds(TEMPORAL_CONFLICT_WINDOW_SECS) {
                conflicts.push(
                    RollbackConflict::new(path, ConflictKind::ValueMismatch)
                        .with_values(first.0.old_value.clone(), second.0.new_value.clone())
                        .with_context("reason", "temporal_proximity")
                        .with_context("first", first.1.to_rfc3339())
                        .with_context("second", second.1.to_rfc3339()),
                );
                break;
            }
        }
    }
    conflicts
}

pub struct TimeBasedStrategy;

#[async_trait]
impl RollbackStrategy for TimeBasedStrategy {
    fn name(&self) -> &'static str {
        "time_based"
    }

    async fn validate(&self, ctx: &StrategyContext) -> Result<bool> {
        match &ctx.options.time_filter {
            Some(filter) if !filter.is_unconstrained() => Ok(true),
            Some(_) => {
                ctx.log("time filter has no constraints");
                Ok(false)
            }
            None => {
                ctx.log("time-based rollback requires a time filter");
                Ok(false)
            }
        }
    }

    fn estimate_duration(&self, ctx: &StrategyContext) -> std::time::Duration {
        estimate_for(ctx.diff.change_count)
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<StrategyOutcome> {
        let filter = ctx
            .options
            .time_filter
            .clone()
            .ok_or_else(|| {
                RollbackError::Validation(
                    "time-based rollback requires a time filter".to_string(),
                )
            })?;
        if filter.is_unconstrained() {
            return Err(RollbackError::Validation(
                "time filter has no constraints".to_string(),
            ));
        }

        ctx.progress(10);
        let now = Utc::now();
        let mut selected: Vec<(DiffEntry, Option<DateTime<Utc>>)> = ctx
            .diff
            .changes
            .iter()
            .map(|entry| (entry.clone(), resolve_change_timestamp(entry)))
            .filter(|(_, timestamp)| filter.selects(*timestamp, now))
            .collect();
        ctx.log(format!(
            "time window selected {} of {} change(s)",
            selected.len(),
            ctx.diff.change_count
        ));
        ctx.progress(20);

        // Newest first; changes with unknown timestamps apply last.
        selected.sort_by(|a, b| b.1.cmp(&a.1));

        let conflicts = temporal_conflicts(&selected);
        ctx.progress(30);

        let entries: Vec<DiffEntry> = selected.into_iter().map(|(entry, _)| entry).collect();
        let decision =
            apply_policy(entries, conflicts, &ctx.options.conflict_policy, ctx).await?;
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
