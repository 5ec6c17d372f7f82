/// Diff engine tests
///
/// Structural diffing, patch application and the contracts the rest of the
/// subsystem leans on: roundtrip fidelity, idempotence and determinism.
/// Run with: cargo test --test diff_engine_tests

use graphrollback::{DiffComplexity, DiffEngine, DiffOp, DiffOptions, RollbackDiff, summarize_diff};
use serde_json::json;

fn engine() -> DiffEngine {
    DiffEngine::new()
}

#[test]
fn test_apply_diff_reconstructs_target() {
    let before = json!({
        "users": {
            "u1": {"name": "Ada", "roles": ["admin"]},
            "u2": {"name": "Grace", "roles": ["dev", "ops"]},
        },
        "version": 3,
    });
    let after = json!({
        "users": {
            "u1": {"name": "Ada", "roles": ["admin", "owner"]},
            "u3": {"name": "Edsger", "roles": []},
        },
        "version": 4,
        "flags": {"beta": true},
    });

    let opts = DiffOptions::default();
    let diff = RollbackDiff::new("before", "after", engine().diff_objects(&before, &after, &opts));
    let rebuilt = engine().apply_diff(&before, &diff).unwrap();
    assert!(engine().deep_equals(&rebuilt, &after, &opts));
}

#[test]
fn test_second_application_is_empty() {
    let before = json!({"a": 1, "b": {"c": [1, 2]}});
    let after = json!({"a": 2, "b": {"c": [2, 1]}, "d": null});

    let opts = DiffOptions::default();
    let diff = RollbackDiff::new("before", "after", engine().diff_objects(&before, &after, &opts));
    let rebuilt = engine().apply_diff(&before, &diff).unwrap();

    // Re-diffing the result against the target finds nothing left to do.
    assert!(engine().diff_objects(&rebuilt, &after, &opts).is_empty());
}

#[test]
fn test_diff_objects_classifies_operations() {
    let before = json!({"stays": 1, "updated": "x", "removed": true});
    let after = json!({"stays": 1, "updated": "y", "added": [1]});

    let entries = engine().diff_objects(&before, &after, &DiffOptions::default());
    let find = |path: &str| entries.iter().find(|e| e.path == path).unwrap();

    assert_eq!(find("added").op, DiffOp::Create);
    assert_eq!(find("updated").op, DiffOp::Update);
    assert_eq!(find("removed").op, DiffOp::Delete);
    assert_eq!(entries.len(), 3);
}

#[test]
fn test_array_lcs_minimizes_edits() {
    let before: Vec<_> = (1..=6).map(|n| json!(n)).collect();
    // Remove 2, keep the rest aligned, append 7.
    let after = vec![json!(1), json!(3), json!(4), json!(5), json!(6), json!(7)];

    let entries = engine().diff_arrays(&before, &after, &DiffOptions::default());
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.op == DiffOp::Delete));
    assert!(entries.iter().any(|e| e.op == DiffOp::Create));
}

#[test]
fn test_array_reorder_becomes_moves() {
    let before = vec![json!({"id": "a"}), json!({"id": "b"}), json!({"id": "c"})];
    let after = vec![json!({"id": "c"}), json!({"id": "a"}), json!({"id": "b"})];

    let entries = engine().diff_arrays(&before, &after, &DiffOptions::default());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].op, DiffOp::Move);

    let diff = RollbackDiff::new("before", "after", entries);
    let rebuilt = engine().apply_diff(&json!(before), &diff).unwrap();
    assert_eq!(rebuilt, json!(after));
}

#[test]
fn test_ignored_properties_survive_apply() {
    let before = json!({"data": 1, "synced_at": "2026-01-01T00:00:00Z"});
    let after = json!({"data": 2, "synced_at": "2026-06-01T00:00:00Z"});

    let opts = DiffOptions::default().ignore("synced_at");
    let diff = RollbackDiff::new("before", "after", engine().diff_objects(&before, &after, &opts));
    assert_eq!(diff.change_count, 1);

    let rebuilt = engine().apply_diff(&before, &diff).unwrap();
    // The ignored property keeps its original value.
    assert_eq!(rebuilt["synced_at"], json!("2026-01-01T00:00:00Z"));
    assert_eq!(rebuilt["data"], json!(2));
}

#[test]
fn test_deterministic_entry_order_across_runs() {
    let before = json!({"z": 1, "a": {"nested": [5, 6, 7]}, "m": "x"});
    let after = json!({"z": 2, "a": {"nested": [7, 6]}, "k": true});

    let opts = DiffOptions::default();
    let baseline = engine().diff_objects(&before, &after, &opts);
    for _ in 0..10 {
        assert_eq!(engine().diff_objects(&before, &after, &opts), baseline);
    }
}

#[test]
fn test_summary_buckets_complexity() {
    let small = RollbackDiff::new(
        "a",
        "b",
        engine().diff_objects(&json!({"x": 1}), &json!({"x": 2}), &DiffOptions::default()),
    );
    assert_eq!(summarize_diff(&small).complexity, DiffComplexity::Low);

    let mut big_before = serde_json::Map::new();
    let mut big_after = serde_json::Map::new();
    for n in 0..60 {
        big_before.insert(format!("k{n}"), json!(n));
        big_after.insert(format!("k{n}"), json!(n + 1));
    }
    let big = RollbackDiff::new(
        "a",
        "b",
        engine().diff_objects(
            &serde_json::Value::Object(big_before),
            &serde_json::Value::Object(big_after),
            &DiffOptions::default(),
        ),
    );
    let summary = summarize_diff(&big);
    assert_eq!(summary.complexity, DiffComplexity::High);
    assert_eq!(summary.updates, 60);
    assert_eq!(summary.affected_paths.len(), 60);
}

#[test]
fn test_change_count_matches_changes() {
    let diff = RollbackDiff::new(
        "a",
        "b",
        engine().diff_objects(
            &json!({"p": 1, "q": 2}),
            &json!({"p": 9, "r": 3}),
            &DiffOptions::default(),
        ),
    );
    assert_eq!(diff.change_count, diff.changes.len());
    assert_eq!(diff.change_count, 3);
}
