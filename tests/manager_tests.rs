/// Manager tests
///
/// End-to-end scenarios through the orchestrator: create a point, capture
/// snapshots, mutate the collaborators, roll back, observe events and
/// metrics.
/// Run with: cargo test --test manager_tests

mod common;

use common::{rig, rig_with_config};
use graphrollback::{
    ConflictPolicy, ConflictStrategy, CreatePointOptions, FileStore, KnowledgeGraph,
    OperationKind, OperationStatus, RollbackConfig, RollbackError, RollbackOptions,
    SelectionCriteria, SelectionKind, SessionStore,
};
use serde_json::json;

#[tokio::test]
async fn test_rollback_removes_entity_added_after_snapshot() {
    let rig = rig();

    let point = rig
        .manager
        .create_rollback_point("pre-migration", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();

    // The platform gains an entity after the snapshot.
    rig.graph
        .insert_entity(json!({"id": "e1", "label": "Orphan"}))
        .await;
    assert_eq!(rig.graph.entities().await.unwrap().len(), 1);

    let outcome = rig
        .manager
        .rollback(point.id, RollbackOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome.operation.status, OperationStatus::Completed);
    assert_eq!(outcome.operation.progress, 100);
    assert!(rig.graph.entities().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sequential_partial_rollbacks_touch_only_named_files() {
    let rig = rig();
    rig.files.write_file_contents("a.ts", "old a").await.unwrap();
    rig.files.write_file_contents("b.ts", "old b").await.unwrap();

    let point = rig
        .manager
        .create_rollback_point("pre-edit", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();

    rig.files.write_file_contents("a.ts", "new a").await.unwrap();
    rig.files.write_file_contents("b.ts", "new b").await.unwrap();

    // First rollback: only a.ts.
    let outcome = rig
        .manager
        .rollback(
            point.id,
            RollbackOptions::new()
                .selection(SelectionCriteria::new(SelectionKind::File).identifier("a.ts")),
        )
        .await
        .unwrap();
    assert_eq!(outcome.operation.status, OperationStatus::Completed);
    assert_eq!(rig.files.file_contents("a.ts").await.unwrap(), "old a");
    assert_eq!(rig.files.file_contents("b.ts").await.unwrap(), "new b");

    // Second rollback: only b.ts.
    let outcome = rig
        .manager
        .rollback(
            point.id,
            RollbackOptions::new()
                .selection(SelectionCriteria::new(SelectionKind::File).identifier("b.ts")),
        )
        .await
        .unwrap();
    assert_eq!(outcome.operation.status, OperationStatus::Completed);
    assert_eq!(rig.files.file_contents("b.ts").await.unwrap(), "old b");
}

#[tokio::test]
async fn test_create_point_requires_database_ready() {
    let rig = rig();
    rig.readiness.set_ready(false);

    let result = rig
        .manager
        .create_rollback_point("blocked", CreatePointOptions::new())
        .await;
    assert!(matches!(result, Err(RollbackError::DatabaseNotReady)));
}

#[tokio::test]
async fn test_rollback_unknown_point_is_not_found() {
    let rig = rig();
    let result = rig
        .manager
        .rollback(uuid::Uuid::new_v4(), RollbackOptions::new())
        .await;
    assert!(matches!(result, Err(RollbackError::NotFound(_))));
}

#[tokio::test]
async fn test_dry_run_previews_without_mutating() {
    let rig = rig();
    rig.files.write_file_contents("x.ts", "old").await.unwrap();

    let point = rig
        .manager
        .create_rollback_point("pre-change", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();

    rig.files.write_file_contents("x.ts", "new").await.unwrap();

    let outcome = rig
        .manager
        .rollback(
            point.id,
            RollbackOptions::new().kind(OperationKind::DryRun),
        )
        .await
        .unwrap();

    assert_eq!(outcome.operation.status, OperationStatus::Completed);
    let preview = outcome.preview.expect("dry run returns a preview");
    assert_eq!(preview.would_apply.len(), 1);
    assert!(outcome.applied.is_empty());
    // State untouched.
    assert_eq!(rig.files.file_contents("x.ts").await.unwrap(), "new");
}

#[tokio::test]
async fn test_type_mismatch_under_abort_fails_operation() {
    let rig = rig();
    rig.sessions.set_data(json!({"mode": "fast"})).await;

    let point = rig
        .manager
        .create_rollback_point("pre-type-change", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();

    // Same key, different JSON type.
    rig.sessions.set_data(json!({"mode": 3})).await;

    let outcome = rig
        .manager
        .rollback(
            point.id,
            RollbackOptions::new()
                .conflict_policy(ConflictPolicy::new(ConflictStrategy::Abort)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.operation.status, OperationStatus::Failed);
    let error = outcome.operation.error.as_deref().unwrap();
    assert!(error.contains("session.mode"), "error was: {error}");
    assert!(!outcome.conflicts.is_empty());
    // Nothing committed: current session data kept its post-snapshot shape.
    assert_eq!(
        rig.sessions.session_data().await.unwrap(),
        json!({"mode": 3})
    );
}

#[tokio::test]
async fn test_overwrite_policy_applies_despite_conflicts() {
    let rig = rig();
    rig.sessions.set_data(json!({"mode": "fast"})).await;

    let point = rig
        .manager
        .create_rollback_point("pre-type-change", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();

    rig.sessions.set_data(json!({"mode": 3})).await;

    let outcome = rig
        .manager
        .rollback(
            point.id,
            RollbackOptions::new()
                .conflict_policy(ConflictPolicy::new(ConflictStrategy::Overwrite)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.operation.status, OperationStatus::Completed);
    assert_eq!(
        rig.sessions.session_data().await.unwrap(),
        json!({"mode": "fast"})
    );
}

#[tokio::test]
async fn test_events_follow_the_contract() {
    let rig = rig();
    let mut receiver = rig.manager.subscribe();

    let point = rig
        .manager
        .create_rollback_point("observed", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();
    rig.graph.insert_entity(json!({"id": "e9"})).await;
    rig.manager
        .rollback(point.id, RollbackOptions::new())
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        names.push(event.name());
    }
    for expected in [
        "rollback-point-stored",
        "rollback-point-created",
        "rollback-started",
        "rollback-progress",
        "rollback-completed",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}

#[tokio::test]
async fn test_failed_rollback_emits_failure_event() {
    let rig = rig();
    let mut receiver = rig.manager.subscribe();

    rig.sessions.set_data(json!({"mode": "fast"})).await;
    let point = rig
        .manager
        .create_rollback_point("doomed", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();
    rig.sessions.set_data(json!({"mode": 3})).await;

    rig.manager
        .rollback(point.id, RollbackOptions::new())
        .await
        .unwrap();

    let mut saw_conflict = false;
    let mut saw_failed = false;
    while let Ok(event) = receiver.try_recv() {
        match event.name() {
            "conflict-detected" => saw_conflict = true,
            "rollback-failed" => saw_failed = true,
            _ => {}
        }
    }
    assert!(saw_conflict);
    assert!(saw_failed);
}

#[tokio::test]
async fn test_metrics_track_successes_and_failures() {
    let rig = rig();

    let point = rig
        .manager
        .create_rollback_point("measured", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();
    rig.graph.insert_entity(json!({"id": "e1"})).await;

    rig.manager
        .rollback(point.id, RollbackOptions::new())
        .await
        .unwrap();

    let metrics = rig.manager.metrics().await;
    assert_eq!(metrics.total_rollback_points, 1);
    assert_eq!(metrics.successful_rollbacks, 1);
    assert_eq!(metrics.failed_rollbacks, 0);
    assert!(metrics.average_rollback_time_ms >= 0.0);
}

#[tokio::test]
async fn test_cancel_is_illegal_once_terminal() {
    let rig = rig();

    let point = rig
        .manager
        .create_rollback_point("done", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();

    let outcome = rig
        .manager
        .rollback(point.id, RollbackOptions::new())
        .await
        .unwrap();
    assert_eq!(outcome.operation.status, OperationStatus::Completed);

    let result = rig.manager.cancel_rollback(outcome.operation.id).await;
    assert!(matches!(result, Err(RollbackError::InvalidState(_))));
}

#[tokio::test]
async fn test_operation_log_records_lifecycle() {
    let rig = rig();

    let point = rig
        .manager
        .create_rollback_point("logged", CreatePointOptions::new())
        .await
        .unwrap();
    rig.manager.create_snapshot(point.id).await.unwrap();
    rig.graph.insert_entity(json!({"id": "e1"})).await;

    let outcome = rig
        .manager
        .rollback(point.id, RollbackOptions::new())
        .await
        .unwrap();

    let stored = rig.manager.get_operation(outcome.operation.id).await.unwrap();
    assert!(stored.log.len() >= 2);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.kind, OperationKind::Full);
}

#[tokio::test]
async fn test_shutdown_stops_background_work() {
    let rig = rig_with_config(
        RollbackConfig::new().cleanup_interval(std::time::Duration::from_millis(50)),
    );
    let point = rig
        .manager
        .create_rollback_point("survivor", CreatePointOptions::new())
        .await
        .unwrap();

    rig.manager.shutdown().await;
    // Shutdown is idempotent on the maintenance side: data stays readable.
    assert!(rig.manager.get_rollback_point(point.id).await.is_ok());
}
