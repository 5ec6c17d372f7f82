// ============================================================================
// Rollback Manager
// ============================================================================
//
// The orchestrator. Owns the store, the diff engine, the event bus and the
// collaborator references; creates rollback points, captures snapshots,
// composes diffs of current state against a point, and drives operations
// through their state machine while a strategy does the selecting, ordering
// and applying.
//
// Concurrent `rollback()` calls against the same point are not serialized
// here; that remains a caller responsibility.
//
// ============================================================================

use crate::core::{
    DiffEntry, EventBus, OperationKind, Result, RollbackConfig, RollbackError, RollbackEvent,
    RollbackMetrics, RollbackOperation, RollbackPoint, Snapshot, SnapshotKind,
};
use crate::diff::{DiffEngine, DiffOptions, path as diff_path};
use crate::interface::{DatabaseReadiness, FileStore, KnowledgeGraph, SessionStore};
use crate::store::{CleanupReport, InMemoryBackend, PersistenceBackend, SnapshotStore};
use crate::strategy::{
    ChangeApplier, DryRunPreview, NoopApplier, RollbackOptions, StrategyContext, StrategyUpdate,
    select_strategy,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The external systems rollback operates against.
#[derive(Clone)]
pub struct Collaborators {
    pub database: Arc<dyn DatabaseReadiness>,
    pub graph: Arc<dyn KnowledgeGraph>,
    pub files: Arc<dyn FileStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Collaborators {
    pub fn new(
        database: Arc<dyn DatabaseReadiness>,
        graph: Arc<dyn KnowledgeGraph>,
        files: Arc<dyn FileStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            database,
            graph,
            files,
            sessions,
        }
    }
}

/// Options for `create_rollback_point`.
#[derive(Clone, Default)]
pub struct CreatePointOptions {
    pub description: Option<String>,
    pub metadata: HashMap<String, Value>,
    /// Defaults to the session collaborator's current session.
    pub session_id: Option<String>,
    /// Overrides the configured default TTL.
    pub ttl: Option<chrono::Duration>,
}

impl CreatePointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Everything a finished `rollback()` call reports: the terminal operation
/// plus what the strategy did. Callers inspect `operation.status`; domain
/// failures resolve here rather than as errors.
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub operation: RollbackOperation,
    pub applied: Vec<DiffEntry>,
    pub skipped: Vec<DiffEntry>,
    pub conflicts: Vec<crate::core::RollbackConflict>,
    /// Present for dry runs.
    pub preview: Option<DryRunPreview>,
}

/// Kinds captured by default when `create_snapshot` is called without an
/// explicit list.
const DEFAULT_CAPTURE_KINDS: [SnapshotKind; 4] = [
    SnapshotKind::Entity,
    SnapshotKind::Relationship,
    SnapshotKind::File,
    SnapshotKind::SessionState,
];

/// Orchestrates the rollback subsystem.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use graphrollback::interface::{InMemoryFiles, InMemoryGraph, InMemorySessions, StaticReadiness};
/// use graphrollback::{
///     Collaborators, CreatePointOptions, OperationStatus, RollbackConfig, RollbackManager,
///     RollbackOptions,
/// };
///
/// # async fn demo() -> graphrollback::Result<()> {
/// let collaborators = Collaborators::new(
///     Arc::new(StaticReadiness::ready()),
///     InMemoryGraph::new(),
///     InMemoryFiles::new(),
///     InMemorySessions::new(Some("session-1".into())),
/// );
/// let manager = RollbackManager::new(RollbackConfig::default(), collaborators);
///
/// let point = manager
///     .create_rollback_point("pre-migration", CreatePointOptions::new())
///     .await?;
/// manager.create_snapshot(point.id).await?;
///
/// // ... the platform mutates state ...
///
/// let outcome = manager.rollback(point.id, RollbackOptions::new()).await?;
/// assert_eq!(outcome.operation.status, OperationStatus::Completed);
/// # Ok(())
/// # }
/// ```
pub struct RollbackManager {
    config: RollbackConfig,
    store: SnapshotStore,
    engine: DiffEngine,
    events: EventBus,
    collaborators: Collaborators,
    /// Cancellation flags for in-flight operations.
    active: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl RollbackManager {
    /// Create a manager with the default in-memory persistence backend.
    ///
    /// Must be called inside a Tokio runtime: the cleanup interval task is
    /// spawned here.
    pub fn new(config: RollbackConfig, collaborators: Collaborators) -> Self {
        Self::with_backend(config, collaborators, Arc::new(InMemoryBackend::new()))
    }

    pub fn with_backend(
        config: RollbackConfig,
        collaborators: Collaborators,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Self {
        let events = EventBus::default();
        let store = SnapshotStore::new(
            config.max_points,
            config.operation_retention,
            events.clone(),
            backend,
        );
        let cleanup_task = store.spawn_cleanup_task(config.cleanup_interval);
        Self {
            config,
            store,
            engine: DiffEngine::new(),
            events,
            collaborators,
            active: Mutex::new(HashMap::new()),
            cleanup_task: Mutex::new(Some(cleanup_task)),
        }
    }

    /// Subscribe to the observable event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RollbackEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Rollback points & snapshots
    // ========================================================================

    /// Create and store a rollback point.
    ///
    /// # Errors
    /// `DatabaseNotReady` when the readiness collaborator reports not ready.
    pub async fn create_rollback_point(
        &self,
        name: impl Into<String>,
        options: CreatePointOptions,
    ) -> Result<RollbackPoint> {
        if !self.collaborators.database.is_ready().await {
            return Err(RollbackError::DatabaseNotReady);
        }

        let session_id = match options.session_id {
            Some(explicit) => Some(explicit),
            None => self.collaborators.sessions.current_session_id().await,
        };
        let expires_at = options
            .ttl
            .or(self.config.default_ttl)
            .map(|ttl| Utc::now() + ttl);

        let point = RollbackPoint::new(
            name,
            options.description,
            options.metadata,
            session_id,
            expires_at,
        )?;
        self.store.store(point.clone()).await?;

        tracing::info!(id = %point.id, name = %point.name, "rollback point created");
        self.events.publish(RollbackEvent::PointCreated {
            point: point.clone(),
        });
        Ok(point)
    }

    pub async fn get_rollback_point(&self, id: Uuid) -> Result<RollbackPoint> {
        self.store.get(id).await
    }

    pub async fn list_rollback_points(&self) -> Vec<RollbackPoint> {
        self.store.get_all().await
    }

    pub async fn list_rollback_points_for_session(&self, session_id: &str) -> Vec<RollbackPoint> {
        self.store.get_all_for_session(session_id).await
    }

    pub async fn delete_rollback_point(&self, id: Uuid) -> Result<()> {
        self.store.remove(id).await
    }

    /// Capture the default state categories (entities, relationships, files,
    /// session) into snapshots owned by the point.
    pub async fn create_snapshot(&self, point_id: Uuid) -> Result<Vec<Snapshot>> {
        self.create_snapshot_of(point_id, &DEFAULT_CAPTURE_KINDS).await
    }

    /// Capture specific state categories into snapshots owned by the point.
    pub async fn create_snapshot_of(
        &self,
        point_id: Uuid,
        kinds: &[SnapshotKind],
    ) -> Result<Vec<Snapshot>> {
        // Resolve first: NotFound/Expired must fail before any capture.
        let point = self.store.get(point_id).await?;

        let mut snapshots = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let data = self.capture_kind(*kind, &point).await?;
            snapshots.push(Snapshot::capture(point_id, *kind, data));
        }
        self.store
            .store_snapshots(point_id, snapshots.clone())
            .await?;
        tracing::debug!(%point_id, count = snapshots.len(), "snapshots captured");
        Ok(snapshots)
    }

    /// Attach a caller-supplied payload as a snapshot, e.g. configuration
    /// state this subsystem has no live source for.
    pub async fn attach_snapshot(
        &self,
        point_id: Uuid,
        kind: SnapshotKind,
        data: Value,
    ) -> Result<Snapshot> {
        self.store.get(point_id).await?;
        let snapshot = Snapshot::capture(point_id, kind, data);
        self.store
            .store_snapshots(point_id, vec![snapshot.clone()])
            .await?;
        Ok(snapshot)
    }

    pub async fn snapshots_for(&self, point_id: Uuid) -> Vec<Snapshot> {
        self.store.snapshots_for(point_id).await
    }

    async fn capture_kind(&self, kind: SnapshotKind, point: &RollbackPoint) -> Result<Value> {
        match kind {
            SnapshotKind::Entity => {
                Ok(keyed_by_id(self.collaborators.graph.entities().await?))
            }
            SnapshotKind::Relationship => {
                Ok(keyed_by_id(self.collaborators.graph.relationships().await?))
            }
            SnapshotKind::File => {
                let paths = self.collaborators.files.list_files().await?;
                let reads = paths
                    .iter()
                    .map(|path| self.collaborators.files.file_contents(path));
                let contents = futures::future::try_join_all(reads).await?;
                let doc: Map<String, Value> = paths
                    .into_iter()
                    .zip(contents)
                    .map(|(path, body)| (path, Value::String(body)))
                    .collect();
                Ok(Value::Object(doc))
            }
            SnapshotKind::SessionState => self.collaborators.sessions.session_data().await,
            SnapshotKind::Metadata => Ok(Value::Object(
                point
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            // No live source; attached by the caller when needed.
            SnapshotKind::Configuration => Ok(Value::Object(Map::new())),
        }
    }

    // ========================================================================
    // Diffing
    // ========================================================================

    /// Diff current state against a point's snapshots. Applying the result
    /// transforms live state back into the remembered state.
    pub async fn diff_against(&self, point_id: Uuid) -> Result<crate::core::RollbackDiff> {
        let point = self.store.get(point_id).await?;
        let (diff, _) = self.compose_diff(&point).await?;
        Ok(diff)
    }

    /// Build the composed diff plus the live documents it was computed
    /// from; the applier starts from those documents.
    async fn compose_diff(
        &self,
        point: &RollbackPoint,
    ) -> Result<(crate::core::RollbackDiff, BTreeMap<SnapshotKind, Value>)> {
        let snapshots = self.store.snapshots_for(point.id).await;
        if snapshots.is_empty() {
            tracing::warn!(point_id = %point.id, "diffing against a point with no snapshots");
        }

        let opts = DiffOptions::default();
        let mut changes = Vec::new();
        let mut current_docs = BTreeMap::new();

        for kind in SnapshotKind::ALL {
            // Archival kinds have no live source to diff or restore.
            if matches!(kind, SnapshotKind::Configuration | SnapshotKind::Metadata) {
                continue;
            }
            // Latest capture wins when a kind was snapshotted repeatedly.
            let Some(snapshot) = snapshots
                .iter()
                .filter(|s| s.kind == kind)
                .max_by_key(|s| s.created_at)
            else {
                continue;
            };
            if !snapshot.verify_checksum() {
                return Err(RollbackError::Validation(format!(
                    "snapshot {} failed its integrity check",
                    snapshot.id
                )));
            }

            let current = self.capture_kind(kind, point).await?;
            let entries = self.engine.diff_values(&current, &snapshot.data, &opts);
            let prefix = kind.path_prefix();
            changes.extend(entries.into_iter().map(|mut entry| {
                entry.path = prefix_path(prefix, &entry.path);
                entry
            }));
            current_docs.insert(kind, current);
        }

        Ok((
            crate::core::RollbackDiff::new("current", point.id.to_string(), changes),
            current_docs,
        ))
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Execute a rollback against a point.
    ///
    /// Domain failures (conflicts under abort, invalid selection criteria,
    /// a missing time filter) resolve the returned operation as `Failed`;
    /// the call itself still succeeds. Unknown/expired points and
    /// collaborator faults are returned as errors.
    pub async fn rollback(
        &self,
        point_id: Uuid,
        options: RollbackOptions,
    ) -> Result<RollbackOutcome> {
        let point = self.store.get(point_id).await?;
        let (diff, current_docs) = self.compose_diff(&point).await?;

        let kind = options.effective_kind();
        let mut operation = RollbackOperation::new(kind, point.id, options.mode);
        operation.log(format!(
            "rollback requested against point '{}' ({} candidate change(s))",
            point.name, diff.change_count
        ));
        let op_id = operation.id;
        self.store.store_operation(operation.clone()).await;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.lock().await.insert(op_id, cancelled.clone());
        self.events.publish(RollbackEvent::Started {
            operation: operation.clone(),
        });

        let started = std::time::Instant::now();
        let result = self
            .drive_operation(point, diff, current_docs, options, op_id, cancelled)
            .await;
        self.active.lock().await.remove(&op_id);

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Unexpected fault: mark the operation failed, then let the
                // error propagate to the caller.
                let operation = self
                    .store
                    .modify_operation(op_id, |op| {
                        if !op.status.is_terminal() {
                            let _ = op.fail(e.to_string());
                        }
                    })
                    .await
                    .unwrap_or(operation);
                self.store.record_failure().await;
                self.events.publish(RollbackEvent::Failed {
                    operation,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
        .map(|mut outcome| {
            outcome.operation.log.push(crate::core::OperationLogEntry {
                timestamp: Utc::now(),
                message: format!("finished in {} ms", started.elapsed().as_millis()),
            });
            outcome
        })
    }

    async fn drive_operation(
        &self,
        point: RollbackPoint,
        diff: crate::core::RollbackDiff,
        current_docs: BTreeMap<SnapshotKind, Value>,
        options: RollbackOptions,
        op_id: Uuid,
        cancelled: Arc<AtomicBool>,
    ) -> Result<RollbackOutcome> {
        let started = std::time::Instant::now();
        self.store
            .modify_operation(op_id, |op| {
                let _ = op.start();
            })
            .await?;

        let strategy = select_strategy(&options);
        let applier: Arc<dyn ChangeApplier> =
            if options.effective_kind() == OperationKind::DryRun {
                Arc::new(NoopApplier)
            } else {
                Arc::new(CollaboratorApplier {
                    engine: self.engine,
                    collaborators: self.collaborators.clone(),
                    state: Mutex::new(current_docs),
                })
            };

        let (updates, mut update_rx) = mpsc::unbounded_channel();
        let drain_store = self.store.clone();
        let drain_events = self.events.clone();
        let drain = tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                match update {
                    StrategyUpdate::Progress(pct) => {
                        if let Ok(op) = drain_store
                            .modify_operation(op_id, |op| op.set_progress(pct))
                            .await
                        {
                            drain_events.publish(RollbackEvent::Progress {
                                operation_id: op_id,
                                progress: op.progress,
                            });
                        }
                    }
                    StrategyUpdate::Log(message) => {
                        let _ = drain_store
                            .modify_operation(op_id, |op| op.log(message))
                            .await;
                    }
                    StrategyUpdate::Conflict(conflict) => {
                        drain_events.publish(RollbackEvent::ConflictDetected { conflict });
                    }
                }
            }
        });

        let ctx = StrategyContext {
            diff,
            target: point,
            options,
            applier,
            updates,
            cancelled,
        };

        if let Some(budget) = ctx.options.max_duration {
            let estimate = strategy.estimate_duration(&ctx);
            if estimate > budget {
                // Advisory only: no hard deadline is enforced.
                ctx.log(format!(
                    "estimated duration {estimate:?} exceeds the advisory budget {budget:?}"
                ));
            }
        }

        tracing::debug!(%op_id, strategy = strategy.name(), "executing rollback strategy");
        let execution = match strategy.validate(&ctx).await {
            Ok(true) => strategy.execute(&ctx).await,
            Ok(false) => Err(RollbackError::Validation(format!(
                "validation failed for {} strategy",
                strategy.name()
            ))),
            Err(e) => Err(e),
        };

        // Close the channel so the drain task finishes flushing updates.
        drop(ctx);
        let _ = drain.await;

        match execution {
            Ok(outcome) if outcome.cancelled => {
                let operation = self
                    .store
                    .modify_operation(op_id, |op| {
                        op.log("operation cancelled at a change boundary");
                        let _ = op.cancel();
                    })
                    .await?;
                Ok(RollbackOutcome {
                    operation,
                    applied: outcome.applied,
                    skipped: outcome.skipped,
                    conflicts: outcome.conflicts,
                    preview: outcome.preview,
                })
            }
            Ok(outcome) => {
                let elapsed_ms = started.elapsed().as_millis() as f64;
                let applied = outcome.applied.len();
                let operation = self
                    .store
                    .modify_operation(op_id, |op| {
                        if let Some(preview) = &outcome.preview {
                            op.log(format!(
                                "dry run: {} change(s) would apply, {} conflict(s), ~{} ms",
                                preview.would_apply.len(),
                                preview.conflicts.len(),
                                preview.estimated_duration_ms
                            ));
                        } else {
                            op.log(format!("applied {applied} change(s)"));
                        }
                        let _ = op.complete();
                    })
                    .await?;
                self.store.record_success(elapsed_ms).await;
                self.events.publish(RollbackEvent::Completed {
                    operation: operation.clone(),
                });
                Ok(RollbackOutcome {
                    operation,
                    applied: outcome.applied,
                    skipped: outcome.skipped,
                    conflicts: outcome.conflicts,
                    preview: outcome.preview,
                })
            }
            Err(e) if e.is_domain_failure() => {
                let message = domain_failure_message(&e);
                let conflicts = match e {
                    RollbackError::Conflict(conflicts) => conflicts,
                    _ => Vec::new(),
                };
                let operation = self
                    .store
                    .modify_operation(op_id, |op| {
                        for conflict in &conflicts {
                            op.log(format!(
                                "conflict at '{}' ({:?})",
                                conflict.path, conflict.kind
                            ));
                        }
                        let _ = op.fail(message.clone());
                    })
                    .await?;
                self.store.record_failure().await;
                self.events.publish(RollbackEvent::Failed {
                    operation: operation.clone(),
                    error: message,
                });
                Ok(RollbackOutcome {
                    operation,
                    applied: Vec::new(),
                    skipped: Vec::new(),
                    conflicts,
                    preview: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Request cancellation of an in-flight operation. Only legal while the
    /// operation is pending or in progress; the cancellation takes effect
    /// at the next change boundary, and already-applied changes stay.
    pub async fn cancel_rollback(&self, op_id: Uuid) -> Result<RollbackOperation> {
        let operation = self.store.get_operation(op_id).await?;
        if !operation.status.is_active() {
            return Err(RollbackError::InvalidState(format!(
                "cannot cancel operation {}: status is {}",
                op_id, operation.status
            )));
        }

        if let Some(flag) = self.active.lock().await.get(&op_id) {
            flag.store(true, Ordering::SeqCst);
            self.store
                .modify_operation(op_id, |op| op.log("cancellation requested"))
                .await
        } else {
            // Not executing (e.g. registered but never driven): resolve it
            // directly.
            self.store
                .modify_operation(op_id, |op| {
                    let _ = op.cancel();
                })
                .await
        }
    }

    pub async fn get_operation(&self, op_id: Uuid) -> Result<RollbackOperation> {
        self.store.get_operation(op_id).await
    }

    pub async fn operations_by_status(
        &self,
        status: crate::core::OperationStatus,
    ) -> Vec<RollbackOperation> {
        self.store.operations_by_status(status).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub async fn cleanup(&self) -> CleanupReport {
        self.store.cleanup().await
    }

    pub async fn metrics(&self) -> RollbackMetrics {
        self.store.metrics().await
    }

    /// Stop background work: the cleanup interval task and all expiry
    /// timers. In-flight operations get a cancellation request.
    pub async fn shutdown(&self) {
        if let Some(task) = self.cleanup_task.lock().await.take() {
            task.abort();
        }
        for flag in self.active.lock().await.values() {
            flag.store(true, Ordering::SeqCst);
        }
        self.store.shutdown().await;
        tracing::info!("rollback manager shut down");
    }
}

fn domain_failure_message(error: &RollbackError) -> String {
    match error {
        RollbackError::Conflict(conflicts) => {
            let mut paths: Vec<&str> = conflicts.iter().map(|c| c.path.as_str()).collect();
            paths.dedup();
            format!("rollback aborted: conflict(s) at [{}]", paths.join(", "))
        }
        other => other.to_string(),
    }
}

/// Key a collaborator's flat list by each item's `id` (falling back to
/// `name`, then position) so object diffing lines items up by identity.
fn keyed_by_id(items: Vec<Value>) -> Value {
    let mut doc = Map::new();
    for (index, item) in items.into_iter().enumerate() {
        let key = item
            .get("id")
            .map(value_key)
            .or_else(|| item.get("name").map(value_key))
            .unwrap_or_else(|| format!("item_{index}"));
        doc.insert(key, item);
    }
    Value::Object(doc)
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn prefix_path(prefix: &str, rest: &str) -> String {
    if rest.is_empty() {
        prefix.to_string()
    } else if rest.starts_with('[') {
        format!("{prefix}{rest}")
    } else {
        format!("{prefix}.{rest}")
    }
}

fn kind_for_prefix(prefix: &str) -> Option<SnapshotKind> {
    SnapshotKind::ALL
        .into_iter()
        .find(|kind| kind.path_prefix() == prefix)
}

/// Applies diff entries to the live platform: each entry is folded into the
/// working document for its category, then that category is pushed out
/// through the matching collaborator (bulk replace for graph data, a single
/// file write for file changes).
struct CollaboratorApplier {
    engine: DiffEngine,
    collaborators: Collaborators,
    state: Mutex<BTreeMap<SnapshotKind, Value>>,
}

#[async_trait::async_trait]
impl ChangeApplier for CollaboratorApplier {
    async fn apply(&self, entry: &DiffEntry) -> Result<()> {
        let root = diff_path::root_segment(&entry.path);
        let Some(kind) = kind_for_prefix(&root) else {
            return Err(RollbackError::Validation(format!(
                "change path '{}' has no recognized state category",
                entry.path
            )));
        };

        let inner = DiffEntry {
            path: diff_path::strip_root(&entry.path),
            op: entry.op,
            old_value: entry.old_value.clone(),
            new_value: entry.new_value.clone(),
            metadata: entry.metadata.clone(),
        };

        let mut state = self.state.lock().await;
        let doc = state
            .entry(kind)
            .or_insert_with(|| Value::Object(Map::new()));
        self.engine.apply_entry(doc, &inner)?;

        match kind {
            SnapshotKind::Entity => {
                self.collaborators
                    .graph
                    .restore_entities(doc_values(doc))
                    .await?;
            }
            SnapshotKind::Relationship => {
                self.collaborators
                    .graph
                    .restore_relationships(doc_values(doc))
                    .await?;
            }
            SnapshotKind::File => {
                let segments = diff_path::display_segments(&inner.path);
                if let Some(file_key) = segments.first() {
                    // No delete primitive on the collaborator: a removed
                    // file is written back empty.
                    let contents = doc
                        .get(file_key.as_str())
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    self.collaborators
                        .files
                        .write_file_contents(file_key, &contents)
                        .await?;
                }
            }
            SnapshotKind::SessionState => {
                self.collaborators
                    .sessions
                    .restore_session_data(doc.clone())
                    .await?;
            }
            SnapshotKind::Configuration | SnapshotKind::Metadata => {}
        }
        Ok(())
    }
}

/// Values of a keyed document, in key order.
fn doc_values(doc: &Value) -> Vec<Value> {
    doc.as_object()
        .map(|map| map.values().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyed_by_id_prefers_id_then_name() {
        let doc = keyed_by_id(vec![
            json!({"id": "e1", "v": 1}),
            json!({"name": "unnamed", "v": 2}),
            json!({"v": 3}),
        ]);
        let map = doc.as_object().unwrap();
        assert!(map.contains_key("e1"));
        assert!(map.contains_key("unnamed"));
        assert!(map.contains_key("item_2"));
    }

    #[test]
    fn test_prefix_path_forms() {
        assert_eq!(prefix_path("files", ""), "files");
        assert_eq!(prefix_path("entities", "e1.name"), "entities.e1.name");
        assert_eq!(prefix_path("entities", "[2]"), "entities[2]");
    }

    #[test]
    fn test_kind_for_prefix() {
        assert_eq!(kind_for_prefix("entities"), Some(SnapshotKind::Entity));
        assert_eq!(kind_for_prefix("files"), Some(SnapshotKind::File));
        assert_eq!(kind_for_prefix("bogus"), None);
    }
}
