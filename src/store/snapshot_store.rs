// ============================================================================
// Snapshot Store
// ============================================================================
//
// Bounded LRU cache of rollback points plus an unbounded map of operations.
// Points carry an optional TTL; an expiry timer fires for each, and `get`
// re-checks expiry defensively in case the timer has not fired yet. Expiry
// timers hold only a weak reference to the store and are cancelled on
// explicit removal.
//
// ============================================================================

use crate::core::{
    EventBus, OperationStatus, Result, RollbackError, RollbackEvent, RollbackMetrics,
    RollbackOperation, RollbackPoint, Snapshot,
};
use crate::store::persistence::PersistenceBackend;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Counts returned by a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_points: usize,
    pub removed_operations: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.expired_points + self.removed_operations
    }
}

/// Cloning shares the underlying store.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    points: Mutex<LruCache<Uuid, RollbackPoint>>,
    snapshots: Mutex<HashMap<Uuid, Vec<Snapshot>>>,
    operations: RwLock<HashMap<Uuid, RollbackOperation>>,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    cleanup_running: AtomicBool,
    metrics: Mutex<RollbackMetrics>,
    backend: Arc<dyn PersistenceBackend>,
    events: EventBus,
    operation_retention: Duration,
}

impl SnapshotStore {
    pub fn new(
        max_points: usize,
        operation_retention: Duration,
        events: EventBus,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_points.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(StoreInner {
                points: Mutex::new(LruCache::new(capacity)),
                snapshots: Mutex::new(HashMap::new()),
                operations: RwLock::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                cleanup_running: AtomicBool::new(false),
                metrics: Mutex::new(RollbackMetrics::default()),
                backend,
                events,
                operation_retention,
            }),
        }
    }

    // ========================================================================
    // Rollback points
    // ========================================================================

    /// Insert a point, evicting the least-recently-touched entry if the
    /// cache is at capacity and the key is new. Schedules an expiry timer
    /// when the point carries a TTL.
    pub async fn store(&self, point: RollbackPoint) -> Result<()> {
        let id = point.id;
        let expires_at = point.expires_at;

        self.inner.backend.persist(&point, &[]).await?;

        let displaced = {
            let mut points = self.inner.points.lock().await;
            points.push(id, point)
        };
        // `push` hands back either the previous value for this key (an
        // overwrite, nothing to clean up) or the evicted LRU entry.
        if let Some((evicted_id, _)) = displaced {
            if evicted_id != id {
                tracing::debug!(%evicted_id, "rollback point evicted by LRU capacity");
                self.inner.drop_point_state(evicted_id).await;
                self.inner
                    .events
                    .publish(RollbackEvent::PointRemoved { point_id: evicted_id });
            }
        }

        if let Some(expiry) = expires_at {
            self.schedule_expiry(id, expiry).await;
        }

        self.inner.metrics.lock().await.total_rollback_points += 1;
        self.inner
            .events
            .publish(RollbackEvent::PointStored { point_id: id });
        Ok(())
    }

    /// Fetch a point, refreshing its LRU recency.
    ///
    /// # Errors
    /// `NotFound` when absent; `Expired` when its TTL has already passed
    /// (the point is removed as a side effect, even if the timer has not
    /// fired yet).
    pub async fn get(&self, id: Uuid) -> Result<RollbackPoint> {
        let now = Utc::now();
        {
            let mut points = self.inner.points.lock().await;
            let hit = points.get(&id).map(|p| (p.clone(), p.is_expired(now)));
            match hit {
                Some((point, false)) => return Ok(point),
                Some((_, true)) => {
                    points.pop(&id);
                }
                None => return Err(RollbackError::NotFound(id.to_string())),
            }
        }

        self.inner.drop_point_state(id).await;
        self.inner
            .events
            .publish(RollbackEvent::PointExpired { point_id: id });
        Err(RollbackError::Expired(id.to_string()))
    }

    /// All non-expired points, newest first. Does not refresh recency.
    pub async fn get_all(&self) -> Vec<RollbackPoint> {
        let now = Utc::now();
        let points = self.inner.points.lock().await;
        let mut all: Vec<RollbackPoint> = points
            .iter()
            .map(|(_, point)| point)
            .filter(|point| !point.is_expired(now))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all
    }

    /// Non-expired points belonging to one session, newest first.
    pub async fn get_all_for_session(&self, session_id: &str) -> Vec<RollbackPoint> {
        let mut all = self.get_all().await;
        all.retain(|point| point.session_id.as_deref() == Some(session_id));
        all
    }

    /// Explicitly delete a point: cancels its timer, evicts it, drops its
    /// snapshots and invokes the persistence-removal hook.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let existed = {
            let mut points = self.inner.points.lock().await;
            points.pop(&id).is_some()
        };
        if !existed {
            return Err(RollbackError::NotFound(id.to_string()));
        }

        self.inner.drop_point_state(id).await;
        self.inner.backend.unpersist(id).await?;
        self.inner
            .events
            .publish(RollbackEvent::PointRemoved { point_id: id });
        Ok(())
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Attach captured snapshots to a stored point and re-persist the point
    /// with its full snapshot set.
    pub async fn store_snapshots(&self, point_id: Uuid, snapshots: Vec<Snapshot>) -> Result<()> {
        let point = {
            let points = self.inner.points.lock().await;
            points
                .peek(&point_id)
                .cloned()
                .ok_or_else(|| RollbackError::NotFound(point_id.to_string()))?
        };

        let all = {
            let mut held = self.inner.snapshots.lock().await;
            let slot = held.entry(point_id).or_default();
            slot.extend(snapshots);
            slot.clone()
        };
        self.inner.backend.persist(&point, &all).await
    }

    pub async fn snapshots_for(&self, point_id: Uuid) -> Vec<Snapshot> {
        self.inner
            .snapshots
            .lock()
            .await
            .get(&point_id)
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn store_operation(&self, operation: RollbackOperation) {
        self.inner
            .operations
            .write()
            .await
            .insert(operation.id, operation);
    }

    pub async fn get_operation(&self, id: Uuid) -> Result<RollbackOperation> {
        self.inner
            .operations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))
    }

    /// Replace a stored operation.
    ///
    /// # Errors
    /// `NotFound` if the operation was never stored.
    pub async fn update_operation(&self, operation: RollbackOperation) -> Result<()> {
        let mut operations = self.inner.operations.write().await;
        if !operations.contains_key(&operation.id) {
            return Err(RollbackError::NotFound(operation.id.to_string()));
        }
        operations.insert(operation.id, operation);
        Ok(())
    }

    /// Mutate a stored operation in place and return the updated copy.
    pub async fn modify_operation<F>(&self, id: Uuid, mutate: F) -> Result<RollbackOperation>
    where
        F: FnOnce(&mut RollbackOperation),
    {
        let mut operations = self.inner.operations.write().await;
        let operation = operations
            .get_mut(&id)
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))?;
        mutate(operation);
        Ok(operation.clone())
    }

    pub async fn remove_operation(&self, id: Uuid) -> Result<()> {
        self.inner
            .operations
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))
    }

    pub async fn operations_by_status(&self, status: OperationStatus) -> Vec<RollbackOperation> {
        let mut matched: Vec<RollbackOperation> = self
            .inner
            .operations
            .read()
            .await
            .values()
            .filter(|op| op.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        matched
    }

    // ========================================================================
    // Cleanup & metrics
    // ========================================================================

    /// Remove expired points and terminal operations older than the
    /// retention window. A run already in progress suppresses a newly
    /// scheduled one. Never fails: internal errors surface as
    /// `cleanup-error` events.
    pub async fn cleanup(&self) -> CleanupReport {
        self.inner.cleanup().await
    }

    /// Run `cleanup` on an interval until the store is dropped.
    pub fn spawn_cleanup_task(&self, interval: std::time::Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        inner.cleanup().await;
                    }
                    None => break,
                }
            }
        })
    }

    pub async fn metrics(&self) -> RollbackMetrics {
        let mut metrics = self.inner.metrics.lock().await.clone();
        metrics.memory_usage = self.inner.estimate_memory().await;
        metrics
    }

    pub async fn record_success(&self, elapsed_ms: f64) {
        self.inner.metrics.lock().await.record_success(elapsed_ms);
    }

    pub async fn record_failure(&self) {
        self.inner.metrics.lock().await.record_failure();
    }

    /// Cancel every outstanding expiry timer. Called on shutdown.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    async fn schedule_expiry(&self, id: Uuid, expiry: DateTime<Utc>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let delay = (expiry - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
            // Weak: the timer must never keep the store alive on its own.
            if let Some(inner) = weak.upgrade() {
                inner.expire(id).await;
            }
        });
        if let Some(previous) = self.inner.timers.lock().await.insert(id, handle) {
            previous.abort();
        }
    }
}

impl StoreInner {
    /// Timer-driven expiry. The point may already be gone (explicit remove
    /// or LRU eviction beat the timer); that is not an error.
    async fn expire(&self, id: Uuid) {
        let removed = {
            let mut points = self.points.lock().await;
            let lapsed = points
                .peek(&id)
                .is_some_and(|point| point.is_expired(Utc::now()));
            lapsed && points.pop(&id).is_some()
        };
        if !removed {
            return;
        }

        tracing::debug!(%id, "rollback point expired");
        self.drop_point_state(id).await;
        if let Err(e) = self.backend.unpersist(id).await {
            tracing::warn!(%id, error = %e, "failed to unpersist expired point");
        }
        self.events.publish(RollbackEvent::PointExpired { point_id: id });
    }

    /// Drop everything owned by a point except the cache entry itself:
    /// snapshots and the expiry timer.
    async fn drop_point_state(&self, id: Uuid) {
        self.snapshots.lock().await.remove(&id);
        if let Some(handle) = self.timers.lock().await.remove(&id) {
            handle.abort();
        }
    }

    async fn cleanup(&self) -> CleanupReport {
        if self
            .cleanup_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("cleanup already in progress, skipping");
            return CleanupReport::default();
        }

        self.events.publish(RollbackEvent::CleanupStarted);
        let now = Utc::now();

        let expired: Vec<Uuid> = {
            let mut points = self.points.lock().await;
            let stale: Vec<Uuid> = points
                .iter()
                .filter(|(_, point)| point.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            for id in &stale {
                points.pop(id);
            }
            stale
        };
        for id in &expired {
            self.drop_point_state(*id).await;
            if let Err(e) = self.backend.unpersist(*id).await {
                self.events.publish(RollbackEvent::CleanupError {
                    error: e.to_string(),
                });
            }
            self.events.publish(RollbackEvent::PointExpired { point_id: *id });
        }

        let cutoff = now - self.operation_retention;
        let removed_operations = {
            let mut operations = self.operations.write().await;
            let before = operations.len();
            operations.retain(|_, op| {
                !(op.status.is_terminal()
                    && op.completed_at.unwrap_or(op.started_at) < cutoff)
            });
            before - operations.len()
        };

        let report = CleanupReport {
            expired_points: expired.len(),
            removed_operations,
        };

        {
            let mut metrics = self.metrics.lock().await;
            metrics.last_cleanup = Some(now);
        }

        tracing::info!(
            expired_points = report.expired_points,
            removed_operations = report.removed_operations,
            "cleanup pass finished"
        );
        self.events.publish(RollbackEvent::CleanupCompleted {
            removed_count: report.total(),
        });
        self.cleanup_running.store(false, Ordering::SeqCst);
        report
    }

    /// Rough accounting: snapshot payload sizes plus flat per-record costs
    /// for points and operations.
    async fn estimate_memory(&self) -> usize {
        const POINT_OVERHEAD: usize = 256;
        const OPERATION_OVERHEAD: usize = 512;

        let snapshot_bytes: usize = self
            .snapshots
            .lock()
            .await
            .values()
            .flat_map(|snaps| snaps.iter())
            .map(|snap| snap.size)
            .sum();
        let point_count = self.points.lock().await.len();
        let operation_count = self.operations.read().await.len();
        snapshot_bytes + point_count * POINT_OVERHEAD + operation_count * OPERATION_OVERHEAD
    }
}
