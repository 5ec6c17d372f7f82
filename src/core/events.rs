// ============================================================================
// Rollback Events
// ============================================================================
//
// Channel-based notification interface replacing ad-hoc pub/sub. The event
// name strings are a wire contract; `RollbackEvent::name` must stay in sync
// with external consumers.
//
// ============================================================================

use crate::core::types::{RollbackConflict, RollbackOperation, RollbackPoint};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything observable about the subsystem.
#[derive(Debug, Clone)]
pub enum RollbackEvent {
    PointCreated { point: RollbackPoint },
    PointStored { point_id: Uuid },
    PointRemoved { point_id: Uuid },
    PointExpired { point_id: Uuid },
    Started { operation: RollbackOperation },
    Progress { operation_id: Uuid, progress: u8 },
    Completed { operation: RollbackOperation },
    Failed { operation: RollbackOperation, error: String },
    ConflictDetected { conflict: RollbackConflict },
    CleanupStarted,
    CleanupCompleted { removed_count: usize },
    CleanupError { error: String },
}

impl RollbackEvent {
    /// Wire name of the event, preserved exactly from the platform contract.
    pub fn name(&self) -> &'static str {
        match self {
            RollbackEvent::PointCreated { .. } => "rollback-point-created",
            RollbackEvent::PointStored { .. } => "rollback-point-stored",
            RollbackEvent::PointRemoved { .. } => "rollback-point-removed",
            RollbackEvent::PointExpired { .. } => "rollback-point-expired",
            RollbackEvent::Started { .. } => "rollback-started",
            RollbackEvent::Progress { .. } => "rollback-progress",
            RollbackEvent::Completed { .. } => "rollback-completed",
            RollbackEvent::Failed { .. } => "rollback-failed",
            RollbackEvent::ConflictDetected { .. } => "conflict-detected",
            RollbackEvent::CleanupStarted => "cleanup-started",
            RollbackEvent::CleanupCompleted { .. } => "cleanup-completed",
            RollbackEvent::CleanupError { .. } => "cleanup-error",
        }
    }
}

/// Broadcast-backed event bus.
///
/// Cloning shares the underlying channel; publishing with no subscribers is
/// not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RollbackEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Lagging or absent receivers are ignored.
    pub fn publish(&self, event: RollbackEvent) {
        tracing::debug!(event = event.name(), "publishing rollback event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RollbackEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
