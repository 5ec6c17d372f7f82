// ============================================================================
// Persistence Backends
// ============================================================================
//
// The durable home of rollback points lives outside this subsystem. The
// store drives these hooks at well-defined moments (store / remove / expiry /
// cleanup); what "durable" means is the backend's concern.
//
// ============================================================================

use crate::core::{Result, RollbackError, RollbackPoint, Snapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Durable home for rollback points and their snapshots.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Persist a point together with its captured snapshots. Called again
    /// with the full snapshot set whenever snapshots are attached.
    async fn persist(&self, point: &RollbackPoint, snapshots: &[Snapshot]) -> Result<()>;

    /// Remove a point from durable storage.
    async fn unpersist(&self, id: Uuid) -> Result<()>;

    /// Load everything previously persisted, e.g. at process start.
    async fn load_all(&self) -> Result<Vec<(RollbackPoint, Vec<Snapshot>)>>;
}

/// Keeps persisted state in process memory. The default backend; also the
/// reference implementation for tests.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<Uuid, (RollbackPoint, Vec<Snapshot>)>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn persist(&self, point: &RollbackPoint, snapshots: &[Snapshot]) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(point.id, (point.clone(), snapshots.to_vec()));
        Ok(())
    }

    async fn unpersist(&self, id: Uuid) -> Result<()> {
        self.entries.lock().await.remove(&id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(RollbackPoint, Vec<Snapshot>)>> {
        let entries = self.entries.lock().await;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by_key(|(point, _)| point.timestamp);
        Ok(all)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedPoint {
    point: RollbackPoint,
    snapshots: Vec<Snapshot>,
}

/// One JSON file per rollback point, written atomically (write to a temp
/// file in the same directory, then rename over the target).
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// # Errors
    /// Returns `Persistence` if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            RollbackError::Persistence(format!(
                "failed to create persistence directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    fn file_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn persist(&self, point: &RollbackPoint, snapshots: &[Snapshot]) -> Result<()> {
        let record = PersistedPoint {
            point: point.clone(),
            snapshots: snapshots.to_vec(),
        };
        let encoded = serde_json::to_vec_pretty(&record)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| RollbackError::Persistence(format!("failed to create temp file: {e}")))?;
        temp.write_all(&encoded)
            .map_err(|e| RollbackError::Persistence(format!("failed to write snapshot: {e}")))?;
        temp.persist(self.file_path(point.id)).map_err(|e| {
            RollbackError::Persistence(format!("failed to finalize snapshot file: {e}"))
        })?;
        Ok(())
    }

    async fn unpersist(&self, id: Uuid) -> Result<()> {
        let path = self.file_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RollbackError::Persistence(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    async fn load_all(&self) -> Result<Vec<(RollbackPoint, Vec<Snapshot>)>> {
        let mut all = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            RollbackError::Persistence(format!("failed to read {}: {e}", self.dir.display()))
        })?;
        for entry in entries {
            let entry =
                entry.map_err(|e| RollbackError::Persistence(format!("directory walk: {e}")))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let contents = fs::read(&path).map_err(|e| {
                RollbackError::Persistence(format!("failed to read {}: {e}", path.display()))
            })?;
            let record: PersistedPoint = serde_json::from_slice(&contents)?;
            all.push((record.point, record.snapshots));
        }
        all.sort_by_key(|(point, _)| point.timestamp);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn point(name: &str) -> RollbackPoint {
        RollbackPoint::new(name, None, HashMap::new(), None, None).unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_backend_roundtrip() {
        let backend = InMemoryBackend::new();
        let p = point("checkpoint");
        let snap = Snapshot::capture(p.id, crate::core::SnapshotKind::Entity, json!({"a": 1}));

        backend.persist(&p, std::slice::from_ref(&snap)).await.unwrap();
        assert_eq!(backend.len().await, 1);

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.id, p.id);
        assert_eq!(loaded[0].1[0].data, json!({"a": 1}));

        backend.unpersist(p.id).await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        let p = point("durable");
        let snap = Snapshot::capture(p.id, crate::core::SnapshotKind::File, json!({"f": "x"}));
        backend.persist(&p, std::slice::from_ref(&snap)).await.unwrap();

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.name, "durable");
        assert!(loaded[0].1[0].verify_checksum());

        backend.unpersist(p.id).await.unwrap();
        assert!(backend.load_all().await.unwrap().is_empty());

        // Removing twice is fine.
        backend.unpersist(p.id).await.unwrap();
    }
}
