// ============================================================================
// External Collaborator Interfaces
// ============================================================================
//
// The rollback subsystem never owns the graph, the filesystem, or session
// state. It consumes them through the narrow traits below; their internals
// (transactions, real I/O, auth) are the collaborator's concern.
//
// ============================================================================

use crate::core::{Result, RollbackError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Readiness gate consulted before new rollback points are created.
#[async_trait]
pub trait DatabaseReadiness: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// The knowledge-graph store. `restore_*` are bulk-replace primitives;
/// transaction semantics are the collaborator's concern.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn entities(&self) -> Result<Vec<Value>>;
    async fn relationships(&self) -> Result<Vec<Value>>;
    async fn restore_entities(&self, entities: Vec<Value>) -> Result<()>;
    async fn restore_relationships(&self, relationships: Vec<Value>) -> Result<()>;
}

/// Workspace file access.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn file_contents(&self, path: &str) -> Result<String>;
    async fn write_file_contents(&self, path: &str, contents: &str) -> Result<()>;
    async fn list_files(&self) -> Result<Vec<String>>;
}

/// Session state access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn current_session_id(&self) -> Option<String>;
    async fn session_data(&self) -> Result<Value>;
    async fn restore_session_data(&self, data: Value) -> Result<()>;
}

// ============================================================================
// In-memory collaborators
// ============================================================================
//
// Reference implementations backing tests and embedders that have not wired
// a real platform yet.

/// Readiness flag that can be toggled at runtime.
#[derive(Default)]
pub struct StaticReadiness {
    ready: std::sync::atomic::AtomicBool,
}

impl StaticReadiness {
    pub fn ready() -> Self {
        let gate = Self::default();
        gate.set_ready(true);
        gate
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseReadiness for StaticReadiness {
    async fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// In-memory knowledge graph holding plain JSON entities/relationships.
#[derive(Default)]
pub struct InMemoryGraph {
    entities: RwLock<Vec<Value>>,
    relationships: RwLock<Vec<Value>>,
}

impl InMemoryGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert_entity(&self, entity: Value) {
        self.entities.write().await.push(entity);
    }

    pub async fn insert_relationship(&self, relationship: Value) {
        self.relationships.write().await.push(relationship);
    }
}

#[async_trait]
impl KnowledgeGraph for InMemoryGraph {
    async fn entities(&self) -> Result<Vec<Value>> {
        Ok(self.entities.read().await.clone())
    }

    async fn relationships(&self) -> Result<Vec<Value>> {
        Ok(self.relationships.read().await.clone())
    }

    async fn restore_entities(&self, entities: Vec<Value>) -> Result<()> {
        *self.entities.write().await = entities;
        Ok(())
    }

    async fn restore_relationships(&self, relationships: Vec<Value>) -> Result<()> {
        *self.relationships.write().await = relationships;
        Ok(())
    }
}

/// In-memory file tree keyed by path.
#[derive(Default)]
pub struct InMemoryFiles {
    files: RwLock<HashMap<String, String>>,
}

impl InMemoryFiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl FileStore for InMemoryFiles {
    async fn file_contents(&self, path: &str) -> Result<String> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| RollbackError::Collaborator(format!("file '{path}' not found")))
    }

    async fn write_file_contents(&self, path: &str, contents: &str) -> Result<()> {
        self.files
            .write()
            .await
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self.files.read().await.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }
}

/// In-memory session holder.
pub struct InMemorySessions {
    session_id: Option<String>,
    data: RwLock<Value>,
}

impl InMemorySessions {
    pub fn new(session_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            data: RwLock::new(Value::Object(serde_json::Map::new())),
        })
    }

    pub async fn set_data(&self, data: Value) {
        *self.data.write().await = data;
    }
}

#[async_trait]
impl SessionStore for InMemorySessions {
    async fn current_session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    async fn session_data(&self) -> Result<Value> {
        Ok(self.data.read().await.clone())
    }

    async fn restore_session_data(&self, data: Value) -> Result<()> {
        *self.data.write().await = data;
        Ok(())
    }
}
