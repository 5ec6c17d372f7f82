//! Shared fixtures for integration tests.

use graphrollback::interface::{InMemoryFiles, InMemoryGraph, InMemorySessions, StaticReadiness};
use graphrollback::{Collaborators, RollbackConfig, RollbackManager};
use std::sync::Arc;

pub struct TestRig {
    pub manager: Arc<RollbackManager>,
    pub readiness: Arc<StaticReadiness>,
    pub graph: Arc<InMemoryGraph>,
    pub files: Arc<InMemoryFiles>,
    pub sessions: Arc<InMemorySessions>,
}

pub fn rig() -> TestRig {
    rig_with_config(RollbackConfig::default())
}

pub fn rig_with_config(config: RollbackConfig) -> TestRig {
    let readiness = Arc::new(StaticReadiness::ready());
    let graph = InMemoryGraph::new();
    let files = InMemoryFiles::new();
    let sessions = InMemorySessions::new(Some("session-1".into()));

    let collaborators = Collaborators::new(
        readiness.clone(),
        graph.clone(),
        files.clone(),
        sessions.clone(),
    );
    TestRig {
        manager: Arc::new(RollbackManager::new(config, collaborators)),
        readiness,
        graph,
        files,
        sessions,
    }
}
