//! Agent Store
//!
//! Hook called by the registry at lifecycle-transition boundaries.
//! Only an in-memory implementation exists; agent state lives for one process.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::Result;
use crate::registry::AgentSnapshot;

/// Persistence collaborator for agent snapshots
pub trait AgentStore: Send + Sync {
    /// Save the latest snapshot of an agent
    fn save(&self, snapshot: &AgentSnapshot) -> Result<()>;

    /// Load the last saved snapshot of an agent
    fn load(&self, agent_id: &str) -> Result<Option<AgentSnapshot>>;
}

/// Process-resident store, useful for tests and for restoring agents into a fresh registry
#[derive(Default)]
pub struct InMemoryAgentStore {
    snapshots: DashMap<String, AgentSnapshot>,
    saves: AtomicU64,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of save calls served
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl AgentStore for InMemoryAgentStore {
    fn save(&self, snapshot: &AgentSnapshot) -> Result<()> {
        debug!(agent_id = %snapshot.agent_id, state = %snapshot.state, "saving agent snapshot");
        self.snapshots
            .insert(snapshot.agent_id.clone(), snapshot.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, agent_id: &str) -> Result<Option<AgentSnapshot>> {
        Ok(self.snapshots.get(agent_id).map(|s| s.clone()))
    }
}
