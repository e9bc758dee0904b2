use crate::domain::delivery::Snapshot;
use crate::domain::ports::{SnapshotSink, SnapshotSource};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory result snapshot.
///
/// Uses `Arc<RwLock<Option<Snapshot>>>` so the bridge side and the polling
/// side can share one instance. Only the latest write is kept, as a terminal
/// overwrites its last-result record.
#[derive(Default, Clone)]
pub struct InMemorySnapshotStore {
    latest: Arc<RwLock<Option<Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates a new, empty snapshot store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear(&self) {
        *self.latest.write().await = None;
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshotStore {
    async fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.latest.read().await.clone())
    }
}

#[async_trait]
impl SnapshotSink for InMemorySnapshotStore {
    async fn write(&self, snapshot: Snapshot) -> Result<()> {
        *self.latest.write().await = Some(snapshot);
        Ok(())
    }
}
