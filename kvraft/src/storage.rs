//! The snapshot storage interface consumed by the snapshot manager (§6: "Consumed storage
//! interface"). Durable storage is external to this crate (§1); what lives here is the trait
//! and an in-memory implementation sufficient for the test harness and the demo binary.

use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait SnapshotStorage: Send + Sync + 'static {
    /// The most recently saved snapshot, if any. Consulted once at startup.
    async fn read_snapshot(&self) -> anyhow::Result<Option<Vec<u8>>>;

    /// Persist a newly encoded snapshot, replacing whatever was saved before.
    async fn save_snapshot(&self, bytes: Vec<u8>) -> anyhow::Result<()>;
}

/// An in-memory `SnapshotStorage`. Snapshots written here do not survive process exit — fine
/// for tests and the demo binary, but never for a real deployment.
#[derive(Default)]
pub struct MemSnapshotStorage {
    slot: RwLock<Option<Vec<u8>>>,
}

impl MemSnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed storage with an existing snapshot, as if a previous process instance had written
    /// one before this node restarted.
    pub fn seeded_with(bytes: Vec<u8>) -> Self {
        Self {
            slot: RwLock::new(Some(bytes)),
        }
    }
}

#[async_trait]
impl SnapshotStorage for MemSnapshotStorage {
    async fn read_snapshot(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.slot.read().await.clone())
    }

    async fn save_snapshot(&self, bytes: Vec<u8>) -> anyhow::Result<()> {
        *self.slot.write().await = Some(bytes);
        Ok(())
    }
}
