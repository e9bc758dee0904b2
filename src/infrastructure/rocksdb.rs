use crate::domain::delivery::Snapshot;
use crate::domain::ports::{SnapshotSink, SnapshotSource};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding the terminal's last-result record.
pub const CF_SNAPSHOTS: &str = "snapshots";
const LATEST_KEY: &[u8] = b"latest";

/// A persistent result snapshot backed by RocksDB.
///
/// A result written here survives a process restart, so an approval the
/// previous run never saw is still picked up by the next poll.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBSnapshotStore {
    db: Arc<DB>,
}

impl RocksDBSnapshotStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "snapshots" column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_snapshots = ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_snapshots])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn missing_cf() -> PaymentError {
        PaymentError::InternalError(Box::new(std::io::Error::other(
            "Snapshots column family not found",
        )))
    }
}

#[async_trait]
impl SnapshotSource for RocksDBSnapshotStore {
    async fn latest(&self) -> Result<Option<Snapshot>> {
        let cf = self.db.cf_handle(CF_SNAPSHOTS).ok_or_else(Self::missing_cf)?;

        let Some(bytes) = self.db.get_cf(&cf, LATEST_KEY)? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            PaymentError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Deserialization error: {}", e),
            )))
        })?;
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl SnapshotSink for RocksDBSnapshotStore {
    async fn write(&self, snapshot: Snapshot) -> Result<()> {
        let cf = self.db.cf_handle(CF_SNAPSHOTS).ok_or_else(Self::missing_cf)?;

        let value = serde_json::to_vec(&snapshot).map_err(|e| {
            PaymentError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )))
        })?;
        self.db.put_cf(&cf, LATEST_KEY, value)?;

        Ok(())
    }
}
