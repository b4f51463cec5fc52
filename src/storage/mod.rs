//! Durable stores (spec.md §2 C2): write-ahead log, snapshot directory,
//! and the small applied-index key-value store. See spec.md §6 for the
//! on-disk filesystem layout these three map to.

mod applied_store;
mod redb_store;
mod snapshot_store;
mod wal;

pub use applied_store::AppliedIndexStore;
pub use redb_store::KvStore;
pub use snapshot_store::SnapshotStore;
pub use wal::DurableLog;

/// Everything durable about a node, opened under one data directory.
pub struct DurableStores {
    pub wal: DurableLog,
    pub snapshots: SnapshotStore,
    pub applied_index: AppliedIndexStore,
}

impl DurableStores {
    pub fn open(data_dir: &std::path::Path) -> crate::error::Result<Self> {
        Ok(Self {
            wal: DurableLog::open(data_dir)?,
            snapshots: SnapshotStore::open(data_dir)?,
            applied_index: AppliedIndexStore::open(data_dir)?,
        })
    }
}
