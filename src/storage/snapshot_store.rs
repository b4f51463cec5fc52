//! Low-level snapshot directory (spec.md §6 `raft-snap/`).
//!
//! Stores opaque snapshot blobs keyed by the Raft index they were taken
//! at, plus a pointer to the latest one. The payload's meaning (conf
//! state + address book + tombstones) is [`crate::snapshot::SnapshotPayload`]'s
//! concern, not this module's.

use crate::error::{BlockraftError, Result};
use crate::storage::redb_store::KvStore;

const LATEST_KEY: &[u8] = b"latest-index";

fn snapshot_key(index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b's');
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub struct SnapshotStore {
    store: KvStore,
}

impl SnapshotStore {
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        let dir = data_dir.join("raft-snap");
        std::fs::create_dir_all(&dir)
            .map_err(|e| BlockraftError::Durability(format!("create raft-snap dir: {e}")))?;
        let store = KvStore::open(dir.join("snap.redb"))?;
        Ok(Self { store })
    }

    /// Persist a snapshot blob at `index` and advance the "latest" pointer.
    /// Fatal on failure (spec.md §7 Durability).
    pub fn write(&self, index: u64, bytes: &[u8]) -> Result<()> {
        self.store
            .set_many(&[
                (snapshot_key(index), bytes.to_vec()),
                (LATEST_KEY.to_vec(), index.to_be_bytes().to_vec()),
            ])
            .map_err(|e| BlockraftError::Durability(format!("snapshot write: {e}")))
    }

    /// Load the most recently written snapshot, if any.
    pub fn load_latest(&self) -> Result<Option<(u64, Vec<u8>)>> {
        let Some(latest_bytes) = self.store.get(LATEST_KEY)? else {
            return Ok(None);
        };
        let arr: [u8; 8] = latest_bytes
            .as_slice()
            .try_into()
            .map_err(|_| BlockraftError::Durability("corrupt latest-index".into()))?;
        let index = u64::from_be_bytes(arr);
        let bytes = self
            .store
            .get(&snapshot_key(index))?
            .ok_or_else(|| BlockraftError::Durability(format!("missing snapshot at {index}")))?;
        Ok(Some((index, bytes)))
    }
}
