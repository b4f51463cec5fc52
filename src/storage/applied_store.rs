//! Durable applied-index store (spec.md §3 "Applied index", §6
//! `quorum-raft-state/`).
//!
//! A single 64-bit big-endian integer under the key `applied-index`.
//! Written after every applied entry; read once at startup to configure
//! the Raft node so it suppresses redelivery of already-applied entries.

use crate::error::{BlockraftError, Result};
use crate::storage::redb_store::KvStore;

const APPLIED_INDEX_KEY: &[u8] = b"applied-index";

pub struct AppliedIndexStore {
    store: KvStore,
}

impl AppliedIndexStore {
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        let dir = data_dir.join("quorum-raft-state");
        std::fs::create_dir_all(&dir)
            .map_err(|e| BlockraftError::Durability(format!("create quorum-raft-state dir: {e}")))?;
        let store = KvStore::open(dir.join("state.redb"))?;
        Ok(Self { store })
    }

    pub fn get(&self) -> Result<u64> {
        match self.store.get(APPLIED_INDEX_KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| BlockraftError::Durability("corrupt applied-index".into()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Durably advance the applied index. Invariant (spec.md §8): for
    /// every applied index `i` stored here, an entry of index `i` exists
    /// in the WAL — callers must persist the WAL append first.
    pub fn set(&self, applied: u64) -> Result<()> {
        self.store
            .set(APPLIED_INDEX_KEY, &applied.to_be_bytes())
            .map_err(|e| BlockraftError::Durability(format!("applied-index write: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_to_zero_then_persists() {
        let dir = TempDir::new().unwrap();
        let store = AppliedIndexStore::open(dir.path()).unwrap();
        assert_eq!(store.get().unwrap(), 0);

        store.set(42).unwrap();
        assert_eq!(store.get().unwrap(), 42);

        // Surviving a reopen simulates a restart reading durable state.
        let reopened = AppliedIndexStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get().unwrap(), 42);
    }
}
