//! Durable write-ahead log (spec.md §2 C2, §6 `raft-wal/`).
//!
//! Persists `HardState` and `Entries` from each `Ready` batch *before*
//! they are mirrored into the in-memory Raft storage (spec.md §4.2 step
//! i). Kept deliberately separate from the in-memory `raft::Storage`
//! implementation raft-rs reads from, so that the ordering spec.md
//! requires (durable first, volatile second) is a structural fact, not a
//! convention the driver has to remember. Record framing follows the
//! append-only log idiom used elsewhere in the retrieval corpus for
//! Raft WALs (magic-free here since redb already checksums pages; entries
//! are stored as individual keyed records rather than a flat byte log).

use raft::eraftpb::{Entry, HardState};

use crate::error::{BlockraftError, Result};
use crate::storage::redb_store::KvStore;

const ENTRY_PREFIX: u8 = b'e';
const HARD_STATE_KEY: &[u8] = b"hard_state";

fn entry_key(index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(ENTRY_PREFIX);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Append-only durable log of Raft entries plus the last persisted
/// `HardState`. Lives under `<data-dir>/raft-wal/`.
pub struct DurableLog {
    store: KvStore,
}

impl DurableLog {
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        let dir = data_dir.join("raft-wal");
        std::fs::create_dir_all(&dir)
            .map_err(|e| BlockraftError::Durability(format!("create raft-wal dir: {e}")))?;
        let store = KvStore::open(dir.join("wal.redb"))?;
        Ok(Self { store })
    }

    /// Append entries to the WAL. Any entry failing to persist is fatal
    /// (spec.md §7 Durability).
    pub fn append(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            let bytes = protobuf::Message::write_to_bytes(entry)?;
            batch.push((entry_key(entry.index), bytes));
        }
        self.store
            .set_many(&batch)
            .map_err(|e| BlockraftError::Durability(format!("WAL append: {e}")))
    }

    pub fn set_hard_state(&self, hs: &HardState) -> Result<()> {
        let bytes = protobuf::Message::write_to_bytes(hs)?;
        self.store
            .set(HARD_STATE_KEY, &bytes)
            .map_err(|e| BlockraftError::Durability(format!("WAL hard state: {e}")))
    }

    pub fn hard_state(&self) -> Result<Option<HardState>> {
        match self.store.get(HARD_STATE_KEY)? {
            Some(bytes) => Ok(Some(protobuf::Message::parse_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every entry in the WAL, in index order. Used at startup to replay
    /// into the in-memory Raft storage (spec.md §3 "Lifecycle").
    pub fn replay(&self) -> Result<Vec<Entry>> {
        let low = entry_key(0);
        let high = vec![ENTRY_PREFIX + 1];
        let mut out = Vec::new();
        for (_, bytes) in self.store.range(&low, &high)? {
            let entry: Entry = protobuf::Message::parse_from_bytes(&bytes)
                .map_err(|e| BlockraftError::Durability(format!("WAL corrupt entry: {e}")))?;
            out.push(entry);
        }
        Ok(out)
    }

    /// Drop entries strictly below `compact_index`, called after a
    /// snapshot makes them redundant.
    pub fn compact(&self, compact_index: u64) -> Result<()> {
        let low = entry_key(0);
        let high = entry_key(compact_index);
        let keys: Vec<Vec<u8>> = self
            .store
            .range(&low, &high)?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        self.store
            .remove_range(keys.into_iter())
            .map_err(|e| BlockraftError::Durability(format!("WAL compact: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(index: u64, term: u64) -> Entry {
        let mut e = Entry::default();
        e.index = index;
        e.term = term;
        e.data = format!("payload-{index}").into_bytes().into();
        e
    }

    #[test]
    fn replay_returns_entries_in_order() {
        let dir = TempDir::new().unwrap();
        let wal = DurableLog::open(dir.path()).unwrap();
        wal.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();

        let replayed = wal.replay().unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].index, 1);
        assert_eq!(replayed[2].index, 3);
    }

    #[test]
    fn compact_drops_entries_below_index() {
        let dir = TempDir::new().unwrap();
        let wal = DurableLog::open(dir.path()).unwrap();
        wal.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();
        wal.compact(3).unwrap();

        let replayed = wal.replay().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].index, 3);
    }

    #[test]
    fn hard_state_persists_across_open() {
        let dir = TempDir::new().unwrap();
        {
            let wal = DurableLog::open(dir.path()).unwrap();
            let mut hs = HardState::default();
            hs.term = 5;
            hs.vote = 2;
            hs.commit = 7;
            wal.set_hard_state(&hs).unwrap();
        }
        let wal = DurableLog::open(dir.path()).unwrap();
        let hs = wal.hard_state().unwrap().unwrap();
        assert_eq!(hs.term, 5);
        assert_eq!(hs.commit, 7);
    }
}
