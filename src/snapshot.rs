//! Snapshot manager (spec.md §4.4 C7).
//!
//! Captures `{confState, peerAddresses, tombstones, appliedIndex}` and
//! persists it via the low-level [`crate::storage::SnapshotStore`].
//! Triggers: forced after any applied `ConfChange`, or periodic once the
//! applied index has grown past `snapshot_entries_threshold` since the
//! last snapshot (SPEC_FULL.md A5).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use raft::eraftpb::ConfState;
use serde::{Deserialize, Serialize};

use crate::address::{Address, RaftId};
use crate::error::Result;
use crate::storage::SnapshotStore;

#[derive(Serialize, Deserialize)]
struct SnapshotPayload {
    voters: Vec<u64>,
    learners: Vec<u64>,
    peer_addresses: Vec<Address>,
    tombstones: Vec<RaftId>,
    applied_index: u64,
}

/// What a loaded snapshot restores into the address book and driver.
pub struct LoadedSnapshot {
    pub conf_state: ConfState,
    pub peer_addresses: Vec<Address>,
    pub tombstones: HashSet<RaftId>,
    pub applied_index: u64,
}

pub struct SnapshotManager {
    store: Arc<SnapshotStore>,
    threshold: u64,
    last_snapshot_index: AtomicU64,
}

impl SnapshotManager {
    pub fn new(store: Arc<SnapshotStore>, threshold: u64) -> Self {
        Self {
            store,
            threshold,
            last_snapshot_index: AtomicU64::new(0),
        }
    }

    /// Whether a snapshot should be taken now (spec.md §4.4 "Triggers").
    pub fn should_snapshot(&self, forced: bool, applied_index: u64) -> bool {
        if forced {
            return true;
        }
        let last = self.last_snapshot_index.load(Ordering::Relaxed);
        applied_index.saturating_sub(last) > self.threshold
    }

    /// Capture and durably persist a snapshot. Fatal on write failure
    /// (spec.md §7 Durability) — the error already carries
    /// `BlockraftError::Durability` from the underlying store.
    pub fn snapshot(
        &self,
        applied_index: u64,
        conf_state: &ConfState,
        peer_addresses: Vec<Address>,
        tombstones: HashSet<RaftId>,
    ) -> Result<()> {
        let payload = SnapshotPayload {
            voters: conf_state.voters.clone(),
            learners: conf_state.learners.clone(),
            peer_addresses,
            tombstones: tombstones.into_iter().collect(),
            applied_index,
        };
        let bytes = bincode::serialize(&payload)?;
        self.store.write(applied_index, &bytes)?;
        self.last_snapshot_index.store(applied_index, Ordering::Relaxed);
        Ok(())
    }

    /// Load the most recent snapshot, if any (spec.md §4.4 `loadSnapshot`).
    pub fn load_latest(&self) -> Result<Option<LoadedSnapshot>> {
        let Some((index, bytes)) = self.store.load_latest()? else {
            return Ok(None);
        };
        let payload: SnapshotPayload = bincode::deserialize(&bytes)?;
        self.last_snapshot_index.store(index, Ordering::Relaxed);

        let mut conf_state = ConfState::default();
        conf_state.voters = payload.voters;
        conf_state.learners = payload.learners;

        Ok(Some(LoadedSnapshot {
            conf_state,
            peer_addresses: payload.peer_addresses,
            tombstones: payload.tombstones.into_iter().collect(),
            applied_index: payload.applied_index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn addr(id: RaftId) -> Address {
        Address {
            raft_id: id,
            node_id: NodeId(vec![id as u8]),
            ip: Ipv4Addr::new(10, 0, 0, id as u8),
            p2p_port: 30303,
        }
    }

    #[test]
    fn forced_snapshot_always_triggers() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let manager = SnapshotManager::new(store, 10_000);
        assert!(manager.should_snapshot(true, 1));
        assert!(!manager.should_snapshot(false, 1));
    }

    #[test]
    fn periodic_snapshot_triggers_past_threshold() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let manager = SnapshotManager::new(store, 100);
        assert!(!manager.should_snapshot(false, 50));
        assert!(manager.should_snapshot(false, 201));
    }

    #[test]
    fn snapshot_round_trips_conf_state_and_address_book() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let manager = SnapshotManager::new(store, 10_000);

        let mut cs = ConfState::default();
        cs.voters = vec![1, 2, 3];
        let mut tombstones = HashSet::new();
        tombstones.insert(4);

        manager
            .snapshot(99, &cs, vec![addr(2), addr(3)], tombstones.clone())
            .unwrap();

        let loaded = manager.load_latest().unwrap().unwrap();
        assert_eq!(loaded.conf_state.voters, vec![1, 2, 3]);
        assert_eq!(loaded.applied_index, 99);
        assert_eq!(loaded.tombstones, tombstones);
        assert_eq!(loaded.peer_addresses.len(), 2);
    }
}
