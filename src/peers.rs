//! Peer registry, removed-peer tombstones, role, and the single
//! reader/writer lock protecting them (spec.md §3 "Peer registry",
//! "Removed-peer tombstone set", §5 "Shared mutable state").
//!
//! Mutated only by the Raft driver thread via [`ClusterState::add_peer`] /
//! [`ClusterState::remove_peer`]; read under the same lock by
//! introspection APIs and the transport's `IsIDRemoved` hook.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::address::{Address, RaftId};

/// A live cluster member: its address plus the p2p-layer connection handle.
#[derive(Clone)]
pub struct Peer<H> {
    pub address: Address,
    pub handle: H,
}

/// Exactly one member is minter (Raft leader) at a time (spec.md §3 "Role").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Minter,
    Verifier,
}

struct Inner<H> {
    peers: HashMap<RaftId, Peer<H>>,
    tombstones: HashSet<RaftId>,
    role: Role,
    self_address: Address,
}

/// The cluster membership view: peer registry, tombstones, and current
/// role, all behind one `RwLock` (spec.md §5).
pub struct ClusterState<H> {
    inner: RwLock<Inner<H>>,
}

impl<H: Clone> ClusterState<H> {
    pub fn new(self_address: Address) -> Self {
        Self {
            inner: RwLock::new(Inner {
                peers: HashMap::new(),
                tombstones: HashSet::new(),
                role: Role::Verifier,
                self_address,
            }),
        }
    }

    /// This node's own Raft ID.
    pub fn self_raft_id(&self) -> RaftId {
        self.inner.read().unwrap().self_address.raft_id
    }

    /// Whether `raft_id` has already been tombstoned.
    pub fn is_tombstoned(&self, raft_id: RaftId) -> bool {
        self.inner.read().unwrap().tombstones.contains(&raft_id)
    }

    /// Whether `raft_id` is already a live peer (or is this node itself).
    pub fn contains(&self, raft_id: RaftId) -> bool {
        let inner = self.inner.read().unwrap();
        raft_id == inner.self_address.raft_id || inner.peers.contains_key(&raft_id)
    }

    /// Insert a newly-dialled peer into the registry. Idempotent: the
    /// ConfChange tie-break of "AddNode for an ID already in the
    /// registry → ignore" is enforced by the caller (spec.md §4.2), not
    /// here, so this just overwrites.
    pub fn insert_peer(&self, peer: Peer<H>) {
        let mut inner = self.inner.write().unwrap();
        inner.peers.insert(peer.address.raft_id, peer);
    }

    /// Remove a peer and permanently tombstone its Raft ID. Idempotent.
    pub fn remove_peer_and_tombstone(&self, raft_id: RaftId) {
        let mut inner = self.inner.write().unwrap();
        inner.peers.remove(&raft_id);
        inner.tombstones.insert(raft_id);
    }

    pub fn peer(&self, raft_id: RaftId) -> Option<Peer<H>> {
        self.inner.read().unwrap().peers.get(&raft_id).cloned()
    }

    /// All live peers' addresses, for snapshot capture (C7).
    pub fn peer_addresses(&self) -> Vec<Address> {
        self.inner
            .read()
            .unwrap()
            .peers
            .values()
            .map(|p| p.address.clone())
            .collect()
    }

    pub fn tombstones(&self) -> HashSet<RaftId> {
        self.inner.read().unwrap().tombstones.clone()
    }

    /// Cluster size as seen by this node: live peers plus self.
    pub fn cluster_size(&self) -> usize {
        self.inner.read().unwrap().peers.len() + 1
    }

    pub fn role(&self) -> Role {
        self.inner.read().unwrap().role
    }

    pub fn set_role(&self, role: Role) {
        self.inner.write().unwrap().role = role;
    }

    /// Restore the address book and tombstone set from a loaded snapshot
    /// (spec.md §4.4 `loadSnapshot`). Peer connections must be
    /// re-established by the caller via [`Peer`] insertion afterwards —
    /// this only restores the bookkeeping, not the p2p dial.
    pub fn restore_tombstones(&self, tombstones: HashSet<RaftId>) {
        self.inner.write().unwrap().tombstones = tombstones;
    }
}
