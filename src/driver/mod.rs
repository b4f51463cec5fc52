//! Raft driver (spec.md §4.2 C5) — the actor that exclusively owns
//! `RawNode`.
//!
//! Single-owner actor pattern, grounded on
//! `nexus_raft::raft::node::{ZoneConsensus, ZoneConsensusDriver}`: a
//! private struct owns a non-thread-safe `RawNode`, driven by a single
//! `tokio::select!` loop over five sources — the tick timer, inbound
//! Step messages from the transport, block proposals, config-change
//! proposals, and a shutdown signal. Everything else (the proposal
//! intake API, the role-change watch channel) talks to the driver only
//! through channels.
//!
//! Volatile Raft storage is `raft::storage::MemStorage`, the library's
//! own in-memory `Storage` impl, kept separate from the durable
//! [`crate::storage::DurableLog`] so that "durable first, volatile
//! second" (spec.md §4.2 step i/ii) is a structural fact about which
//! store gets written first, not a convention to remember.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use raft::eraftpb::{ConfChange, ConfChangeType, ConfState, Entry, EntryType, Message, Snapshot};
use raft::storage::MemStorage;
use raft::{Config as RaftConfig, RawNode, StateRole};
use slog::{o, Logger};
use tokio::sync::{mpsc, oneshot, watch};

use crate::address::{Address, RaftId};
use crate::chain::ChainApplier;
use crate::config::{NodeConfig, ELECTION_TICK, HEARTBEAT_TICK, MAX_INFLIGHT_MSGS, MAX_SIZE_PER_MSG};
use crate::contracts::{Block, BlockCodec, BlockchainHandle, P2pHandle};
use crate::error::{BlockraftError, Result};
use crate::intake::{ConfChangeProposal, ConfChangeRequest, IntakeReceivers};
use crate::peers::{ClusterState, Peer};
use crate::role::RoleChange;
use crate::snapshot::SnapshotManager;
use crate::storage::{AppliedIndexStore, DurableLog};

/// A Raft message addressed to a specific peer, handed to the transport
/// client for delivery (spec.md §4.5).
pub struct OutboundMessage {
    pub to: RaftId,
    pub message: Message,
}

/// Why the driver's event loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown channel fired or the transport layer was dropped.
    Shutdown,
    /// This node applied a `RemoveNode` targeting its own Raft ID
    /// (spec.md §9 redesign flag: communicated back via this return
    /// value rather than calling `process::exit` inside the driver).
    SelfEvicted,
}

/// The handles the rest of the node needs to talk to the driver, handed
/// back alongside the [`Driver`] itself by [`Driver::new`].
pub struct DriverHandles {
    /// Feed inbound Raft messages from the transport server.
    pub step_tx: mpsc::Sender<Message>,
    /// Role transitions, for [`crate::role::RoleDispatcher`].
    pub role_rx: watch::Receiver<RoleChange>,
    /// Outgoing messages, drained by the transport client.
    pub outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    /// Signal the driver to stop.
    pub shutdown_tx: oneshot::Sender<()>,
    /// Cached status, updated by the driver after each `advance()`.
    /// Lets `NodeInfo()` read role/leader/term without touching the
    /// driver's channels or the peers lock (SPEC_FULL.md SUPPLEMENT).
    pub status: Arc<CachedStatus>,
}

const ROLE_FOLLOWER: u8 = 0;
const ROLE_CANDIDATE: u8 = 1;
const ROLE_LEADER: u8 = 2;

/// Atomic snapshot of the driver's role/leader/term, safe to read from
/// any thread without going through the driver's channels.
pub struct CachedStatus {
    role: AtomicU8,
    leader_id: AtomicU64,
    term: AtomicU64,
}

impl CachedStatus {
    fn new() -> Self {
        Self {
            role: AtomicU8::new(ROLE_FOLLOWER),
            leader_id: AtomicU64::new(0),
            term: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> RoleChange {
        match self.role.load(Ordering::Relaxed) {
            ROLE_LEADER => RoleChange::Leader,
            ROLE_CANDIDATE => RoleChange::Candidate,
            _ => RoleChange::Follower,
        }
    }

    pub fn leader_id(&self) -> Option<RaftId> {
        match self.leader_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id as RaftId),
        }
    }

    pub fn term(&self) -> u64 {
        self.term.load(Ordering::Relaxed)
    }
}

pub struct Driver<B, C, BH, P>
where
    B: Block,
    C: BlockCodec<B>,
    BH: BlockchainHandle<B>,
    P: P2pHandle,
{
    raw_node: RawNode<MemStorage>,
    wal: Arc<DurableLog>,
    applied_store: Arc<AppliedIndexStore>,
    snapshots: Arc<SnapshotManager>,
    cluster: Arc<ClusterState<P::Handle>>,
    chain: ChainApplier<B, BH>,
    codec: Arc<C>,
    p2p: Arc<P>,
    conf_state: ConfState,

    step_rx: mpsc::Receiver<Message>,
    block_rx: mpsc::Receiver<crate::intake::BlockProposal>,
    conf_change_rx: mpsc::Receiver<ConfChangeProposal>,
    shutdown_rx: oneshot::Receiver<()>,

    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    role_tx: watch::Sender<RoleChange>,
    last_role: RoleChange,
    status: Arc<CachedStatus>,

    tick_interval: Duration,
    pending_conf_changes: HashMap<RaftId, oneshot::Sender<Result<()>>>,
}

impl<B, C, BH, P> Driver<B, C, BH, P>
where
    B: Block,
    C: BlockCodec<B>,
    BH: BlockchainHandle<B>,
    P: P2pHandle,
{
    /// Build the driver, replaying durable state per spec.md §3
    /// "Lifecycle": a loaded snapshot (if any) restores `ConfState` and
    /// the address book's tombstones first, then the WAL is replayed on
    /// top of it. A node bootstrapping a fresh cluster sets the initial
    /// voter set from `bootstrap_peers`; a node joining an existing one
    /// starts with an empty `ConfState` and waits to be added.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_config: &NodeConfig,
        wal: Arc<DurableLog>,
        applied_store: Arc<AppliedIndexStore>,
        snapshots: Arc<SnapshotManager>,
        cluster: Arc<ClusterState<P::Handle>>,
        chain: ChainApplier<B, BH>,
        codec: Arc<C>,
        p2p: Arc<P>,
        intake: IntakeReceivers,
    ) -> Result<(Self, DriverHandles)> {
        let storage = MemStorage::new();
        let mut applied = applied_store.get()?;
        let mut conf_state = ConfState::default();

        let loaded = snapshots.load_latest()?;
        if let Some(snap) = loaded {
            let mut raft_snapshot = Snapshot::default();
            raft_snapshot.mut_metadata().index = snap.applied_index;
            raft_snapshot.mut_metadata().set_conf_state(snap.conf_state.clone());
            storage.wl().apply_snapshot(raft_snapshot)?;
            cluster.restore_tombstones(snap.tombstones);
            conf_state = snap.conf_state;
            applied = applied.max(snap.applied_index);
        }

        let replayed = wal.replay()?;
        if !replayed.is_empty() {
            storage.wl().append(&replayed)?;
        }
        if let Some(hs) = wal.hard_state()? {
            storage.wl().set_hardstate(hs);
        }

        if conf_state.voters.is_empty() && replayed.is_empty() && !node_config.joining_existing {
            let mut voters = vec![node_config.raft_id as u64];
            voters.extend(node_config.bootstrap_peers.iter().map(|a| a.raft_id as u64));
            conf_state.voters = voters;
            storage.wl().set_conf_state(conf_state.clone());
        }

        let raft_config = RaftConfig {
            id: node_config.raft_id as u64,
            election_tick: ELECTION_TICK,
            heartbeat_tick: HEARTBEAT_TICK,
            max_size_per_msg: MAX_SIZE_PER_MSG,
            max_inflight_msgs: MAX_INFLIGHT_MSGS,
            applied,
            ..Default::default()
        };

        // raft-rs wants a slog logger; this crate logs through tracing,
        // so raft-rs's own internal logging is discarded.
        let logger = Logger::root(slog::Discard, o!());
        let raw_node = RawNode::new(&raft_config, storage, &logger)?;

        let (step_tx, step_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (role_tx, role_rx) = watch::channel(RoleChange::Follower);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let status = Arc::new(CachedStatus::new());

        let IntakeReceivers { block_rx, conf_change_rx } = intake;

        let driver = Self {
            raw_node,
            wal,
            applied_store,
            snapshots,
            cluster,
            chain,
            codec,
            p2p,
            conf_state,
            step_rx,
            block_rx,
            conf_change_rx,
            shutdown_rx,
            outbound_tx,
            role_tx,
            last_role: RoleChange::Follower,
            status: status.clone(),
            tick_interval: node_config.tick_interval,
            pending_conf_changes: HashMap::new(),
        };

        Ok((
            driver,
            DriverHandles {
                step_tx,
                role_rx,
                outbound_rx,
                shutdown_tx,
                status,
            },
        ))
    }

    /// Run the event loop until a shutdown signal fires, the transport
    /// layer is dropped, or this node evicts itself.
    pub async fn run(mut self) -> Result<StopReason> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.raw_node.tick();
                }
                msg = self.step_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.raw_node.step(msg) {
                                tracing::warn!(error = %e, "raft step rejected");
                            }
                        }
                        None => return Ok(StopReason::Shutdown),
                    }
                }
                proposal = self.block_rx.recv() => {
                    match proposal {
                        Some(proposal) => {
                            let result = self
                                .raw_node
                                .propose(vec![], proposal.bytes)
                                .map_err(|e| self.map_propose_err(e));
                            let _ = proposal.tx.send(result);
                        }
                        None => return Ok(StopReason::Shutdown),
                    }
                }
                proposal = self.conf_change_rx.recv() => {
                    match proposal {
                        Some(proposal) => self.handle_conf_change_proposal(proposal)?,
                        None => return Ok(StopReason::Shutdown),
                    }
                }
                _ = &mut self.shutdown_rx => {
                    return Ok(StopReason::Shutdown);
                }
            }

            if let Some(stop) = self.drain_ready().await? {
                return Ok(stop);
            }
        }
    }

    /// Process one `Ready` batch, in the order spec.md §4.2 fixes:
    /// persist to the durable WAL, durably snapshot an incoming
    /// InstallSnapshot (if any) before mirroring it into volatile storage,
    /// mirror entries into volatile storage, ship outbound messages, apply
    /// committed entries, maybe snapshot, check for self-eviction, then
    /// advance.
    async fn drain_ready(&mut self) -> Result<Option<StopReason>> {
        if !self.raw_node.has_ready() {
            return Ok(None);
        }
        let mut ready = self.raw_node.ready();

        if !ready.entries().is_empty() {
            self.wal.append(ready.entries())?;
        }
        if let Some(hs) = ready.hs() {
            self.wal.set_hard_state(hs)?;
        }

        // A snapshot in the batch is written to the durable snapshot
        // directory, and the durable applied index advanced to its
        // index, before it (or any entry) is appended to the in-memory
        // Raft storage (spec.md §4.2(i)): otherwise a restart between
        // these writes would see an applied index with no matching
        // durable snapshot to load it from.
        if !ready.snapshot().is_empty() {
            let snapshot = ready.snapshot().clone();
            let index = snapshot.get_metadata().index;
            let conf_state = snapshot.get_metadata().get_conf_state().clone();
            self.snapshots.snapshot(
                index,
                &conf_state,
                self.cluster.peer_addresses(),
                self.cluster.tombstones(),
            )?;
            self.applied_store.set(index)?;
            self.raw_node.mut_store().wl().apply_snapshot(snapshot)?;
            self.conf_state = conf_state;
        }

        if !ready.entries().is_empty() {
            self.raw_node.mut_store().wl().append(ready.entries())?;
        }
        if let Some(hs) = ready.hs() {
            self.raw_node.mut_store().wl().set_hardstate(hs.clone());
        }

        for msg in ready.take_messages() {
            self.ship(msg);
        }

        let mut stop = None;
        let committed = ready.take_committed_entries();
        if !committed.is_empty() {
            stop = self.apply_entries(committed).await?;
        }

        let mut light_rd = self.raw_node.advance(ready);
        for msg in light_rd.take_messages() {
            self.ship(msg);
        }
        if stop.is_none() && !light_rd.committed_entries().is_empty() {
            stop = self.apply_entries(light_rd.take_committed_entries()).await?;
        }
        self.raw_node.advance_apply();

        self.maybe_snapshot()?;

        self.broadcast_role_change();

        Ok(stop)
    }

    fn ship(&self, message: Message) {
        let to = message.to as RaftId;
        let _ = self.outbound_tx.send(OutboundMessage { to, message });
    }

    /// Apply a batch of committed entries, enforcing the `entriesToApply`
    /// contract: the batch must not skip past the applied index, and is
    /// trimmed to start exactly after it (spec.md §4.2).
    async fn apply_entries(&mut self, entries: Vec<Entry>) -> Result<Option<StopReason>> {
        let applied_before = self.applied_store.get()?;
        let entries = entries_to_apply(&entries, applied_before)?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut stop = None;

        for entry in entries {
            let index = entry.index;
            if entry.data.is_empty() {
                self.applied_store.set(index)?;
                continue;
            }

            match entry.get_entry_type() {
                EntryType::EntryNormal => {
                    let block = self.codec.decode(&entry.data)?;
                    self.chain.apply_new_chain_head(block).await?;
                    self.applied_store.set(index)?;
                }
                EntryType::EntryConfChange => {
                    let cc: ConfChange = protobuf::Message::parse_from_bytes(&entry.data)?;
                    if let Some(s) = self.apply_conf_change(cc).await? {
                        stop = Some(s);
                    }
                    // A snapshot reflecting the new confState must be
                    // durable before the applied index advances past this
                    // entry (spec.md §4.2(iv)/§8): a crash in between would
                    // have the restarted node replay from the new index
                    // with the old confState, losing the membership change.
                    self.snapshots.snapshot(
                        index,
                        &self.conf_state,
                        self.cluster.peer_addresses(),
                        self.cluster.tombstones(),
                    )?;
                    self.wal.compact(index)?;
                    let _ = self.raw_node.mut_store().wl().compact(index);
                    self.applied_store.set(index)?;
                }
                EntryType::EntryConfChangeV2 => {
                    return Err(BlockraftError::InvariantViolation(
                        "joint-consensus ConfChangeV2 entries are not supported".into(),
                    ));
                }
            }
        }

        Ok(stop)
    }

    /// Apply a committed `ConfChange`, enforcing spec.md §4.2's tie-break
    /// rules. Rejected changes are simply never handed to
    /// `RawNode::apply_conf_change`, which is raft-rs's documented way
    /// of leaving the membership unchanged despite the entry committing.
    async fn apply_conf_change(&mut self, cc: ConfChange) -> Result<Option<StopReason>> {
        let target = cc.node_id as RaftId;

        match cc.get_change_type() {
            ConfChangeType::AddNode => {
                // A node's own Raft ID is never entered into its peer
                // registry (that registry covers every member other than
                // self), so `cluster.contains` can't tell "already a
                // voter" from "this is the entry that makes me one" for a
                // self-targeted change. Distinguish them via `conf_state`
                // directly: a joining node's first AddNode(self) hasn't
                // recorded itself as a voter yet and must still reach
                // `RawNode::apply_conf_change`, or it can never become a
                // voter at all.
                let is_self = target == self.cluster.self_raft_id();
                let already_self_voter = is_self && self.conf_state.voters.contains(&cc.node_id);

                if self.cluster.is_tombstoned(target)
                    || self.cluster.peer(target).is_some()
                    || already_self_voter
                {
                    self.resolve_conf_change(
                        target,
                        Err(BlockraftError::Configuration(format!(
                            "peer {target} is already registered or was permanently removed"
                        ))),
                    );
                    return Ok(None);
                }

                let cs = self.raw_node.apply_conf_change(&cc)?;
                self.raw_node.mut_store().wl().set_conf_state(cs.clone());
                self.conf_state = cs;

                if !is_self {
                    let address = Address::decode(&cc.context)?;
                    let handle = self.p2p.add_peer(&address).await?;
                    self.cluster.insert_peer(Peer { address, handle });
                }
                self.resolve_conf_change(target, Ok(()));
                Ok(None)
            }
            ConfChangeType::RemoveNode => {
                let is_self = target == self.cluster.self_raft_id();

                let cs = self.raw_node.apply_conf_change(&cc)?;
                self.raw_node.mut_store().wl().set_conf_state(cs.clone());
                self.conf_state = cs;

                self.cluster.remove_peer_and_tombstone(target);
                let _ = self.p2p.remove_peer(target).await;
                self.resolve_conf_change(target, Ok(()));

                if is_self {
                    tracing::warn!(raft_id = target, "this node was removed from the cluster");
                    Ok(Some(StopReason::SelfEvicted))
                } else {
                    Ok(None)
                }
            }
            ConfChangeType::AddLearnerNode => Err(BlockraftError::InvariantViolation(
                "learner nodes are not supported".into(),
            )),
        }
    }

    fn resolve_conf_change(&mut self, target: RaftId, result: Result<()>) {
        if let Some(tx) = self.pending_conf_changes.remove(&target) {
            let _ = tx.send(result);
        }
    }

    fn handle_conf_change_proposal(&mut self, proposal: ConfChangeProposal) -> Result<()> {
        let (raft_id, cc) = match proposal.request {
            ConfChangeRequest::AddNode { address } => {
                let mut cc = ConfChange::default();
                cc.change_type = ConfChangeType::AddNode;
                cc.node_id = address.raft_id as u64;
                cc.context = address.encode().into();
                (address.raft_id, cc)
            }
            ConfChangeRequest::RemoveNode { raft_id } => {
                let mut cc = ConfChange::default();
                cc.change_type = ConfChangeType::RemoveNode;
                cc.node_id = raft_id as u64;
                (raft_id, cc)
            }
        };

        match self.raw_node.propose_conf_change(vec![], cc) {
            Ok(()) => {
                self.pending_conf_changes.insert(raft_id, proposal.tx);
            }
            Err(e) => {
                let _ = proposal.tx.send(Err(self.map_propose_err(e)));
            }
        }
        Ok(())
    }

    /// A proposal raft-rs drops because no leader is currently known
    /// (spec.md §4.1 "no leader within the caller's timeout") is surfaced
    /// as `NotLeader` with this node's best-known leader hint, rather than
    /// the generic `Raft` error every other rejection maps to.
    fn map_propose_err(&self, err: raft::Error) -> BlockraftError {
        match err {
            raft::Error::ProposalDropped => BlockraftError::NotLeader {
                leader_hint: match self.raw_node.raft.leader_id {
                    0 => None,
                    id => Some(id as RaftId),
                },
            },
            other => BlockraftError::from(other),
        }
    }

    /// Periodic snapshot once the applied index has grown past the
    /// configured threshold since the last one (spec.md §4.4). The forced
    /// post-ConfChange trigger is handled inline in `apply_entries`, where
    /// it can run before that entry's applied index is persisted.
    fn maybe_snapshot(&mut self) -> Result<()> {
        let applied = self.applied_store.get()?;
        if !self.snapshots.should_snapshot(false, applied) {
            return Ok(());
        }

        self.snapshots.snapshot(
            applied,
            &self.conf_state,
            self.cluster.peer_addresses(),
            self.cluster.tombstones(),
        )?;
        self.wal.compact(applied)?;
        let _ = self.raw_node.mut_store().wl().compact(applied);
        Ok(())
    }

    fn broadcast_role_change(&mut self) {
        let role = match self.raw_node.raft.state {
            StateRole::Leader => RoleChange::Leader,
            StateRole::Candidate | StateRole::PreCandidate => RoleChange::Candidate,
            StateRole::Follower => RoleChange::Follower,
        };

        let role_byte = match role {
            RoleChange::Leader => ROLE_LEADER,
            RoleChange::Candidate => ROLE_CANDIDATE,
            RoleChange::Follower => ROLE_FOLLOWER,
        };
        self.status.role.store(role_byte, Ordering::Relaxed);
        self.status
            .leader_id
            .store(self.raw_node.raft.leader_id, Ordering::Relaxed);
        self.status.term.store(self.raw_node.raft.term, Ordering::Relaxed);

        if role != self.last_role {
            self.last_role = role;
            let _ = self.role_tx.send(role);
        }
    }
}

/// etcd's `entriesToApply`: reject a batch that skips past `applied`
/// (spec.md §4.2 `entriesToApply` contract, an unrecoverable invariant
/// violation), and trim a batch that overlaps it so the suffix starts
/// exactly at `applied + 1`.
fn entries_to_apply(entries: &[Entry], applied: u64) -> Result<Vec<Entry>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let first = entries[0].index;
    if first > applied + 1 {
        return Err(BlockraftError::InvariantViolation(format!(
            "committed entries start at index {first}, which skips past applied index {applied}"
        )));
    }
    if applied >= first {
        let skip = (applied - first + 1) as usize;
        Ok(entries.get(skip..).unwrap_or_default().to_vec())
    } else {
        Ok(entries.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeId;
    use crate::intake::{BlockProposal, ProposalIntake};
    use crate::storage::SnapshotStore;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, PartialEq, Eq, Debug)]
    struct TestBlock {
        hash: u64,
        parent: u64,
    }
    impl Block for TestBlock {
        type Hash = u64;
        fn hash(&self) -> u64 {
            self.hash
        }
        fn parent_hash(&self) -> u64 {
            self.parent
        }
    }

    struct TestCodec;
    impl BlockCodec<TestBlock> for TestCodec {
        fn encode(&self, block: &TestBlock) -> Result<Vec<u8>> {
            let mut bytes = Vec::with_capacity(16);
            bytes.extend_from_slice(&block.hash.to_be_bytes());
            bytes.extend_from_slice(&block.parent.to_be_bytes());
            Ok(bytes)
        }
        fn decode(&self, bytes: &[u8]) -> Result<TestBlock> {
            Ok(TestBlock {
                hash: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
                parent: u64::from_be_bytes(bytes[8..16].try_into().unwrap()),
            })
        }
    }

    struct TestChain {
        head: Mutex<u64>,
    }
    #[async_trait]
    impl BlockchainHandle<TestBlock> for TestChain {
        async fn current_head(&self) -> u64 {
            *self.head.lock().unwrap()
        }
        async fn has_block(&self, _hash: &u64) -> bool {
            false
        }
        async fn validate(&self, _block: &TestBlock) -> Result<bool> {
            Ok(true)
        }
        async fn insert(&self, block: &TestBlock) -> Result<()> {
            *self.head.lock().unwrap() = block.hash;
            Ok(())
        }
        async fn publish_invalid_ordering(&self, _block: &TestBlock) {}
    }

    struct TestP2p;
    #[async_trait]
    impl P2pHandle for TestP2p {
        type Handle = ();
        async fn add_peer(&self, _address: &Address) -> Result<()> {
            Ok(())
        }
        async fn remove_peer(&self, _raft_id: RaftId) -> Result<()> {
            Ok(())
        }
    }

    fn self_address() -> Address {
        Address {
            raft_id: 1,
            node_id: NodeId(vec![1]),
            ip: Ipv4Addr::LOCALHOST,
            p2p_port: 1,
        }
    }

    fn test_driver(
        dir: &TempDir,
    ) -> (
        Driver<TestBlock, TestCodec, TestChain, TestP2p>,
        Arc<TestChain>,
        Arc<ClusterState<()>>,
        DriverHandles,
    ) {
        let wal = Arc::new(DurableLog::open(dir.path()).unwrap());
        let applied_store = Arc::new(AppliedIndexStore::open(dir.path()).unwrap());
        let snap_store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let snapshots = Arc::new(SnapshotManager::new(snap_store, 10_000));
        let cluster = Arc::new(ClusterState::new(self_address()));
        let test_chain = Arc::new(TestChain { head: Mutex::new(0) });
        let chain = ChainApplier::new(test_chain.clone());

        let node_config = NodeConfig {
            raft_id: 1,
            self_address: self_address(),
            data_dir: dir.path().to_path_buf(),
            bootstrap_peers: vec![],
            joining_existing: false,
            tick_interval: Duration::from_millis(10),
            snapshot_entries_threshold: 10_000,
        };

        let (_intake, receivers) = ProposalIntake::new(Arc::new(TestCodec));
        let (driver, handles) = Driver::new(
            &node_config,
            wal,
            applied_store,
            snapshots,
            cluster.clone(),
            chain,
            Arc::new(TestCodec),
            Arc::new(TestP2p),
            receivers,
        )
        .unwrap();

        (driver, test_chain, cluster, handles)
    }

    #[tokio::test]
    async fn single_voter_cluster_commits_and_applies_proposed_block() {
        let dir = TempDir::new().unwrap();
        let (mut driver, chain, _cluster, _handles) = test_driver(&dir);

        driver.raw_node.campaign().unwrap();
        driver.drain_ready().await.unwrap();
        assert_eq!(driver.raw_node.raft.state, StateRole::Leader);

        let bytes = TestCodec.encode(&TestBlock { hash: 1, parent: 0 }).unwrap();
        driver.raw_node.propose(vec![], bytes).unwrap();
        driver.drain_ready().await.unwrap();

        assert_eq!(*chain.head.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn add_node_targeting_self_is_rejected_not_fatal() {
        let dir = TempDir::new().unwrap();
        let (mut driver, _chain, cluster, _handles) = test_driver(&dir);

        driver.raw_node.campaign().unwrap();
        driver.drain_ready().await.unwrap();

        let (tx, rx) = oneshot::channel();
        driver
            .handle_conf_change_proposal(ConfChangeProposal {
                request: ConfChangeRequest::AddNode {
                    address: self_address(),
                },
                tx,
            })
            .unwrap();
        driver.drain_ready().await.unwrap();

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(BlockraftError::Configuration(_))));
        assert_eq!(cluster.cluster_size(), 1);
    }

    #[test]
    fn entries_to_apply_rejects_gap_past_applied() {
        let mut e = Entry::default();
        e.index = 5;
        let err = entries_to_apply(&[e], 2).unwrap_err();
        assert!(crate::error::is_fatal(&err));
    }

    #[test]
    fn entries_to_apply_trims_overlap_with_applied() {
        let entries: Vec<Entry> = (1..=3)
            .map(|i| {
                let mut e = Entry::default();
                e.index = i;
                e
            })
            .collect();
        let trimmed = entries_to_apply(&entries, 1).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].index, 2);
    }

    #[tokio::test]
    async fn closing_step_channel_shuts_down_run_loop() {
        let dir = TempDir::new().unwrap();
        let (driver, _chain, _cluster, handles) = test_driver(&dir);
        drop(handles.step_tx);
        drop(handles.shutdown_tx);
        let stop = driver.run().await.unwrap();
        assert_eq!(stop, StopReason::Shutdown);
    }

    #[allow(unused)]
    fn _unused_block_proposal_type_check(_: BlockProposal) {}
}
