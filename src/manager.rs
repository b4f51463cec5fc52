//! Protocol manager (spec.md §2 "system overview", §6 `NodeInfo`).
//!
//! The single entry point the embedding node constructs: opens the
//! durable stores, builds the address book, and spawns the driver, the
//! role dispatcher and the two transport tasks. Grounded on
//! `ZoneConsensus`'s public surface in `node.rs` (`id`, `role`,
//! `leader_id`, `term`, `propose*`) — here split across a cheap
//! `node_info()` read and the `ProposalIntake` passthroughs, since this
//! crate's driver lives on its own task rather than behind a
//! `tokio::sync::Mutex` the caller awaits through.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::chain::ChainApplier;
use crate::config::NodeConfig;
use crate::contracts::{Block, BlockCodec, BlockchainHandle, Minter, P2pHandle};
use crate::driver::{CachedStatus, Driver, StopReason};
use crate::error::Result;
use crate::intake::ProposalIntake;
use crate::peers::{ClusterState, Peer, Role};
use crate::role::{RoleChange, RoleDispatcher};
use crate::snapshot::SnapshotManager;
use crate::storage::DurableStores;
use crate::transport::{self, RaftHttpState, TransportClient};

/// A read-only snapshot of this node's consensus status (spec.md §6
/// `NodeInfo()`). Cheap: backed entirely by atomics and the peers lock's
/// read side, never the driver's channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub raft_id: crate::address::RaftId,
    pub role: RoleChange,
    pub leader_id: Option<crate::address::RaftId>,
    pub term: u64,
    pub cluster_size: usize,
}

/// Owns the running node's background tasks and exposes the operator
/// surface named in spec.md §6: proposal submission, introspection, and
/// a graceful-shutdown handle.
pub struct ProtocolManager<B, C, P>
where
    B: Block,
    C: BlockCodec<B>,
    P: P2pHandle,
{
    intake: ProposalIntake<B, C>,
    status: Arc<CachedStatus>,
    cluster: Arc<ClusterState<P::Handle>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    transport_shutdown_tx: Option<oneshot::Sender<()>>,
    driver_task: JoinHandle<Result<StopReason>>,
    client_task: JoinHandle<()>,
    transport_task: JoinHandle<std::io::Result<()>>,
    role_task: JoinHandle<()>,
}

impl<B, C, P> ProtocolManager<B, C, P>
where
    B: Block,
    C: BlockCodec<B>,
    P: P2pHandle,
{
    /// Bring up a node: open durable storage under `config.data_dir`,
    /// restore the address book from the latest snapshot, and spawn the
    /// driver/role-dispatcher/transport tasks (spec.md §3 "Lifecycle").
    pub async fn start<BH, M>(
        config: NodeConfig,
        codec: Arc<C>,
        chain_handle: Arc<BH>,
        minter: Arc<M>,
        p2p: Arc<P>,
    ) -> Result<Self>
    where
        BH: BlockchainHandle<B>,
        M: Minter,
    {
        config.validate()?;

        let stores = DurableStores::open(&config.data_dir)?;
        let wal = Arc::new(stores.wal);
        let applied_store = Arc::new(stores.applied_index);
        let snap_store = Arc::new(stores.snapshots);
        let snapshots = Arc::new(SnapshotManager::new(
            snap_store,
            config.snapshot_entries_threshold,
        ));

        let cluster: Arc<ClusterState<P::Handle>> =
            Arc::new(ClusterState::new(config.self_address.clone()));

        // Initial peers are dialled and registered before the Raft node
        // starts (spec.md §3 "Lifecycle"), so the transport client can
        // already route to them once `StartNode(initialPeers)` runs and
        // the bootstrap `ConfState` names them as voters.
        for peer_address in &config.bootstrap_peers {
            let handle = p2p.add_peer(peer_address).await?;
            cluster.insert_peer(Peer {
                address: peer_address.clone(),
                handle,
            });
        }

        let chain = ChainApplier::new(chain_handle);
        let (intake, intake_rx) = ProposalIntake::new(codec.clone());

        let (driver, handles) = Driver::new(
            &config,
            wal,
            applied_store,
            snapshots,
            cluster.clone(),
            chain,
            codec,
            p2p,
            intake_rx,
        )?;

        let driver_task = tokio::spawn(driver.run());

        let role_dispatcher = RoleDispatcher::new(minter, cluster.clone());
        let role_task = tokio::spawn(role_dispatcher.run(handles.role_rx));

        let client = TransportClient::new(cluster.clone());
        let client_task = tokio::spawn(client.run(handles.outbound_rx));

        let (transport_shutdown_tx, transport_shutdown_rx) = oneshot::channel();
        let http_state = RaftHttpState::new(handles.step_tx, cluster.clone());
        let listen_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.raft_http_port()));
        let transport_task = tokio::spawn(transport::serve(
            listen_addr,
            http_state,
            transport_shutdown_rx,
        ));

        Ok(Self {
            intake,
            status: handles.status,
            cluster,
            shutdown_tx: Some(handles.shutdown_tx),
            transport_shutdown_tx: Some(transport_shutdown_tx),
            driver_task,
            client_task,
            transport_task,
            role_task,
        })
    }

    /// Submit a newly mined block as a Raft proposal (spec.md §4.1).
    pub async fn propose_block(&self, block: &B) -> Result<()> {
        self.intake.propose_block(block).await
    }

    /// Propose adding a peer, identified by its enode URL, to the cluster.
    pub async fn propose_peer(
        &self,
        raft_id: crate::address::RaftId,
        enode_url: &str,
    ) -> Result<()> {
        self.intake.propose_peer(raft_id, enode_url).await
    }

    /// Propose removing a peer from the cluster.
    pub async fn propose_peer_removal(&self, raft_id: crate::address::RaftId) -> Result<()> {
        self.intake.propose_peer_removal(raft_id).await
    }

    /// A cheap, lock-light read of this node's current consensus status
    /// (spec.md §6 `NodeInfo()`).
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            raft_id: self.cluster.self_raft_id(),
            role: self.status.role(),
            leader_id: self.status.leader_id(),
            term: self.status.term(),
            cluster_size: self.cluster.cluster_size(),
        }
    }

    /// Whether this node currently believes it is the minter.
    pub fn is_minter(&self) -> bool {
        self.cluster.role() == Role::Minter
    }

    /// Signal every background task to stop and wait for the driver to
    /// exit, returning why it stopped (spec.md §9 "self-evicted"
    /// redesign flag: the embedder decides whether a `SelfEvicted` result
    /// means "don't restart me").
    pub async fn stop(mut self) -> Result<StopReason> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.transport_shutdown_tx.take() {
            let _ = tx.send(());
        }

        let stop_reason = match self.driver_task.await {
            Ok(result) => result?,
            Err(e) => {
                tracing::error!(error = %e, "driver task panicked");
                StopReason::Shutdown
            }
        };

        let _ = self.client_task.await;
        let _ = self.role_task.await;
        let _ = self.transport_task.await;

        Ok(stop_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, NodeId};
    use crate::error::BlockraftError;
    use async_trait::async_trait;
    use std::net::Ipv4Addr as StdIpv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;
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

    struct TestMinter;
    #[async_trait]
    impl Minter for TestMinter {
        async fn start(&self) {}
        async fn stop(&self) {}
    }

    struct TestP2p;
    #[async_trait]
    impl P2pHandle for TestP2p {
        type Handle = ();
        async fn add_peer(&self, _address: &Address) -> Result<()> {
            Ok(())
        }
        async fn remove_peer(&self, _raft_id: crate::address::RaftId) -> Result<()> {
            Ok(())
        }
    }

    fn self_address(raft_id: crate::address::RaftId) -> Address {
        Address {
            raft_id,
            node_id: NodeId(vec![raft_id as u8]),
            ip: StdIpv4Addr::LOCALHOST,
            p2p_port: 1,
        }
    }

    fn joining_config(dir: &TempDir, raft_id: crate::address::RaftId) -> NodeConfig {
        NodeConfig {
            raft_id,
            self_address: self_address(raft_id),
            data_dir: dir.path().to_path_buf(),
            bootstrap_peers: vec![],
            joining_existing: true,
            tick_interval: Duration::from_millis(5),
            snapshot_entries_threshold: 10_000,
        }
    }

    #[tokio::test]
    async fn rejects_empty_bootstrap_list_when_not_joining() {
        let dir = TempDir::new().unwrap();
        let mut config = joining_config(&dir, 9301);
        config.joining_existing = false;

        let err = ProtocolManager::start(
            config,
            Arc::new(TestCodec),
            Arc::new(TestChain { head: Mutex::new(0) }),
            Arc::new(TestMinter),
            Arc::new(TestP2p),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BlockraftError::Configuration(_)));
    }

    #[tokio::test]
    async fn starts_and_stops_a_joining_node_cleanly() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(TestChain { head: Mutex::new(0) });

        let manager = ProtocolManager::start(
            joining_config(&dir, 9302),
            Arc::new(TestCodec),
            chain,
            Arc::new(TestMinter),
            Arc::new(TestP2p),
        )
        .await
        .unwrap();

        let info = manager.node_info();
        assert_eq!(info.raft_id, 9302);
        assert_eq!(info.cluster_size, 1);
        assert_eq!(info.role, RoleChange::Follower);
        assert!(!manager.is_minter());

        let stop_reason = manager.stop().await.unwrap();
        assert_eq!(stop_reason, StopReason::Shutdown);
    }

    #[tokio::test]
    async fn bootstrap_peers_are_registered_in_the_address_book_before_startnode() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(TestChain { head: Mutex::new(0) });
        let mut config = joining_config(&dir, 9303);
        config.joining_existing = false;
        config.bootstrap_peers = vec![Address {
            raft_id: 9304,
            node_id: NodeId(vec![9, 3, 0, 4]),
            ip: StdIpv4Addr::new(10, 0, 0, 2),
            p2p_port: 30304,
        }];

        let manager = ProtocolManager::start(
            config,
            Arc::new(TestCodec),
            chain,
            Arc::new(TestMinter),
            Arc::new(TestP2p),
        )
        .await
        .unwrap();

        // Two voters, so this lone node cannot win an election by itself;
        // what matters here is that the peer is already in the registry.
        assert_eq!(manager.node_info().cluster_size, 2);

        let stop_reason = manager.stop().await.unwrap();
        assert_eq!(stop_reason, StopReason::Shutdown);
    }
}
