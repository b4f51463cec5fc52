//! Proposal intake (spec.md §4.1 C4).
//!
//! Two single-producer-per-caller channels: mined-block proposals and
//! membership-change proposals. Grounded on
//! `nexus_raft::raft::node::{ZoneConsensus::propose, ZoneConsensus::propose_conf_change}`
//! (oneshot-per-call, the driver resolves it once the entry commits).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::address::{Address, RaftId};
use crate::contracts::{Block, BlockCodec};
use crate::error::{BlockraftError, Result};

/// A pending block proposal handed to the driver, along with a completion
/// channel resolved once the driver has accepted (or rejected) it.
pub struct BlockProposal {
    pub bytes: Vec<u8>,
    pub tx: oneshot::Sender<Result<()>>,
}

/// The kind of membership change requested.
pub enum ConfChangeRequest {
    AddNode { address: Address },
    RemoveNode { raft_id: RaftId },
}

/// A pending config-change proposal handed to the driver, along with a
/// completion channel resolved once the change is committed and applied.
pub struct ConfChangeProposal {
    pub request: ConfChangeRequest,
    pub tx: oneshot::Sender<Result<()>>,
}

/// The operator-facing intake surface (spec.md §6 "Proposal API").
///
/// Cloneable: callers submit from any task; the driver is the sole
/// consumer of both channels.
#[derive(Clone)]
pub struct ProposalIntake<B: Block, C: BlockCodec<B>> {
    codec: Arc<C>,
    block_tx: mpsc::Sender<BlockProposal>,
    conf_change_tx: mpsc::Sender<ConfChangeProposal>,
    _marker: std::marker::PhantomData<B>,
}

/// The driver-facing halves of the two channels.
pub struct IntakeReceivers {
    pub block_rx: mpsc::Receiver<BlockProposal>,
    pub conf_change_rx: mpsc::Receiver<ConfChangeProposal>,
}

/// Channel capacity for the block-proposal queue. A full channel causes
/// `ProposeBlock` to report `ProposeBufferFull` rather than blocking
/// forever (spec.md §7 "Transient consensus").
const BLOCK_CHANNEL_CAPACITY: usize = 64;
const CONF_CHANGE_CHANNEL_CAPACITY: usize = 16;

impl<B: Block, C: BlockCodec<B>> ProposalIntake<B, C> {
    pub fn new(codec: Arc<C>) -> (Self, IntakeReceivers) {
        let (block_tx, block_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let (conf_change_tx, conf_change_rx) = mpsc::channel(CONF_CHANGE_CHANNEL_CAPACITY);
        (
            Self {
                codec,
                block_tx,
                conf_change_tx,
                _marker: std::marker::PhantomData,
            },
            IntakeReceivers {
                block_rx,
                conf_change_rx,
            },
        )
    }

    /// Encode `block` with the blockchain's canonical encoder and submit
    /// it as a Raft proposal. Returns once the driver has accepted it
    /// (not once it has committed) — `NotLeader` if there's currently no
    /// leader to accept it, `ProposeBufferFull` if the driver hasn't
    /// drained the channel in time (spec.md §4.1).
    pub async fn propose_block(&self, block: &B) -> Result<()> {
        let bytes = self.codec.encode(block)?;
        let (tx, rx) = oneshot::channel();
        self.block_tx
            .try_send(BlockProposal { bytes, tx })
            .map_err(|_| BlockraftError::ProposeBufferFull)?;
        rx.await.map_err(|_| BlockraftError::ChannelClosed)?
    }

    /// Build an `AddNode` ConfChange carrying the encoded Address as
    /// context, and submit it. Resolves once the change is committed and
    /// applied (spec.md §4.1).
    pub async fn propose_peer(&self, raft_id: RaftId, enode_url: &str) -> Result<()> {
        let address = Address::parse_enode(raft_id, enode_url)?;
        let (tx, rx) = oneshot::channel();
        self.conf_change_tx
            .send(ConfChangeProposal {
                request: ConfChangeRequest::AddNode { address },
                tx,
            })
            .await
            .map_err(|_| BlockraftError::ChannelClosed)?;
        rx.await.map_err(|_| BlockraftError::ChannelClosed)?
    }

    pub async fn propose_peer_removal(&self, raft_id: RaftId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.conf_change_tx
            .send(ConfChangeProposal {
                request: ConfChangeRequest::RemoveNode { raft_id },
                tx,
            })
            .await
            .map_err(|_| BlockraftError::ChannelClosed)?;
        rx.await.map_err(|_| BlockraftError::ChannelClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Debug)]
    struct TestBlock(u64);
    impl Block for TestBlock {
        type Hash = u64;
        fn hash(&self) -> u64 {
            self.0
        }
        fn parent_hash(&self) -> u64 {
            self.0.saturating_sub(1)
        }
    }

    struct PassthroughCodec;
    impl BlockCodec<TestBlock> for PassthroughCodec {
        fn encode(&self, block: &TestBlock) -> Result<Vec<u8>> {
            Ok(block.0.to_be_bytes().to_vec())
        }
        fn decode(&self, bytes: &[u8]) -> Result<TestBlock> {
            Ok(TestBlock(u64::from_be_bytes(bytes.try_into().unwrap())))
        }
    }

    #[tokio::test]
    async fn propose_block_encodes_and_sends() {
        let (intake, mut rx) = ProposalIntake::new(Arc::new(PassthroughCodec));
        let submit = tokio::spawn(async move { intake.propose_block(&TestBlock(7)).await });

        let proposal = rx.block_rx.recv().await.unwrap();
        assert_eq!(proposal.bytes, 7u64.to_be_bytes().to_vec());
        proposal.tx.send(Ok(())).unwrap();

        submit.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn propose_block_surfaces_driver_rejection() {
        let (intake, mut rx) = ProposalIntake::new(Arc::new(PassthroughCodec));
        let submit = tokio::spawn(async move { intake.propose_block(&TestBlock(7)).await });

        let proposal = rx.block_rx.recv().await.unwrap();
        proposal
            .tx
            .send(Err(BlockraftError::NotLeader { leader_hint: None }))
            .unwrap();

        let err = submit.await.unwrap().unwrap_err();
        assert!(matches!(err, BlockraftError::NotLeader { .. }));
    }

    #[tokio::test]
    async fn propose_peer_rejects_malformed_enode() {
        let (intake, _rx) = ProposalIntake::new(Arc::new(PassthroughCodec));
        let err = intake.propose_peer(2, "not-an-enode").await.unwrap_err();
        assert!(matches!(err, BlockraftError::BadAddress(_)));
    }
}
