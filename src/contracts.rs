//! Narrow capability traits standing in for the explicitly out-of-scope
//! collaborators named in spec.md §1: the blockchain engine, the minter,
//! the low-level p2p server, and the block serialization format.
//!
//! The protocol manager depends only on these traits, never on concrete
//! implementations — callers (the embedding node) provide them.

use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;

/// Opaque block handle. The protocol manager never interprets a block's
/// contents beyond its hash and parent hash; everything else is the
/// blockchain engine's concern.
pub trait Block: Clone + Send + Sync + 'static {
    /// Stable identifier for this block.
    type Hash: Clone + Eq + std::hash::Hash + Send + Sync + std::fmt::Debug + 'static;

    fn hash(&self) -> Self::Hash;
    fn parent_hash(&self) -> Self::Hash;
}

/// Canonical block encoder/decoder (spec.md §1: "Block serialization
/// format — treated as an opaque byte encoder/decoder").
pub trait BlockCodec<B: Block>: Send + Sync + 'static {
    fn encode(&self, block: &B) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<B>;
}

/// The blockchain engine's contract with the chain applier (C6).
///
/// Implementations own block validation, state transition and durable
/// block storage; the protocol manager only calls through this trait.
#[async_trait]
pub trait BlockchainHandle<B: Block>: Send + Sync + 'static {
    /// Hash of the current chain head.
    async fn current_head(&self) -> B::Hash;

    /// Whether a block with this hash is already known (for idempotent
    /// replay after a crash — spec.md §4.3).
    async fn has_block(&self, hash: &B::Hash) -> bool;

    /// Full validation of a block whose parent matches the current head.
    /// Returning `Ok(false)` means the block is invalid; per spec.md
    /// §4.3 this is a fatal condition (consensus accepted a bad block).
    async fn validate(&self, block: &B) -> Result<bool>;

    /// Insert a validated block as the new chain head. Failure is fatal.
    async fn insert(&self, block: &B) -> Result<()>;

    /// Publish an `InvalidRaftOrdering` event so the minter can re-mint
    /// (spec.md §4.3). Not an error — the expected benign case when the
    /// previous minter lost leadership mid-block.
    async fn publish_invalid_ordering(&self, block: &B);
}

/// The minter's contract with the role dispatcher (C8). The protocol
/// manager starts/stops the minter on leader/follower transitions; block
/// construction itself is entirely the minter's concern.
#[async_trait]
pub trait Minter: Send + Sync + 'static {
    async fn start(&self);
    async fn stop(&self);
}

/// The low-level p2p server's contract with the address book (C1).
///
/// `add_peer` returns the handle the p2p layer hands back once dialling
/// succeeds (spec.md §3 "Peer" = Address + that handle); the address
/// book stores it alongside the Address for later `remove_peer` calls.
#[async_trait]
pub trait P2pHandle: Send + Sync + 'static {
    /// Opaque connection handle returned once a peer is dialled.
    type Handle: Clone + Send + Sync + 'static;

    /// Dial a peer using its stable identity and network location.
    async fn add_peer(&self, address: &Address) -> Result<Self::Handle>;

    /// Drop a peer connection.
    async fn remove_peer(&self, raft_id: crate::address::RaftId) -> Result<()>;
}
