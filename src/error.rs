//! Error taxonomy for the protocol manager.
//!
//! Mirrors spec.md §7: configuration errors and transient-consensus
//! errors are returned to the caller; durability and invariant-violation
//! errors are fatal and expected to abort the process.

use thiserror::Error;

/// Errors produced by the protocol manager and its components.
#[derive(Debug, Error)]
pub enum BlockraftError {
    /// Malformed enode string, non-IPv4 address, or an empty bootstrap list.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No leader within the caller's timeout.
    #[error("not leader (leader hint: {leader_hint:?})")]
    NotLeader {
        /// Best-known leader, if any.
        leader_hint: Option<u16>,
    },

    /// The proposal buffer is full; the caller should retry.
    #[error("propose buffer full")]
    ProposeBufferFull,

    /// Address is not a valid IPv4 address, or the enode string is malformed.
    #[error("bad address: {0}")]
    BadAddress(String),

    /// A Raft WAL append, snapshot write, or applied-index write failed.
    /// Fatal: the process must abort, since durability before shipping
    /// messages is the one invariant the rest of the cluster relies on.
    #[error("durability failure: {0}")]
    Durability(String),

    /// Consensus has committed something the rest of the system cannot
    /// make sense of: an index gap in `entriesToApply`, an unsupported
    /// `UpdateNode`, a validated-bad block, or a chain-insert failure.
    /// Fatal: disagreement after commit means the cluster has diverged.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The underlying Raft library rejected an operation.
    #[error("raft error: {0}")]
    Raft(String),

    /// Embedded-storage (redb) failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Protobuf encode/decode failure (Raft wire types).
    #[error("protobuf error: {0}")]
    Protobuf(String),

    /// The driver's internal channel was closed (driver task exited).
    #[error("driver channel closed")]
    ChannelClosed,
}

impl From<redb::DatabaseError> for BlockraftError {
    fn from(e: redb::DatabaseError) -> Self {
        BlockraftError::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for BlockraftError {
    fn from(e: redb::TransactionError) -> Self {
        BlockraftError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for BlockraftError {
    fn from(e: redb::TableError) -> Self {
        BlockraftError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for BlockraftError {
    fn from(e: redb::CommitError) -> Self {
        BlockraftError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for BlockraftError {
    fn from(e: redb::StorageError) -> Self {
        BlockraftError::Storage(e.to_string())
    }
}

impl From<protobuf::ProtobufError> for BlockraftError {
    fn from(e: protobuf::ProtobufError) -> Self {
        BlockraftError::Protobuf(e.to_string())
    }
}

impl From<raft::Error> for BlockraftError {
    fn from(e: raft::Error) -> Self {
        BlockraftError::Raft(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BlockraftError>;

/// Whether an error represents an unrecoverable invariant/durability
/// violation that the embedder should treat as fatal (log loudly, abort).
pub fn is_fatal(err: &BlockraftError) -> bool {
    matches!(
        err,
        BlockraftError::Durability(_) | BlockraftError::InvariantViolation(_)
    )
}
