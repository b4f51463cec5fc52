//! blockraft: a Raft-driven block ordering core for a permissioned
//! blockchain node.
//!
//! This crate owns exactly one thing: the order in which blocks are
//! appended to the chain, agreed on by a cluster of nodes via
//! tikv/raft-rs. Everything it touches — the blockchain engine, the
//! block miner, the p2p network, configuration loading, the block
//! format — is an external collaborator, modeled here as a narrow trait
//! ([`contracts`]) the embedder implements.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  ProtocolManager                                                │
//! │                                                                  │
//! │  ┌────────────┐   propose   ┌───────────────────────────────┐   │
//! │  │  intake    │ ──────────► │  driver (owns RawNode)        │   │
//! │  │ (C4.1)     │             │  tick / step / propose / quit  │   │
//! │  └────────────┘             └───────────┬───────────────────┘   │
//! │                                          │ Ready                │
//! │                       ┌──────────────────┼────────────────┐     │
//! │                       ▼                  ▼                ▼     │
//! │                 durable WAL       chain applier     role watch  │
//! │                 (storage/)        (C4.3)             (C4.6)     │
//! │                                                                  │
//! │                  outbound messages ──► transport client (C4.5)  │
//! │                  inbound HTTP ────────► transport server (C4.5) │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manager`]: [`manager::ProtocolManager`], the entry point.
//! - [`driver`]: the single-owner Raft actor and its event loop.
//! - [`contracts`]: the traits the embedder implements (`Block`,
//!   `BlockCodec`, `BlockchainHandle`, `Minter`, `P2pHandle`).
//! - [`chain`]: applies committed blocks to the chain.
//! - [`peers`]: address book, peer registry, tombstones, role.
//! - [`snapshot`]: periodic/forced snapshot capture and restore.
//! - [`storage`]: durable WAL, snapshot directory, applied-index store.
//! - [`transport`]: the plain-HTTP Raft wire transport.
//! - [`intake`]: the proposal API (`ProposeBlock`, `ProposePeer`, ...).
//! - [`role`]: the typed leader/follower/candidate transition channel.
//! - [`config`]: [`config::NodeConfig`] and the Raft configuration constants.
//! - [`error`]: [`error::BlockraftError`], the crate's error taxonomy.

pub mod address;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod driver;
pub mod error;
pub mod intake;
pub mod manager;
pub mod peers;
pub mod role;
pub mod snapshot;
pub mod storage;
pub mod transport;

pub use error::{BlockraftError, Result};
pub use manager::{NodeInfo, ProtocolManager};
