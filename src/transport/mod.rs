//! Raft wire transport (spec.md §4.5 C3): a plain HTTP listener per
//! node at `0.0.0.0:50400 + raftId`, carrying raw protobuf-encoded
//! `raft::eraftpb::Message` bytes. Grounded on the axum/reqwest pairing
//! used for Raft RPC transport in the retrieval pack (an HTTP-based
//! `RaftNetwork` alongside an axum `Router` serving the inbound side),
//! generalized from JSON bodies to the binary protobuf wire format
//! raft-rs's own message type already gives us.

mod client;
mod server;

pub use client::TransportClient;
pub use server::{serve, RaftHttpState};
