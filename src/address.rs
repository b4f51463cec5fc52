//! Cluster member identity and wire address (spec.md §3 "Address").
//!
//! Addresses travel *inside* Raft log entries (as `ConfChange` context),
//! so every replica — including future replays — learns a new member's
//! wire location deterministically. See spec.md §4.1.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{BlockraftError, Result};

/// 16-bit unsigned integer uniquely naming a cluster member.
///
/// 1-based in initial clusters; assigned by the operator for later joins.
pub type RaftId = u16;

/// The peer's stable cryptographic identity used by the p2p layer
/// (opaque to this crate beyond equality/hashing and wire encoding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Vec<u8>);

impl NodeId {
    /// Parse a hex-encoded enode identity, rejecting malformed input.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlockraftError::BadAddress(format!(
                "invalid node id hex string: {s:?}"
            )));
        }
        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect();
        Ok(NodeId(bytes))
    }
}

/// `{raftId, nodeId, ip, p2pPort}` tuple naming a cluster member's wire
/// location. `ip` is always IPv4 (4 bytes) — spec.md §3/§4.1 rejects any
/// other length as `BadAddress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub raft_id: RaftId,
    pub node_id: NodeId,
    pub ip: Ipv4Addr,
    pub p2p_port: u16,
}

impl Address {
    /// Parse an `enode://<hex>@ip:port?raftport=N` style URL into an
    /// Address. Only the pieces spec.md's data model names are extracted;
    /// unknown query parameters are ignored.
    pub fn parse_enode(raft_id: RaftId, enode_url: &str) -> Result<Self> {
        let rest = enode_url
            .strip_prefix("enode://")
            .ok_or_else(|| BlockraftError::BadAddress(format!("not an enode url: {enode_url}")))?;
        let (hex, host_part) = rest
            .split_once('@')
            .ok_or_else(|| BlockraftError::BadAddress(format!("missing '@' in {enode_url}")))?;
        let node_id = NodeId::from_hex(hex)?;

        let (host_port, query) = host_part.split_once('?').unwrap_or((host_part, ""));
        let (host, p2p_port_str) = host_port
            .split_once(':')
            .ok_or_else(|| BlockraftError::BadAddress(format!("missing port in {enode_url}")))?;

        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| BlockraftError::BadAddress(format!("non-IPv4 host: {host}")))?;

        let p2p_port: u16 = p2p_port_str
            .parse()
            .map_err(|_| BlockraftError::BadAddress(format!("bad port: {p2p_port_str}")))?;

        // `raftport` query parameter is accepted but not required; the
        // cluster derives the Raft transport port as 50400 + raft_id
        // regardless (spec.md §6), so it is only validated, not stored.
        for kv in query.split('&').filter(|s| !s.is_empty()) {
            if let Some((k, v)) = kv.split_once('=') {
                if k == "raftport" && v.parse::<u16>().is_err() {
                    return Err(BlockraftError::BadAddress(format!(
                        "bad raftport query param: {v}"
                    )));
                }
            }
        }

        Ok(Address {
            raft_id,
            node_id,
            ip,
            p2p_port,
        })
    }

    /// The HTTP endpoint this peer's Raft transport listens on
    /// (spec.md §4.5/§6: `0.0.0.0:50400 + raftId`).
    pub fn raft_http_endpoint(&self) -> String {
        format!("http://{}:{}", self.ip, 50400 + self.raft_id as u32)
    }

    /// Encode to the opaque byte string carried in a `ConfChange` context.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Address serialization is infallible")
    }

    /// Decode the inverse of [`Address::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(BlockraftError::from)
    }
}
