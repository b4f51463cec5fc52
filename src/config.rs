//! Node configuration (SPEC_FULL.md A3).
//!
//! A plain struct constructed by the embedder — file/flag parsing remains
//! the excluded "configuration loading" collaborator (spec.md §1).

use std::path::PathBuf;
use std::time::Duration;

use crate::address::{Address, RaftId};
use crate::error::{BlockraftError, Result};

/// Raft configuration constants named in spec.md §6.
pub const ELECTION_TICK: usize = 10;
pub const HEARTBEAT_TICK: usize = 1;
pub const MAX_SIZE_PER_MSG: u64 = 4096;
pub const MAX_INFLIGHT_MSGS: usize = 256;
pub const CLUSTER_ID: u64 = 0x1000;

/// Base port for the Raft HTTP transport: `50400 + raftId` (spec.md §6).
pub const RAFT_HTTP_BASE_PORT: u16 = 50400;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's Raft ID.
    pub raft_id: RaftId,
    /// This node's own advertised address.
    pub self_address: Address,
    /// Directory under which `raft-wal/`, `raft-snap/` and
    /// `quorum-raft-state/` are created (spec.md §6).
    pub data_dir: PathBuf,
    /// Initial peers for a bootstrap cluster. Empty means this node will
    /// join an existing cluster (`StartNode(nil)`) rather than bootstrap.
    pub bootstrap_peers: Vec<Address>,
    /// Whether this node is joining an existing cluster rather than
    /// bootstrapping or restarting one (spec.md §3 "Lifecycle").
    pub joining_existing: bool,
    /// Tick interval driving Raft heartbeats/elections (spec.md §4.2 "tickerMS").
    pub tick_interval: Duration,
    /// Applied-index growth since the last snapshot that triggers a
    /// periodic snapshot (SPEC_FULL.md A5; default 10,000).
    pub snapshot_entries_threshold: u64,
}

impl NodeConfig {
    /// Validate configuration-class errors named in spec.md §7: an empty
    /// bootstrap list when not joining is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_peers.is_empty() && !self.joining_existing {
            return Err(BlockraftError::Configuration(
                "bootstrap peer list is empty and this node is not joining an existing cluster"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn raft_http_port(&self) -> u16 {
        RAFT_HTTP_BASE_PORT + self.raft_id
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            raft_id: 1,
            self_address: Address {
                raft_id: 1,
                node_id: crate::address::NodeId(vec![]),
                ip: std::net::Ipv4Addr::LOCALHOST,
                p2p_port: 30303,
            },
            data_dir: PathBuf::from("./data"),
            bootstrap_peers: Vec::new(),
            joining_existing: false,
            tick_interval: Duration::from_millis(100),
            snapshot_entries_threshold: 10_000,
        }
    }
}
