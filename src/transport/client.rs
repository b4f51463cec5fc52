//! Outbound side of the Raft HTTP transport (spec.md §4.5).
//!
//! Drains the driver's outbound-message channel and posts each message
//! to its destination's Raft HTTP endpoint. A failed delivery is logged
//! and dropped — raft-rs retries via its own resend/heartbeat logic, so
//! the transport itself stays stateless and retry-free.

use std::sync::Arc;

use crate::driver::OutboundMessage;
use crate::peers::ClusterState;

pub struct TransportClient<H> {
    http: reqwest::Client,
    cluster: Arc<ClusterState<H>>,
}

impl<H: Clone> TransportClient<H> {
    pub fn new(cluster: Arc<ClusterState<H>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            cluster,
        }
    }

    /// Run until the outbound channel closes (the driver task exited).
    pub async fn run(
        self,
        mut outbound_rx: tokio::sync::mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        while let Some(outbound) = outbound_rx.recv().await {
            let Some(peer) = self.cluster.peer(outbound.to) else {
                tracing::debug!(to = outbound.to, "dropping message to unknown peer");
                continue;
            };

            let bytes = match protobuf::Message::write_to_bytes(&outbound.message) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode outbound raft message");
                    continue;
                }
            };

            let url = format!("{}/raft/step", peer.address.raft_http_endpoint());
            if let Err(e) = self.http.post(&url).body(bytes).send().await {
                tracing::debug!(to = outbound.to, error = %e, "failed to deliver raft message");
            }
        }
    }
}
