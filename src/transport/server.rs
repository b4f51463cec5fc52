//! Inbound side of the Raft HTTP transport (spec.md §4.5).
//!
//! A single route accepts protobuf-encoded `Message` bytes and forwards
//! them to the driver's step channel, after checking the sender hasn't
//! been permanently removed (`IsIDRemoved`, spec.md §3 "Removed-peer
//! tombstone set").

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use raft::eraftpb::Message;
use tokio::sync::{mpsc, oneshot};

use crate::peers::ClusterState;

/// Shared state for the inbound Raft HTTP routes.
pub struct RaftHttpState<H> {
    step_tx: mpsc::Sender<Message>,
    cluster: Arc<ClusterState<H>>,
}

impl<H> Clone for RaftHttpState<H> {
    fn clone(&self) -> Self {
        Self {
            step_tx: self.step_tx.clone(),
            cluster: self.cluster.clone(),
        }
    }
}

impl<H: Send + Sync + 'static> RaftHttpState<H> {
    pub fn new(step_tx: mpsc::Sender<Message>, cluster: Arc<ClusterState<H>>) -> Self {
        Self { step_tx, cluster }
    }
}

/// Serve the Raft transport on `addr` until `shutdown` resolves.
pub async fn serve<H: Send + Sync + 'static>(
    addr: SocketAddr,
    state: RaftHttpState<H>,
    shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/raft/step", post(step::<H>))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
        })
        .await
}

async fn step<H: Send + Sync + 'static>(
    State(state): State<RaftHttpState<H>>,
    body: Bytes,
) -> StatusCode {
    let message: Message = match protobuf::Message::parse_from_bytes(&body) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting malformed raft message");
            return StatusCode::BAD_REQUEST;
        }
    };

    let from = message.from as crate::address::RaftId;
    if state.cluster.is_tombstoned(from) {
        tracing::debug!(raft_id = from, "rejecting message from removed peer");
        return StatusCode::FORBIDDEN;
    }

    match state.step_tx.try_send(message) {
        Ok(()) => StatusCode::OK,
        Err(mpsc::error::TrySendError::Full(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Err(mpsc::error::TrySendError::Closed(_)) => StatusCode::GONE,
    }
}
