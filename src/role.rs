//! Role dispatcher (spec.md §4.6 C8).
//!
//! Listens for leader/follower transitions from the Raft node and
//! starts/stops the minter accordingly. Implements the §9 redesign flag:
//! role changes are a typed 3-variant enum, not an opaque library value,
//! and fail loudly on anything else (there is nothing else — the type
//! itself rules it out, which is the point of the redesign).

use std::sync::Arc;

use tokio::sync::watch;

use crate::contracts::Minter;
use crate::peers::{ClusterState, Role};

/// Typed role transition, broadcast by the driver after each `advance()`
/// (spec.md §9 "Role channel typed as untyped value").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Leader,
    Follower,
    Candidate,
}

/// Drives the minter lifecycle from role transitions, and records the
/// current role under the cluster-state lock for `NodeInfo()` (spec.md
/// §6) to read.
pub struct RoleDispatcher<M: Minter, H: Clone> {
    minter: Arc<M>,
    cluster: Arc<ClusterState<H>>,
}

impl<M: Minter, H: Clone> RoleDispatcher<M, H> {
    pub fn new(minter: Arc<M>, cluster: Arc<ClusterState<H>>) -> Self {
        Self { minter, cluster }
    }

    /// Run until the role channel closes (the driver task has exited).
    pub async fn run(self, mut role_rx: watch::Receiver<RoleChange>) {
        let mut is_minting = false;
        loop {
            let role = *role_rx.borrow();
            match role {
                RoleChange::Leader => {
                    self.cluster.set_role(Role::Minter);
                    if !is_minting {
                        tracing::info!("role dispatcher: starting minter");
                        self.minter.start().await;
                        is_minting = true;
                    }
                }
                RoleChange::Follower | RoleChange::Candidate => {
                    self.cluster.set_role(Role::Verifier);
                    if is_minting {
                        tracing::info!("role dispatcher: stopping minter");
                        self.minter.stop().await;
                        is_minting = false;
                    }
                }
            }

            if role_rx.changed().await.is_err() {
                if is_minting {
                    self.minter.stop().await;
                }
                return;
            }
        }
    }
}
