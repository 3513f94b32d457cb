//! P2P: replicate-approval fan-out across the secondary SP set.
//!
//! A primary SP preparing a replication broadcasts the approval request to
//! its peer set and collects signed grants. Collection stops at
//! `max_approvals` or at the deadline; fewer than `min_approvals` is a
//! failure the caller retries later.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use ospn_chain::SignerRole;
use ospn_common::error::{CodedError, ERR_INSUFFICIENT_APPROVALS, ERR_SERVER_STOPPING};

use crate::modules::{Module, P2P_MODULE};
use crate::rpc::client::NodeClient;
use crate::services::Services;

use ospn_task::Task;

pub struct P2pModule {
    services: Arc<Services>,
}

impl P2pModule {
    pub fn new(services: Arc<Services>) -> Arc<P2pModule> {
        Arc::new(P2pModule { services })
    }

    /// Broadcast the approval request and gather signed grants.
    pub async fn ask_secondary_replicate_piece_approval(
        &self,
        task: &Task,
        min_approvals: u32,
        max_approvals: u32,
        timeout_secs: u64,
    ) -> Result<Vec<Task>, CodedError> {
        if self.services.shutdown().is_cancelled() {
            return Err(ERR_SERVER_STOPPING.to_err());
        }
        let peers = self.services.config().p2p.peers.clone();
        if peers.is_empty() {
            return Err(ERR_INSUFFICIENT_APPROVALS.with_detail("no peers configured"));
        }

        let deadline = Instant::now() + Duration::from_secs(timeout_secs.max(1));
        let mut in_flight: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| {
                let client = NodeClient::new(peer);
                let task = task.clone();
                let peer = peer.clone();
                async move {
                    match client.ask_approval(task).await {
                        Ok((true, Some(approved))) => Some(approved),
                        Ok(_) => {
                            debug!(peer = %peer, "peer refused replicate approval");
                            None
                        }
                        Err(e) => {
                            warn!(peer = %peer, err = %e, "replicate approval request failed");
                            None
                        }
                    }
                }
            })
            .collect();

        let mut approvals: Vec<Task> = Vec::new();
        while approvals.len() < max_approvals as usize {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                next = in_flight.next() => match next {
                    Some(Some(approved)) => approvals.push(approved),
                    Some(None) => {}
                    None => break,
                },
            }
        }

        if approvals.len() < min_approvals as usize {
            return Err(ERR_INSUFFICIENT_APPROVALS.with_detail(format!(
                "{} of {} required",
                approvals.len(),
                min_approvals
            )));
        }
        info!(got = approvals.len(), min_approvals, max_approvals, "collected replicate approvals");
        Ok(approvals)
    }

    /// The configured bootstrap peer set.
    pub fn query_bootstrap(&self) -> Vec<String> {
        self.services.config().p2p.bootstrap.clone()
    }

    /// Signed p2p ping, Operator key.
    pub fn sign_ping(&self, msg: &[u8]) -> Vec<u8> {
        self.services.signer().sign(SignerRole::Operator, msg)
    }

    /// Signed p2p pong, Operator key.
    pub fn sign_pong(&self, msg: &[u8]) -> Vec<u8> {
        self.services.signer().sign(SignerRole::Operator, msg)
    }
}

#[async_trait]
impl Module for P2pModule {
    fn name(&self) -> &'static str {
        P2P_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!(peers = self.services.config().p2p.peers.len(), "p2p started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("p2p stopped");
        Ok(())
    }
}
