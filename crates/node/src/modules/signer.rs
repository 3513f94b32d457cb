//! The signer module: RPC surface over the keyring.
//!
//! Off-chain signing operations map to their role keys; `Broadcast` submits
//! one of the on-chain catalogue transactions with the keyring's nonce
//! discipline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use ospn_chain::SignerRole;
use ospn_common::error::{CodedError, ERR_SIGN_TASK_DANGLING};

use crate::metrics::Metrics;
use crate::modules::{Module, SIGNER_MODULE};
use crate::rpc::wire::SignOp;
use crate::services::Services;

/// Outcome of one sign request: an off-chain signature or an on-chain tx
/// hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signature(Vec<u8>),
    TxHash(String),
}

pub struct SignerModule {
    services: Arc<Services>,
}

impl SignerModule {
    pub fn new(services: Arc<Services>) -> Arc<SignerModule> {
        Arc::new(SignerModule { services })
    }

    fn sign_with(
        &self,
        role: SignerRole,
        op_name: &'static str,
        msg: &[u8],
    ) -> Result<SignOutcome, CodedError> {
        if msg.is_empty() {
            return Err(ERR_SIGN_TASK_DANGLING.with_detail(op_name));
        }
        let signature = self.services.signer().sign(role, msg);
        debug!(op = op_name, %role, "signed message");
        Ok(SignOutcome::Signature(signature))
    }

    /// Dispatch one sign operation.
    pub async fn handle(&self, op: SignOp) -> Result<SignOutcome, CodedError> {
        use SignerRole::{Approval, Bls, Operator};
        match op {
            SignOp::SignCreateBucketApproval { msg } => {
                self.sign_with(Approval, "SignCreateBucketApproval", &msg)
            }
            SignOp::SignMigrateBucketApproval { msg } => {
                self.sign_with(Approval, "SignMigrateBucketApproval", &msg)
            }
            SignOp::SignCreateObjectApproval { msg } => {
                self.sign_with(Approval, "SignCreateObjectApproval", &msg)
            }
            SignOp::SignReplicatePieceApproval { msg } => {
                self.sign_with(Approval, "SignReplicatePieceApproval", &msg)
            }
            SignOp::SignReceivePieceTask { msg } => {
                self.sign_with(Operator, "SignReceivePieceTask", &msg)
            }
            SignOp::SignRecoveryPieceTask { msg } => {
                self.sign_with(Operator, "SignRecoveryPieceTask", &msg)
            }
            SignOp::SignP2PPing { msg } => self.sign_with(Operator, "SignP2PPing", &msg),
            SignOp::SignP2PPong { msg } => self.sign_with(Operator, "SignP2PPong", &msg),
            SignOp::SignSecondarySealBls { msg } => {
                self.sign_with(Bls, "SignSecondarySealBls", &msg)
            }
            SignOp::SignSecondarySPMigrationBucket { msg } => {
                self.sign_with(Operator, "SignSecondarySPMigrationBucket", &msg)
            }
            SignOp::SignSwapOut { msg } => self.sign_with(Operator, "SignSwapOut", &msg),
            SignOp::Broadcast(payload) => {
                let metrics = self.services.metrics();
                Metrics::incr(&metrics.txs_submitted);
                match self.services.signer().broadcast(payload).await {
                    Ok(tx_hash) => Ok(SignOutcome::TxHash(tx_hash)),
                    Err(e) => {
                        Metrics::incr(&metrics.txs_failed);
                        Err(e)
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Module for SignerModule {
    fn name(&self) -> &'static str {
        SIGNER_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("signer started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("signer stopped");
        Ok(())
    }
}
