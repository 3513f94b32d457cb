//! The authenticator: per-operation permission checks and the off-chain
//! auth key table.
//!
//! Off-chain auth lets a dapp register an ed25519 public key per
//! (account, domain) with a nonce-guarded update protocol; request
//! signatures are then verified against the registered key until it
//! expires.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use ospn_common::crypto::verify_signature;
use ospn_common::error::{
    CodedError, ERR_BAD_OFF_CHAIN_SIGNATURE, ERR_MISMATCH_AUTH_NONCE,
    ERR_NO_SUCH_AUTH_KEY, ERR_PUBLIC_KEY_EXPIRED, ERR_SERVER_STOPPING,
};
use ospn_common::now_millis;

use crate::modules::{Module, AUTHENTICATOR_MODULE};
use crate::rpc::wire::AuthOp;
use crate::services::Services;
use crate::spdb::{OffChainAuthKey, UploadProgress};

pub struct AuthenticatorModule {
    services: Arc<Services>,
}

impl AuthenticatorModule {
    pub fn new(services: Arc<Services>) -> Arc<AuthenticatorModule> {
        Arc::new(AuthenticatorModule { services })
    }

    /// Whether `account` may perform `op` on the named bucket/object.
    pub fn verify_authentication(
        &self,
        op: AuthOp,
        account: &str,
        bucket: &str,
        object: &str,
    ) -> Result<bool, CodedError> {
        if self.services.shutdown().is_cancelled() {
            return Err(ERR_SERVER_STOPPING.to_err());
        }
        let db = self.services.db();
        let info = db
            .get_object_info(bucket, object)
            .map_err(|e| CodedError::internal(e.to_string()))?;

        let allowed = match op {
            // Approval requests are arbitrated on-chain; the SP only vets
            // that the request is well-formed.
            AuthOp::AskCreateBucketApproval
            | AuthOp::AskMigrateBucketApproval
            | AuthOp::AskCreateObjectApproval => true,
            // Challenges come from validators and are never owner-gated.
            AuthOp::ChallengePiece => true,
            AuthOp::PutObject | AuthOp::GetUploadingState => match info {
                // first write creates the object row
                None => true,
                Some(info) => info.owner == account,
            },
            AuthOp::GetObject => match info {
                None => false,
                Some(info) => {
                    let sealed = matches!(
                        db.get_upload_progress(info.id)
                            .map_err(|e| CodedError::internal(e.to_string()))?,
                        Some(UploadProgress::Sealed)
                    );
                    sealed && info.owner == account
                }
            },
            AuthOp::GetRecoveryPiece | AuthOp::MigratePiece => info.is_some(),
        };
        debug!(?op, account, bucket, object, allowed, "verified authentication");
        Ok(allowed)
    }

    /// Current and next expected nonce plus the registered key, zeroes when
    /// the account has no key yet.
    pub fn get_auth_nonce(
        &self,
        account: &str,
        domain: &str,
    ) -> Result<(u64, u64, Vec<u8>, i64), CodedError> {
        let key = self
            .services
            .db()
            .get_auth_key(account, domain)
            .map_err(|e| CodedError::internal(e.to_string()))?;
        Ok(match key {
            Some(k) => (k.current_nonce, k.current_nonce + 1, k.public_key, k.expiry_ms),
            None => (0, 1, Vec::new(), 0),
        })
    }

    /// Rotate the registered public key. The caller must echo the stored
    /// current nonce and advance to exactly the next one.
    pub fn update_user_public_key(
        &self,
        account: &str,
        domain: &str,
        current_nonce: u64,
        nonce: u64,
        public_key: Vec<u8>,
        expiry_ms: i64,
    ) -> Result<(), CodedError> {
        let db = self.services.db();
        let stored = db
            .get_auth_key(account, domain)
            .map_err(|e| CodedError::internal(e.to_string()))?;
        let stored_current = stored.as_ref().map(|k| k.current_nonce).unwrap_or(0);
        if current_nonce != stored_current || nonce != stored_current + 1 {
            return Err(ERR_MISMATCH_AUTH_NONCE.with_detail(format!(
                "stored {}, got current {} next {}",
                stored_current, current_nonce, nonce
            )));
        }
        db.upsert_auth_key(OffChainAuthKey {
            account: account.to_string(),
            domain: domain.to_string(),
            current_nonce: nonce,
            public_key,
            expiry_ms,
        })
        .map_err(|e| CodedError::internal(e.to_string()))?;
        info!(account, domain, nonce, "updated off-chain auth key");
        Ok(())
    }

    /// Verify a request signature against the registered, unexpired key.
    pub fn verify_off_chain_signature(
        &self,
        account: &str,
        domain: &str,
        signature: &[u8],
        real_msg: &[u8],
    ) -> Result<(), CodedError> {
        let key = self
            .services
            .db()
            .get_auth_key(account, domain)
            .map_err(|e| CodedError::internal(e.to_string()))?
            .ok_or_else(|| {
                ERR_NO_SUCH_AUTH_KEY.with_detail(format!("{account}/{domain}"))
            })?;
        if key.expiry_ms <= now_millis() {
            return Err(ERR_PUBLIC_KEY_EXPIRED.with_detail(format!("{account}/{domain}")));
        }
        verify_signature(&key.public_key, real_msg, signature)
            .map_err(|e| ERR_BAD_OFF_CHAIN_SIGNATURE.with_detail(e.to_string()))
    }
}

#[async_trait]
impl Module for AuthenticatorModule {
    fn name(&self) -> &'static str {
        AUTHENTICATOR_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("authenticator started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("authenticator stopped");
        Ok(())
    }
}
