//! The approver: grants or refuses forthcoming operations.
//!
//! An approval is the SP's signed statement that it will take part in a
//! bucket creation, bucket migration, object creation, or piece replication.
//! The handle step stamps an expiry height and signs with the Approval role
//! key; the requester carries the signed task back on-chain (or to the
//! primary SP for replication).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use ospn_chain::SignerRole;
use ospn_common::error::{
    CodedError, ERR_SERVER_STOPPING, ERR_UNSUPPORTED_TASK_TYPE,
};

use crate::modules::{Module, APPROVER_MODULE};
use crate::services::Services;

use ospn_task::{Task, TaskBody, TaskType};

/// Approvals stay valid for this many blocks past the current height.
pub const APPROVAL_EXPIRED_HEIGHT: u64 = 100;

pub struct ApproverModule {
    services: Arc<Services>,
}

/// Deterministic bytes an approval signature covers.
fn approval_signing_bytes(kind: TaskType, subject: &str, expired_height: u64) -> Vec<u8> {
    bincode::serialize(&(kind, subject, expired_height)).unwrap_or_default()
}

impl ApproverModule {
    pub fn new(services: Arc<Services>) -> Arc<ApproverModule> {
        Arc::new(ApproverModule { services })
    }

    fn check_running(&self) -> Result<(), CodedError> {
        if self.services.shutdown().is_cancelled() {
            return Err(ERR_SERVER_STOPPING.to_err());
        }
        Ok(())
    }

    async fn expiry_height(&self) -> Result<u64, CodedError> {
        let height = self
            .services
            .chain()
            .query_latest_height()
            .await
            .map_err(|e| CodedError::internal(e.to_string()))?;
        Ok(height + APPROVAL_EXPIRED_HEIGHT)
    }

    // ── create bucket ───────────────────────────────────────────────────────

    pub fn pre_create_bucket_approval(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::CreateBucketApproval { bucket, .. } if !bucket.bucket_name.is_empty() => {
                Ok(())
            }
            TaskBody::CreateBucketApproval { .. } => {
                Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail("empty bucket name"))
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub async fn handle_create_bucket_approval(
        &self,
        task: &mut Task,
    ) -> Result<bool, CodedError> {
        let expiry = self.expiry_height().await?;
        match &mut task.body {
            TaskBody::CreateBucketApproval { bucket, expired_height, signature } => {
                *expired_height = expiry;
                let msg = approval_signing_bytes(
                    TaskType::CreateBucketApproval,
                    &bucket.bucket_name,
                    expiry,
                );
                *signature = self.services.signer().sign(SignerRole::Approval, &msg);
                info!(bucket = %bucket.bucket_name, expired_height = expiry, "granted create bucket approval");
                Ok(true)
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub fn post_create_bucket_approval(&self, task: &Task) {
        debug!(key = %task.key(), "create bucket approval done");
    }

    // ── migrate bucket ──────────────────────────────────────────────────────

    pub fn pre_migrate_bucket_approval(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::MigrateBucketApproval { bucket, dst_sp, .. }
                if !bucket.bucket_name.is_empty() && !dst_sp.is_empty() =>
            {
                Ok(())
            }
            TaskBody::MigrateBucketApproval { .. } => {
                Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail("incomplete migrate approval"))
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub async fn handle_migrate_bucket_approval(
        &self,
        task: &mut Task,
    ) -> Result<bool, CodedError> {
        let expiry = self.expiry_height().await?;
        match &mut task.body {
            TaskBody::MigrateBucketApproval { bucket, expired_height, signature, .. } => {
                *expired_height = expiry;
                let msg = approval_signing_bytes(
                    TaskType::MigrateBucketApproval,
                    &bucket.bucket_name,
                    expiry,
                );
                *signature = self.services.signer().sign(SignerRole::Approval, &msg);
                info!(bucket = %bucket.bucket_name, expired_height = expiry, "granted migrate bucket approval");
                Ok(true)
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub fn post_migrate_bucket_approval(&self, task: &Task) {
        debug!(key = %task.key(), "migrate bucket approval done");
    }

    // ── create object ───────────────────────────────────────────────────────

    pub fn pre_create_object_approval(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::CreateObjectApproval { object, .. }
                if !object.object_name.is_empty() =>
            {
                Ok(())
            }
            TaskBody::CreateObjectApproval { .. } => {
                Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail("empty object name"))
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub async fn handle_create_object_approval(
        &self,
        task: &mut Task,
    ) -> Result<bool, CodedError> {
        let expiry = self.expiry_height().await?;
        match &mut task.body {
            TaskBody::CreateObjectApproval { object, expired_height, signature } => {
                *expired_height = expiry;
                let msg = approval_signing_bytes(
                    TaskType::CreateObjectApproval,
                    &object.object_name,
                    expiry,
                );
                *signature = self.services.signer().sign(SignerRole::Approval, &msg);
                info!(object = %object.object_name, expired_height = expiry, "granted create object approval");
                Ok(true)
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub fn post_create_object_approval(&self, task: &Task) {
        debug!(key = %task.key(), "create object approval done");
    }

    // ── replicate piece (asked by a primary SP over p2p) ───────────────────

    pub fn pre_replicate_piece_approval(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::ReplicatePieceApproval { object, .. }
                if !object.object_name.is_empty() =>
            {
                Ok(())
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub async fn handle_replicate_piece_approval(
        &self,
        task: &mut Task,
    ) -> Result<bool, CodedError> {
        let expiry = self.expiry_height().await?;
        let own_address = self.services.signer().role_address(SignerRole::Operator);
        match &mut task.body {
            TaskBody::ReplicatePieceApproval {
                object,
                expired_height,
                approved_sp,
                signature,
            } => {
                *expired_height = expiry;
                *approved_sp = own_address;
                let msg = approval_signing_bytes(
                    TaskType::ReplicatePieceApproval,
                    &object.object_name,
                    expiry,
                );
                *signature = self.services.signer().sign(SignerRole::Approval, &msg);
                debug!(object = %object.object_name, "granted replicate piece approval");
                Ok(true)
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub fn post_replicate_piece_approval(&self, task: &Task) {
        debug!(key = %task.key(), "replicate piece approval done");
    }
}

#[async_trait]
impl Module for ApproverModule {
    fn name(&self) -> &'static str {
        APPROVER_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("approver started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("approver stopped");
        Ok(())
    }
}
