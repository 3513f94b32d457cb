//! The receiver: the secondary-SP side of piece replication.
//!
//! A primary SP pushes pieces segment by segment; each arrival is checksum
//! verified and stored under the secondary piece key. `DoneReplicatePiece`
//! finalizes: all segments must be present, the integrity hash is computed
//! and persisted, and the confirmation is signed with the Bls role key so
//! the primary can carry it into the seal transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use ospn_chain::SignerRole;
use ospn_common::crypto::{integrity_hash, sha256};
use ospn_common::error::{
    CodedError, ERR_PIECE_CHECKSUM_MISMATCH, ERR_REPLICATE_UNFINISHED,
    ERR_SERVER_STOPPING, ERR_UNSUPPORTED_TASK_TYPE,
};

use crate::modules::{Module, RECEIVER_MODULE};
use crate::piece_store::secondary_piece_key;
use crate::services::Services;
use crate::spdb::IntegrityMeta;

use ospn_task::{Task, TaskBody};

/// The signed confirmation returned to the primary SP.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateConfirmation {
    pub integrity_hash: [u8; 32],
    pub signature: Vec<u8>,
    pub sp_address: String,
}

/// Bytes the Bls confirmation signature covers.
pub fn confirmation_signing_bytes(
    object_id: u64,
    replicate_idx: u32,
    integrity: &[u8; 32],
) -> Vec<u8> {
    bincode::serialize(&(object_id, replicate_idx, integrity)).unwrap_or_default()
}

pub struct ReceiverModule {
    services: Arc<Services>,
    /// Per (object, slot): checksums of segments received so far.
    pending: Mutex<HashMap<(u64, u32), BTreeMap<u32, [u8; 32]>>>,
}

impl ReceiverModule {
    pub fn new(services: Arc<Services>) -> Arc<ReceiverModule> {
        Arc::new(ReceiverModule { services, pending: Mutex::new(HashMap::new()) })
    }

    pub fn pre_receive_piece(&self, task: &Task) -> Result<(), CodedError> {
        if self.services.shutdown().is_cancelled() {
            return Err(ERR_SERVER_STOPPING.to_err());
        }
        match &task.body {
            TaskBody::ReceivePiece { .. } => Ok(()),
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    /// Verify and store one pushed piece.
    pub fn handle_receive_piece(
        &self,
        task: &Task,
        data: &[u8],
    ) -> Result<(), CodedError> {
        let (object, segment_idx, replicate_idx, expected) = match &task.body {
            TaskBody::ReceivePiece {
                object, segment_idx, replicate_idx, piece_checksum, ..
            } => (object, *segment_idx, *replicate_idx, piece_checksum),
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };

        let checksum = sha256(data);
        if !expected.is_empty() && expected.as_slice() != checksum.as_slice() {
            return Err(ERR_PIECE_CHECKSUM_MISMATCH.with_detail(format!(
                "object {} segment {}",
                object.object_name, segment_idx
            )));
        }

        let key = secondary_piece_key(object.id, segment_idx, replicate_idx);
        self.services
            .piece_store()
            .put_piece(&key, data)
            .map_err(|e| CodedError::internal(e.to_string()))?;
        self.pending
            .lock()
            .entry((object.id, replicate_idx))
            .or_default()
            .insert(segment_idx, checksum);
        debug!(object = %object.object_name, segment_idx, replicate_idx, "received piece");
        Ok(())
    }

    /// Finalize a replication: all segments present, integrity persisted,
    /// confirmation signed with the Bls role.
    pub fn handle_done_replicate(
        &self,
        task: &Task,
    ) -> Result<ReplicateConfirmation, CodedError> {
        let (object, params, replicate_idx) = match &task.body {
            TaskBody::ReceivePiece { object, params, replicate_idx, .. } => {
                (object, params, *replicate_idx)
            }
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };

        let expected = params.segment_count(object.payload_size);
        let checksums: Vec<[u8; 32]> = {
            let pending = self.pending.lock();
            let segs = pending.get(&(object.id, replicate_idx)).ok_or_else(|| {
                ERR_REPLICATE_UNFINISHED.with_detail(&object.object_name)
            })?;
            if segs.len() != expected as usize
                || !(0..expected).all(|i| segs.contains_key(&i))
            {
                return Err(ERR_REPLICATE_UNFINISHED.with_detail(format!(
                    "{}: {} of {} segments",
                    object.object_name,
                    segs.len(),
                    expected
                )));
            }
            segs.values().copied().collect()
        };

        let integrity = integrity_hash(&checksums);
        self.services
            .db()
            .set_object_integrity(IntegrityMeta {
                object_id: object.id,
                replicate_idx: Some(replicate_idx),
                integrity_hash: integrity,
                checksums,
            })
            .map_err(|e| CodedError::internal(e.to_string()))?;

        let signer = self.services.signer();
        let msg = confirmation_signing_bytes(object.id, replicate_idx, &integrity);
        let confirmation = ReplicateConfirmation {
            integrity_hash: integrity,
            signature: signer.sign(SignerRole::Bls, &msg),
            sp_address: signer.role_address(SignerRole::Operator),
        };

        self.pending.lock().remove(&(object.id, replicate_idx));
        info!(object = %object.object_name, replicate_idx, "replication confirmed");
        Ok(confirmation)
    }
}

#[async_trait]
impl Module for ReceiverModule {
    fn name(&self) -> &'static str {
        RECEIVER_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("receiver started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("receiver stopped");
        Ok(())
    }
}
