//! The uploader: consumes the streamed object payload.
//!
//! The RPC frame loop is the producer; this module is the consumer on the
//! other side of an in-memory byte pipe. Payload bytes are cut into
//! segments, each segment stored as a primary piece with its SHA-256
//! checksum, and the object's integrity meta lands in the SP-DB when the
//! stream completes. Either side failing closes the pipe with the error.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ospn_common::crypto::{integrity_hash, sha256};
use ospn_common::error::{CodedError, ERR_SERVER_STOPPING, ERR_UNSUPPORTED_TASK_TYPE, ERR_UPLOAD_STREAM_BROKEN};

use crate::metrics::Metrics;
use crate::modules::{Module, UPLOADER_MODULE};
use crate::piece_store::primary_piece_key;
use crate::services::Services;
use crate::spdb::{IntegrityMeta, UploadProgress};

use ospn_task::{ObjectInfo, StorageParams, Task, TaskBody};

/// Consumer side of the upload pipe. `Err` items abort the upload with the
/// carried error; the producer closing the channel ends the stream.
pub type PieceReader = mpsc::Receiver<Result<Bytes, CodedError>>;

pub struct UploaderModule {
    services: Arc<Services>,
}

impl UploaderModule {
    pub fn new(services: Arc<Services>) -> Arc<UploaderModule> {
        Arc::new(UploaderModule { services })
    }

    fn upload_body<'t>(
        task: &'t Task,
    ) -> Result<(&'t ObjectInfo, &'t StorageParams, bool, u64), CodedError> {
        match &task.body {
            TaskBody::Upload { object, params, resumable, offset } => {
                Ok((object, params, *resumable, *offset))
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    pub fn pre_upload_object(&self, task: &Task) -> Result<(), CodedError> {
        if self.services.shutdown().is_cancelled() {
            return Err(ERR_SERVER_STOPPING.to_err());
        }
        let (object, params, resumable, offset) = Self::upload_body(task)?;
        if object.object_name.is_empty() || object.bucket_name.is_empty() {
            return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail("empty object identity"));
        }
        if resumable && offset % params.segment_size.max(1) != 0 {
            return Err(
                ERR_UNSUPPORTED_TASK_TYPE.with_detail("resume offset not segment aligned")
            );
        }
        let db = self.services.db();
        db.set_object_info(object.clone())
            .map_err(|e| CodedError::internal(e.to_string()))?;
        db.set_upload_progress(object.id, UploadProgress::Uploading)
            .map_err(|e| CodedError::internal(e.to_string()))?;
        Ok(())
    }

    /// Drain the pipe into segment pieces. Returns once the producer closes
    /// the channel (complete) or sends an error (abort).
    pub async fn handle_upload_object(
        &self,
        task: &Task,
        mut reader: PieceReader,
    ) -> Result<(), CodedError> {
        let (object, params, resumable, offset) = Self::upload_body(task)?;
        let segment_size = params.segment_size.max(1) as usize;
        let store = self.services.piece_store();
        let db = self.services.db();

        let mut segment_idx: u32 = (offset / segment_size as u64) as u32;
        let mut checksums: Vec<[u8; 32]> = if resumable && segment_idx > 0 {
            // resume keeps the checksums of segments already stored
            let prior = db
                .get_object_integrity(object.id, None)
                .map_err(|e| CodedError::internal(e.to_string()))?
                .map(|m| m.checksums)
                .unwrap_or_default();
            if prior.len() < segment_idx as usize {
                return Err(ERR_UPLOAD_STREAM_BROKEN
                    .with_detail("resume offset beyond stored segments"));
            }
            prior[..segment_idx as usize].to_vec()
        } else {
            Vec::new()
        };

        let mut buf: Vec<u8> = Vec::with_capacity(segment_size.min(1 << 24));
        let mut total: u64 = offset;

        let mut flush =
            |buf: &mut Vec<u8>, idx: u32, checksums: &mut Vec<[u8; 32]>| -> Result<(), CodedError> {
                let key = primary_piece_key(object.id, idx);
                store
                    .put_piece(&key, buf)
                    .map_err(|e| CodedError::internal(e.to_string()))?;
                checksums.push(sha256(buf));
                buf.clear();
                Ok(())
            };

        while let Some(item) = reader.recv().await {
            let chunk = item?;
            total = total.saturating_add(chunk.len() as u64);
            if total > object.payload_size {
                return Err(ERR_UPLOAD_STREAM_BROKEN.with_detail(format!(
                    "stream exceeds declared payload size {}",
                    object.payload_size
                )));
            }
            let mut rest = &chunk[..];
            while !rest.is_empty() {
                let room = segment_size - buf.len();
                let take = room.min(rest.len());
                buf.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if buf.len() == segment_size {
                    flush(&mut buf, segment_idx, &mut checksums)?;
                    segment_idx += 1;
                }
            }
        }

        if total != object.payload_size {
            return Err(ERR_UPLOAD_STREAM_BROKEN.with_detail(format!(
                "stream ended at {} of {} bytes",
                total, object.payload_size
            )));
        }
        if !buf.is_empty() {
            flush(&mut buf, segment_idx, &mut checksums)?;
        }

        let meta = IntegrityMeta {
            object_id: object.id,
            replicate_idx: None,
            integrity_hash: integrity_hash(&checksums),
            checksums,
        };
        db.set_object_integrity(meta)
            .map_err(|e| CodedError::internal(e.to_string()))?;
        db.set_upload_progress(object.id, UploadProgress::Uploaded)
            .map_err(|e| CodedError::internal(e.to_string()))?;
        Metrics::add(&self.services.metrics().upload_bytes, total - offset);
        info!(object = %object.object_name, bytes = total, "object payload stored");
        Ok(())
    }

    pub fn post_upload_object(&self, task: &Task, failed: Option<&CodedError>) {
        match (Self::upload_body(task), failed) {
            (Ok((object, ..)), Some(err)) => {
                warn!(object = %object.object_name, %err, "upload failed");
                let _ = self
                    .services
                    .db()
                    .set_upload_progress(object.id, UploadProgress::UploadFailed);
            }
            (Ok((object, ..)), None) => {
                debug!(object = %object.object_name, "upload done");
            }
            (Err(_), _) => {}
        }
    }
}

#[async_trait]
impl Module for UploaderModule {
    fn name(&self) -> &'static str {
        UPLOADER_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("uploader started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("uploader stopped");
        Ok(())
    }
}
