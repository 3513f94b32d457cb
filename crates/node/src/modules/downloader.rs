//! The downloader: serves object reads, piece reads, and integrity
//! challenges from the local piece store and SP-DB.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use ospn_common::error::{
    CodedError, ERR_NO_SUCH_INTEGRITY, ERR_NO_SUCH_PIECE, ERR_SERVER_STOPPING,
    ERR_UNSUPPORTED_TASK_TYPE,
};

use crate::metrics::Metrics;
use crate::modules::{Module, DOWNLOADER_MODULE};
use crate::piece_store::{primary_piece_key, secondary_piece_key};
use crate::services::Services;

use ospn_task::{Task, TaskBody};

/// Challenge reply: the object's integrity hash, its per-segment checksums,
/// and the challenged piece bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeInfo {
    pub integrity_hash: [u8; 32],
    pub checksums: Vec<[u8; 32]>,
    pub piece: Vec<u8>,
}

pub struct DownloaderModule {
    services: Arc<Services>,
}

impl DownloaderModule {
    pub fn new(services: Arc<Services>) -> Arc<DownloaderModule> {
        Arc::new(DownloaderModule { services })
    }

    fn check_running(&self) -> Result<(), CodedError> {
        if self.services.shutdown().is_cancelled() {
            return Err(ERR_SERVER_STOPPING.to_err());
        }
        Ok(())
    }

    // ── download object ─────────────────────────────────────────────────────

    pub fn pre_download_object(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::DownloadObject { object, .. } => {
                let has_meta = self
                    .services
                    .db()
                    .get_object_integrity(object.id, None)
                    .map_err(|e| CodedError::internal(e.to_string()))?
                    .is_some();
                if !has_meta {
                    return Err(ERR_NO_SUCH_INTEGRITY.with_detail(&object.object_name));
                }
                Ok(())
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    /// Read the requested byte range, assembled from primary pieces. A
    /// zero `high` means "to the end of the object".
    pub fn handle_download_object(&self, task: &Task) -> Result<Vec<u8>, CodedError> {
        let (object, params, low, mut high) = match &task.body {
            TaskBody::DownloadObject { object, params, low, high } => {
                (object, params, *low, *high)
            }
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };
        if object.payload_size == 0 {
            return Ok(Vec::new());
        }
        if high == 0 {
            high = object.payload_size - 1;
        }
        if low > high || high >= object.payload_size {
            return Err(ERR_UNSUPPORTED_TASK_TYPE
                .with_detail(format!("bad range [{low}, {high}]")));
        }

        let segment_size = params.segment_size.max(1);
        let store = self.services.piece_store();
        let mut out = Vec::with_capacity((high - low + 1) as usize);
        let first_seg = (low / segment_size) as u32;
        let last_seg = (high / segment_size) as u32;
        for seg in first_seg..=last_seg {
            let key = primary_piece_key(object.id, seg);
            let piece = store
                .get_piece(&key)
                .map_err(|e| CodedError::internal(e.to_string()))?
                .ok_or_else(|| ERR_NO_SUCH_PIECE.with_detail(&key))?;
            let seg_start = seg as u64 * segment_size;
            let from = low.saturating_sub(seg_start).min(piece.len() as u64) as usize;
            let to = ((high - seg_start) + 1).min(piece.len() as u64) as usize;
            out.extend_from_slice(&piece[from..to]);
        }
        Metrics::add(&self.services.metrics().download_bytes, out.len() as u64);
        Ok(out)
    }

    pub fn post_download_object(&self, task: &Task) {
        debug!(key = %task.key(), "download object done");
    }

    // ── download piece ──────────────────────────────────────────────────────

    pub fn pre_download_piece(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::DownloadPiece { piece_key, .. } if !piece_key.is_empty() => Ok(()),
            TaskBody::DownloadPiece { .. } => {
                Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail("empty piece key"))
            }
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    /// Read one piece, optionally sliced. A zero `length` means the whole
    /// piece from `offset`.
    pub fn handle_download_piece(&self, task: &Task) -> Result<Vec<u8>, CodedError> {
        let (piece_key, offset, length) = match &task.body {
            TaskBody::DownloadPiece { piece_key, offset, length, .. } => {
                (piece_key, *offset, *length)
            }
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };
        let piece = self
            .services
            .piece_store()
            .get_piece(piece_key)
            .map_err(|e| CodedError::internal(e.to_string()))?
            .ok_or_else(|| ERR_NO_SUCH_PIECE.with_detail(piece_key))?;
        let from = (offset as usize).min(piece.len());
        let to = if length == 0 {
            piece.len()
        } else {
            (from + length as usize).min(piece.len())
        };
        let out = piece[from..to].to_vec();
        Metrics::add(&self.services.metrics().download_bytes, out.len() as u64);
        Ok(out)
    }

    pub fn post_download_piece(&self, task: &Task) {
        debug!(key = %task.key(), "download piece done");
    }

    // ── challenge ───────────────────────────────────────────────────────────

    pub fn pre_challenge(&self, task: &Task) -> Result<(), CodedError> {
        self.check_running()?;
        match &task.body {
            TaskBody::ChallengePiece { .. } => Ok(()),
            _ => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        }
    }

    /// Integrity proof for one piece: the stored integrity hash, the full
    /// checksum list, and the piece bytes themselves.
    pub fn handle_challenge(&self, task: &Task) -> Result<ChallengeInfo, CodedError> {
        let (object, segment_idx, redundancy_idx) = match &task.body {
            TaskBody::ChallengePiece { object, segment_idx, redundancy_idx, .. } => {
                (object, *segment_idx, *redundancy_idx)
            }
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };
        let (slot, key) = if redundancy_idx < 0 {
            (None, primary_piece_key(object.id, segment_idx))
        } else {
            let idx = redundancy_idx as u32;
            (Some(idx), secondary_piece_key(object.id, segment_idx, idx))
        };
        let meta = self
            .services
            .db()
            .get_object_integrity(object.id, slot)
            .map_err(|e| CodedError::internal(e.to_string()))?
            .ok_or_else(|| ERR_NO_SUCH_INTEGRITY.with_detail(&object.object_name))?;
        let piece = self
            .services
            .piece_store()
            .get_piece(&key)
            .map_err(|e| CodedError::internal(e.to_string()))?
            .ok_or_else(|| ERR_NO_SUCH_PIECE.with_detail(&key))?;
        info!(object = %object.object_name, segment_idx, redundancy_idx, "served challenge info");
        Ok(ChallengeInfo {
            integrity_hash: meta.integrity_hash,
            checksums: meta.checksums,
            piece,
        })
    }

    pub fn post_challenge(&self, task: &Task) {
        debug!(key = %task.key(), "challenge done");
    }
}

#[async_trait]
impl Module for DownloaderModule {
    fn name(&self) -> &'static str {
        DOWNLOADER_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("downloader started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("downloader stopped");
        Ok(())
    }
}
