//! Per-kind task payloads and the tagged task union.
//!
//! One `Task` = common [`TaskMeta`] + a [`TaskBody`] variant. Services match
//! on the variant instead of downcasting through interfaces; a request
//! carrying the wrong variant is an `UnsupportedTaskType` at the boundary.

use serde::{Deserialize, Serialize};

use ospn_common::config::TaskPolicyConfig;
use ospn_rcmgr::ScopeStat;

use crate::policy::{task_max_retry, task_priority, task_timeout};
use crate::types::{priority_band, TaskKey, TaskMeta, TaskType};

// ════════════════════════════════════════════════════════════════════════════
// SUBJECT RECORDS
// ════════════════════════════════════════════════════════════════════════════

/// On-chain object descriptor, as much of it as the service spine needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: u64,
    pub bucket_name: String,
    pub object_name: String,
    pub owner: String,
    pub payload_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: u64,
    pub bucket_name: String,
    pub owner: String,
}

/// Storage parameters pinned at object creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageParams {
    pub segment_size: u64,
    pub redundant_data_chunks: u32,
    pub redundant_parity_chunks: u32,
}

impl Default for StorageParams {
    fn default() -> Self {
        StorageParams {
            segment_size: 16 * 1024 * 1024,
            redundant_data_chunks: 4,
            redundant_parity_chunks: 2,
        }
    }
}

impl StorageParams {
    /// Number of secondary SPs expected to hold pieces.
    pub fn secondary_count(&self) -> u32 {
        self.redundant_data_chunks + self.redundant_parity_chunks
    }

    /// Segment count for a payload of `size` bytes.
    pub fn segment_count(&self, size: u64) -> u32 {
        if size == 0 || self.segment_size == 0 {
            return if size == 0 { 0 } else { 1 };
        }
        size.div_ceil(self.segment_size) as u32
    }
}

/// One secondary SP's signed confirmation that it holds its pieces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondaryConfirmation {
    pub endpoint: String,
    pub sp_address: String,
    pub integrity_hash: [u8; 32],
    pub signature: Vec<u8>,
}

// ════════════════════════════════════════════════════════════════════════════
// TASK BODY
// ════════════════════════════════════════════════════════════════════════════

/// Kind-specific payloads. The variant determines [`TaskType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskBody {
    CreateBucketApproval {
        bucket: BucketInfo,
        expired_height: u64,
        signature: Vec<u8>,
    },
    MigrateBucketApproval {
        bucket: BucketInfo,
        dst_sp: String,
        expired_height: u64,
        signature: Vec<u8>,
    },
    CreateObjectApproval {
        object: ObjectInfo,
        expired_height: u64,
        signature: Vec<u8>,
    },
    ReplicatePieceApproval {
        object: ObjectInfo,
        expired_height: u64,
        /// Address of the SP granting the approval, filled by that SP.
        approved_sp: String,
        signature: Vec<u8>,
    },
    Upload {
        object: ObjectInfo,
        params: StorageParams,
        /// Resumable uploads restart from this segment.
        resumable: bool,
        offset: u64,
    },
    ReplicatePiece {
        object: ObjectInfo,
        params: StorageParams,
        secondary_endpoints: Vec<String>,
        /// Filled as secondaries confirm.
        confirmations: Vec<SecondaryConfirmation>,
    },
    ReceivePiece {
        object: ObjectInfo,
        params: StorageParams,
        segment_idx: u32,
        /// Which redundancy slot this SP holds for the object.
        replicate_idx: u32,
        piece_size: u64,
        piece_checksum: Vec<u8>,
        /// True once all segments arrived and the confirmation was signed.
        finished: bool,
    },
    SealObject {
        object: ObjectInfo,
        params: StorageParams,
        secondary_endpoints: Vec<String>,
        /// Aggregated secondary signatures carried onto the chain.
        secondary_signatures: Vec<Vec<u8>>,
    },
    DownloadObject {
        object: ObjectInfo,
        params: StorageParams,
        /// Inclusive byte range.
        low: u64,
        high: u64,
    },
    DownloadPiece {
        object: ObjectInfo,
        piece_key: String,
        piece_size: u64,
        offset: u64,
        length: u64,
    },
    ChallengePiece {
        object: ObjectInfo,
        params: StorageParams,
        segment_idx: u32,
        /// -1 for the primary SP, otherwise the redundancy slot.
        redundancy_idx: i32,
    },
    GCObject {
        start_block: u64,
        end_block: u64,
        current_block: u64,
        last_deleted_object_id: u64,
    },
    GCZombiePiece {
        start_object_id: u64,
        end_object_id: u64,
    },
    GCMeta {
        current_idx: u64,
        delete_count: u64,
    },
    RecoverPiece {
        object: ObjectInfo,
        params: StorageParams,
        segment_idx: u32,
        ec_idx: i32,
    },
    MigrateGVG {
        bucket_id: u64,
        gvg_id: u32,
        redundancy_idx: i32,
        last_migrated_object_id: u64,
        /// Endpoint of the SP the pieces migrate from.
        src_sp_endpoint: String,
    },
}

impl TaskBody {
    pub fn kind(&self) -> TaskType {
        match self {
            TaskBody::CreateBucketApproval { .. } => TaskType::CreateBucketApproval,
            TaskBody::MigrateBucketApproval { .. } => TaskType::MigrateBucketApproval,
            TaskBody::CreateObjectApproval { .. } => TaskType::CreateObjectApproval,
            TaskBody::ReplicatePieceApproval { .. } => TaskType::ReplicatePieceApproval,
            TaskBody::Upload { .. } => TaskType::Upload,
            TaskBody::ReplicatePiece { .. } => TaskType::ReplicatePiece,
            TaskBody::ReceivePiece { .. } => TaskType::ReceivePiece,
            TaskBody::SealObject { .. } => TaskType::SealObject,
            TaskBody::DownloadObject { .. } => TaskType::DownloadObject,
            TaskBody::DownloadPiece { .. } => TaskType::DownloadPiece,
            TaskBody::ChallengePiece { .. } => TaskType::ChallengePiece,
            TaskBody::GCObject { .. } => TaskType::GCObject,
            TaskBody::GCZombiePiece { .. } => TaskType::GCZombiePiece,
            TaskBody::GCMeta { .. } => TaskType::GCMeta,
            TaskBody::RecoverPiece { .. } => TaskType::RecoverPiece,
            TaskBody::MigrateGVG { .. } => TaskType::MigrateGVG,
        }
    }

    /// The payload size that drives size-based timeouts and memory
    /// estimates.
    pub fn payload_size(&self) -> u64 {
        match self {
            TaskBody::Upload { object, .. }
            | TaskBody::ReplicatePiece { object, .. }
            | TaskBody::SealObject { object, .. }
            | TaskBody::DownloadObject { object, .. }
            | TaskBody::ChallengePiece { object, .. }
            | TaskBody::RecoverPiece { object, .. } => object.payload_size,
            TaskBody::ReceivePiece { piece_size, .. } => *piece_size,
            TaskBody::DownloadPiece { length, .. } => *length,
            _ => 0,
        }
    }

    /// What the task acts on, embedded into the task key.
    fn subject(&self) -> String {
        match self {
            TaskBody::CreateBucketApproval { bucket, .. }
            | TaskBody::MigrateBucketApproval { bucket, .. } => {
                format!("bucket:{}", bucket.bucket_name)
            }
            TaskBody::CreateObjectApproval { object, .. }
            | TaskBody::ReplicatePieceApproval { object, .. }
            | TaskBody::Upload { object, .. }
            | TaskBody::ReplicatePiece { object, .. }
            | TaskBody::SealObject { object, .. }
            | TaskBody::DownloadObject { object, .. }
            | TaskBody::RecoverPiece { object, .. }
            | TaskBody::ChallengePiece { object, .. } => {
                format!("bucket:{}-object:{}", object.bucket_name, object.object_name)
            }
            TaskBody::ReceivePiece { object, segment_idx, replicate_idx, .. } => format!(
                "object:{}-seg:{}-rdx:{}",
                object.object_name, segment_idx, replicate_idx
            ),
            TaskBody::DownloadPiece { piece_key, .. } => format!("piece:{}", piece_key),
            TaskBody::GCObject { start_block, end_block, .. } => {
                format!("blocks:{}-{}", start_block, end_block)
            }
            TaskBody::GCZombiePiece { start_object_id, end_object_id } => {
                format!("objects:{}-{}", start_object_id, end_object_id)
            }
            TaskBody::GCMeta { .. } => "meta".to_string(),
            TaskBody::MigrateGVG { bucket_id, gvg_id, .. } => {
                format!("bucket:{}-gvg:{}", bucket_id, gvg_id)
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TASK
// ════════════════════════════════════════════════════════════════════════════

/// The universal unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub meta: TaskMeta,
    pub body: TaskBody,
}

impl Task {
    /// New task with policy knobs left at their zero values; call
    /// [`Task::apply_policy`] before queueing or running it.
    pub fn new(body: TaskBody, now: i64) -> Task {
        let meta = TaskMeta::new(body.kind(), &body.subject(), now);
        Task { meta, body }
    }

    /// Compute timeout, max retry, priority, and the estimated resource
    /// footprint from the dispatch policy. Idempotent for a given config.
    pub fn apply_policy(&mut self, cfg: &TaskPolicyConfig) {
        let kind = self.body.kind();
        let size = self.body.payload_size();
        self.meta.timeout_secs = task_timeout(kind, size, cfg);
        self.meta.max_retry = task_max_retry(kind, cfg);
        self.meta.priority = task_priority(kind);
        self.meta.estimate_limit = self.estimate_limit();
    }

    pub fn kind(&self) -> TaskType {
        self.meta.kind
    }

    pub fn key(&self) -> &TaskKey {
        &self.meta.key
    }

    /// Resource footprint declared by the task: its payload bytes plus one
    /// task slot in its priority band.
    fn estimate_limit(&self) -> ScopeStat {
        let memory = match self.body.kind() {
            TaskType::Upload
            | TaskType::ReplicatePiece
            | TaskType::ReceivePiece
            | TaskType::DownloadObject
            | TaskType::DownloadPiece
            | TaskType::ChallengePiece
            | TaskType::RecoverPiece => self.body.payload_size().max(4096) as i64,
            // control-plane tasks hold no payload in memory
            _ => 4096,
        };
        ScopeStat::for_task(memory, priority_band(self.meta.priority))
    }

    /// One-line task info for task queries.
    pub fn info(&self) -> String {
        format!(
            "key[{}], type[{}], priority[{}], retry[{}/{}], timeout[{}s], address[{}], error[{}]",
            self.meta.key,
            self.meta.kind,
            self.meta.priority,
            self.meta.retry,
            self.meta.max_retry,
            self.meta.timeout_secs,
            if self.meta.address.is_empty() { "-" } else { &self.meta.address },
            self.meta
                .error
                .as_ref()
                .map(|e| e.inner_code.to_string())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}
