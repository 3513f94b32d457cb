//! Task kinds, priorities, and the metadata every task carries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use ospn_common::CodedError;
use ospn_rcmgr::{PriorityBand, ScopeStat};

// ════════════════════════════════════════════════════════════════════════════
// TASK TYPE
// ════════════════════════════════════════════════════════════════════════════

/// The closed set of task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Unknown,
    CreateBucketApproval,
    MigrateBucketApproval,
    CreateObjectApproval,
    ReplicatePieceApproval,
    Upload,
    ReplicatePiece,
    ReceivePiece,
    SealObject,
    DownloadObject,
    DownloadPiece,
    ChallengePiece,
    GCObject,
    GCZombiePiece,
    GCMeta,
    RecoverPiece,
    MigrateGVG,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Unknown => "Unknown",
            TaskType::CreateBucketApproval => "CreateBucketApproval",
            TaskType::MigrateBucketApproval => "MigrateBucketApproval",
            TaskType::CreateObjectApproval => "CreateObjectApproval",
            TaskType::ReplicatePieceApproval => "ReplicatePieceApproval",
            TaskType::Upload => "Upload",
            TaskType::ReplicatePiece => "ReplicatePiece",
            TaskType::ReceivePiece => "ReceivePiece",
            TaskType::SealObject => "SealObject",
            TaskType::DownloadObject => "DownloadObject",
            TaskType::DownloadPiece => "DownloadPiece",
            TaskType::ChallengePiece => "ChallengePiece",
            TaskType::GCObject => "GCObject",
            TaskType::GCZombiePiece => "GCZombiePiece",
            TaskType::GCMeta => "GCMeta",
            TaskType::RecoverPiece => "RecoverPiece",
            TaskType::MigrateGVG => "MigrateGVG",
        };
        f.write_str(name)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PRIORITY
// ════════════════════════════════════════════════════════════════════════════

/// Task priority, a total order in [0, 255].
pub type TaskPriority = u8;

/// Sentinel: the manager never dispatches this task.
pub const UNSCHEDULING_PRIORITY: TaskPriority = 0;
/// Upper bound of the low band; also the default for heavier scheduled kinds.
pub const DEFAULT_SMALLER_PRIORITY: TaskPriority = 85;
/// Lower bound (exclusive) of the high band.
pub const DEFAULT_LARGER_PRIORITY: TaskPriority = 170;
pub const MAX_TASK_PRIORITY: TaskPriority = 255;

/// Band derivation: `p <= 85 → Low`, `p > 170 → High`, else Medium.
pub fn priority_band(priority: TaskPriority) -> PriorityBand {
    if priority <= DEFAULT_SMALLER_PRIORITY {
        PriorityBand::Low
    } else if priority > DEFAULT_LARGER_PRIORITY {
        PriorityBand::High
    } else {
        PriorityBand::Medium
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TASK KEY
// ════════════════════════════════════════════════════════════════════════════

/// Canonical string identity of one task instance. Stable for the task's
/// lifetime and collision-free across instances: the key embeds the kind,
/// the subject identifiers, the creation time, and a process-unique
/// sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey(String);

static KEY_SEQ: AtomicU64 = AtomicU64::new(1);

impl TaskKey {
    /// Build a key for a new instance. `subject` names what the task acts
    /// on (bucket/object/gvg identifiers).
    pub fn derive(kind: TaskType, subject: &str, create_time: i64) -> TaskKey {
        let seq = KEY_SEQ.fetch_add(1, Ordering::Relaxed);
        TaskKey(format!("{}-{}-t:{}-s:{}", kind, subject, create_time, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TASK META
// ════════════════════════════════════════════════════════════════════════════

/// Attributes common to every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub key: TaskKey,
    pub kind: TaskType,
    /// Dispatch count. Only ever increases.
    pub retry: u64,
    pub max_retry: u64,
    pub priority: TaskPriority,
    /// 0 means NotUseTimeout.
    pub timeout_secs: i64,
    pub create_time: i64,
    pub update_time: i64,
    /// Dispatch target, set by the manager from the asking peer.
    pub address: String,
    /// Last observed failure.
    pub error: Option<CodedError>,
    /// Declared resource footprint.
    pub estimate_limit: ScopeStat,
}

impl TaskMeta {
    pub fn new(kind: TaskType, subject: &str, now: i64) -> TaskMeta {
        TaskMeta {
            key: TaskKey::derive(kind, subject, now),
            kind,
            retry: 0,
            max_retry: 0,
            priority: UNSCHEDULING_PRIORITY,
            timeout_secs: 0,
            create_time: now,
            update_time: now,
            address: String::new(),
            error: None,
            estimate_limit: ScopeStat::default(),
        }
    }

    /// Whether the manager may dispatch this task at all.
    pub fn is_scheduling(&self) -> bool {
        self.priority > UNSCHEDULING_PRIORITY
    }

    pub fn band(&self) -> PriorityBand {
        priority_band(self.priority)
    }

    /// A dispatched task whose timeout elapsed without a report.
    pub fn expired(&self, now: i64) -> bool {
        self.timeout_secs > 0 && self.update_time + self.timeout_secs < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(priority_band(70), PriorityBand::Low);
        assert_eq!(priority_band(85), PriorityBand::Low);
        assert_eq!(priority_band(86), PriorityBand::Medium);
        assert_eq!(priority_band(100), PriorityBand::Medium);
        assert_eq!(priority_band(170), PriorityBand::Medium);
        assert_eq!(priority_band(200), PriorityBand::High);
        assert_eq!(priority_band(255), PriorityBand::High);
    }

    #[test]
    fn keys_never_collide_for_same_subject() {
        let a = TaskKey::derive(TaskType::Upload, "bucket:b-object:o", 100);
        let b = TaskKey::derive(TaskType::Upload, "bucket:b-object:o", 100);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("Upload-bucket:b-object:o"));
    }

    #[test]
    fn expiry_requires_timeout() {
        let mut meta = TaskMeta::new(TaskType::SealObject, "object:1", 100);
        assert!(!meta.expired(10_000));
        meta.timeout_secs = 5;
        assert!(meta.expired(106));
        assert!(!meta.expired(105));
    }
}
