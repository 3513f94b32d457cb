//! The dispatch policy: pure functions from (kind, payload size, config) to
//! timeout, max retry, and priority.
//!
//! Size-driven kinds compute `size / speed` and clamp into the per-kind
//! range; fixed kinds clamp the configured value. Zero speed or timeout
//! falls back to the default. All clamps are symmetric: a value above the
//! maximum clamps to the maximum, never to the minimum.

use ospn_common::config::TaskPolicyConfig;

use crate::types::{
    TaskPriority, TaskType, DEFAULT_SMALLER_PRIORITY, MAX_TASK_PRIORITY,
    UNSCHEDULING_PRIORITY,
};

const MIB: u64 = 1024 * 1024;

/// Default transfer speed when config supplies zero: 10 MiB/s.
pub const DEFAULT_SPEED_BPS: u64 = 10 * MIB;

/// Approval kinds carry no timeout.
pub const NOT_USE_TIMEOUT: i64 = 0;
/// Caller-driven kinds carry no retry budget.
pub const NOT_USE_RETRY: u64 = 0;

pub const MIN_UPLOAD_TIME: i64 = 2;
pub const MAX_UPLOAD_TIME: i64 = 30;
pub const MIN_REPLICATE_TIME: i64 = 2;
pub const MAX_REPLICATE_TIME: i64 = 60;
pub const MIN_RECEIVE_TIME: i64 = 2;
pub const MAX_RECEIVE_TIME: i64 = 5;
pub const MIN_SEAL_OBJECT_TIME: i64 = 2;
pub const MAX_SEAL_OBJECT_TIME: i64 = 5;
pub const MIN_DOWNLOAD_TIME: i64 = 2;
pub const MAX_DOWNLOAD_TIME: i64 = 60;
pub const MIN_GC_TIME: i64 = 300;
pub const MAX_GC_TIME: i64 = 600;
pub const MIN_RECOVER_TIME: i64 = 10;
pub const MAX_RECOVER_TIME: i64 = 50;
pub const MIN_MIGRATE_GVG_TIME: i64 = 1800;
pub const MAX_MIGRATE_GVG_TIME: i64 = 3600;

pub const MIN_REPLICATE_RETRY: u64 = 2;
pub const MAX_REPLICATE_RETRY: u64 = 6;
pub const MIN_RECEIVE_CONFIRM_RETRY: u64 = 2;
pub const MAX_RECEIVE_CONFIRM_RETRY: u64 = 6;
pub const MIN_SEAL_OBJECT_RETRY: u64 = 3;
pub const MAX_SEAL_OBJECT_RETRY: u64 = 10;
pub const MIN_GC_RETRY: u64 = 2;
pub const MAX_GC_RETRY: u64 = 5;
pub const MIN_RECOVER_RETRY: u64 = 2;
pub const MAX_RECOVER_RETRY: u64 = 3;
pub const MIN_MIGRATE_GVG_RETRY: u64 = 2;
pub const MAX_MIGRATE_GVG_RETRY: u64 = 3;

/// Priority for receive and recover: a quarter of the smaller default.
pub const RECEIVE_TASK_PRIORITY: TaskPriority = DEFAULT_SMALLER_PRIORITY / 4;

fn clamp_i64(v: i64, min: i64, max: i64) -> i64 {
    v.clamp(min, max)
}

fn clamp_u64(v: u64, min: u64, max: u64) -> u64 {
    v.clamp(min, max)
}

/// Whole-second transfer timeout for `size` bytes at `speed` (0 → default),
/// clamped into [min, max].
fn transfer_timeout(size: u64, speed: u64, min: i64, max: i64) -> i64 {
    let speed = if speed == 0 { DEFAULT_SPEED_BPS } else { speed };
    let raw = (size / speed) as i64;
    clamp_i64(raw, min, max)
}

/// The per-task timeout in seconds. Approval kinds return
/// [`NOT_USE_TIMEOUT`].
pub fn task_timeout(kind: TaskType, payload_size: u64, cfg: &TaskPolicyConfig) -> i64 {
    match kind {
        TaskType::CreateBucketApproval
        | TaskType::MigrateBucketApproval
        | TaskType::CreateObjectApproval
        | TaskType::ReplicatePieceApproval => NOT_USE_TIMEOUT,
        TaskType::Upload => {
            transfer_timeout(payload_size, cfg.upload_speed, MIN_UPLOAD_TIME, MAX_UPLOAD_TIME)
        }
        TaskType::ReplicatePiece => transfer_timeout(
            payload_size,
            cfg.replicate_speed,
            MIN_REPLICATE_TIME,
            MAX_REPLICATE_TIME,
        ),
        TaskType::ReceivePiece => transfer_timeout(
            payload_size,
            cfg.receive_speed,
            MIN_RECEIVE_TIME,
            MAX_RECEIVE_TIME,
        ),
        TaskType::SealObject => {
            clamp_i64(cfg.seal_object_timeout, MIN_SEAL_OBJECT_TIME, MAX_SEAL_OBJECT_TIME)
        }
        TaskType::DownloadObject | TaskType::DownloadPiece | TaskType::ChallengePiece => {
            transfer_timeout(
                payload_size,
                cfg.download_speed,
                MIN_DOWNLOAD_TIME,
                MAX_DOWNLOAD_TIME,
            )
        }
        TaskType::GCObject => clamp_i64(cfg.gc_object_timeout, MIN_GC_TIME, MAX_GC_TIME),
        TaskType::GCZombiePiece => {
            clamp_i64(cfg.gc_zombie_timeout, MIN_GC_TIME, MAX_GC_TIME)
        }
        TaskType::GCMeta => clamp_i64(cfg.gc_meta_timeout, MIN_GC_TIME, MAX_GC_TIME),
        TaskType::RecoverPiece => transfer_timeout(
            payload_size,
            cfg.download_speed,
            MIN_RECOVER_TIME,
            MAX_RECOVER_TIME,
        ),
        TaskType::MigrateGVG => {
            clamp_i64(cfg.migrate_gvg_timeout, MIN_MIGRATE_GVG_TIME, MAX_MIGRATE_GVG_TIME)
        }
        TaskType::Unknown => NOT_USE_TIMEOUT,
    }
}

/// The per-task max retry. Caller-driven kinds return [`NOT_USE_RETRY`].
pub fn task_max_retry(kind: TaskType, cfg: &TaskPolicyConfig) -> u64 {
    match kind {
        TaskType::ReplicatePiece => {
            clamp_u64(cfg.replicate_retry, MIN_REPLICATE_RETRY, MAX_REPLICATE_RETRY)
        }
        TaskType::ReceivePiece => clamp_u64(
            cfg.receive_confirm_retry,
            MIN_RECEIVE_CONFIRM_RETRY,
            MAX_RECEIVE_CONFIRM_RETRY,
        ),
        TaskType::SealObject => {
            clamp_u64(cfg.seal_object_retry, MIN_SEAL_OBJECT_RETRY, MAX_SEAL_OBJECT_RETRY)
        }
        TaskType::GCObject | TaskType::GCZombiePiece | TaskType::GCMeta => {
            clamp_u64(cfg.gc_object_retry, MIN_GC_RETRY, MAX_GC_RETRY)
        }
        TaskType::RecoverPiece => {
            clamp_u64(cfg.recover_retry, MIN_RECOVER_RETRY, MAX_RECOVER_RETRY)
        }
        TaskType::MigrateGVG => {
            clamp_u64(cfg.migrate_gvg_retry, MIN_MIGRATE_GVG_RETRY, MAX_MIGRATE_GVG_RETRY)
        }
        _ => NOT_USE_RETRY,
    }
}

/// Fixed priority per kind. Kinds the manager never dispatches are
/// [`UNSCHEDULING_PRIORITY`]: their execution is synchronous with the
/// requesting user, so the request itself carries the urgency.
pub fn task_priority(kind: TaskType) -> TaskPriority {
    match kind {
        TaskType::ReplicatePiece => MAX_TASK_PRIORITY,
        TaskType::ReceivePiece | TaskType::RecoverPiece => RECEIVE_TASK_PRIORITY,
        TaskType::SealObject | TaskType::MigrateGVG => DEFAULT_SMALLER_PRIORITY,
        _ => UNSCHEDULING_PRIORITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TaskPolicyConfig {
        TaskPolicyConfig::default()
    }

    #[test]
    fn upload_timeout_clamps_both_ends() {
        // 301 seconds worth of payload at the default speed clamps to max.
        let size = 301 * DEFAULT_SPEED_BPS;
        assert_eq!(task_timeout(TaskType::Upload, size, &cfg()), MAX_UPLOAD_TIME);
        // zero payload clamps to min
        assert_eq!(task_timeout(TaskType::Upload, 0, &cfg()), MIN_UPLOAD_TIME);
    }

    #[test]
    fn upload_timeout_in_range_is_exact() {
        let size = 10 * DEFAULT_SPEED_BPS;
        assert_eq!(task_timeout(TaskType::Upload, size, &cfg()), 10);
    }

    #[test]
    fn download_timeout_clamp_is_symmetric() {
        // Regression: a computed value above the max must clamp to the max,
        // not fall back to the min.
        let huge = 10_000 * DEFAULT_SPEED_BPS;
        assert_eq!(
            task_timeout(TaskType::DownloadObject, huge, &cfg()),
            MAX_DOWNLOAD_TIME
        );
        assert_eq!(task_timeout(TaskType::DownloadPiece, huge, &cfg()), MAX_DOWNLOAD_TIME);
        assert_eq!(
            task_timeout(TaskType::ChallengePiece, huge, &cfg()),
            MAX_DOWNLOAD_TIME
        );
    }

    #[test]
    fn configured_speed_drives_the_quotient() {
        let mut c = cfg();
        c.upload_speed = 1024;
        assert_eq!(task_timeout(TaskType::Upload, 20 * 1024, &c), 20);
    }

    #[test]
    fn approval_kinds_have_no_timeout() {
        for kind in [
            TaskType::CreateBucketApproval,
            TaskType::MigrateBucketApproval,
            TaskType::CreateObjectApproval,
            TaskType::ReplicatePieceApproval,
        ] {
            assert_eq!(task_timeout(kind, 1 << 30, &cfg()), NOT_USE_TIMEOUT);
        }
    }

    #[test]
    fn fixed_timeouts_clamp_configured_values() {
        let mut c = cfg();
        c.seal_object_timeout = 100;
        assert_eq!(task_timeout(TaskType::SealObject, 0, &c), MAX_SEAL_OBJECT_TIME);
        c.seal_object_timeout = 0;
        assert_eq!(task_timeout(TaskType::SealObject, 0, &c), MIN_SEAL_OBJECT_TIME);
        c.gc_object_timeout = 450;
        assert_eq!(task_timeout(TaskType::GCObject, 0, &c), 450);
        c.migrate_gvg_timeout = 2000;
        assert_eq!(task_timeout(TaskType::MigrateGVG, 0, &c), 2000);
    }

    #[test]
    fn retry_clamps() {
        let mut c = cfg();
        assert_eq!(task_max_retry(TaskType::ReplicatePiece, &c), MIN_REPLICATE_RETRY);
        c.replicate_retry = 100;
        assert_eq!(task_max_retry(TaskType::ReplicatePiece, &c), MAX_REPLICATE_RETRY);
        c.seal_object_retry = 5;
        assert_eq!(task_max_retry(TaskType::SealObject, &c), 5);
        c.gc_object_retry = 1;
        assert_eq!(task_max_retry(TaskType::GCObject, &c), MIN_GC_RETRY);
    }

    #[test]
    fn caller_driven_kinds_have_no_retry() {
        for kind in [
            TaskType::Upload,
            TaskType::DownloadObject,
            TaskType::ChallengePiece,
            TaskType::CreateBucketApproval,
        ] {
            assert_eq!(task_max_retry(kind, &cfg()), NOT_USE_RETRY);
        }
    }

    #[test]
    fn priority_table() {
        assert_eq!(task_priority(TaskType::ReplicatePiece), MAX_TASK_PRIORITY);
        assert_eq!(task_priority(TaskType::ReceivePiece), 21);
        assert_eq!(task_priority(TaskType::RecoverPiece), 21);
        assert_eq!(task_priority(TaskType::SealObject), DEFAULT_SMALLER_PRIORITY);
        assert_eq!(task_priority(TaskType::MigrateGVG), DEFAULT_SMALLER_PRIORITY);
        for kind in [
            TaskType::Unknown,
            TaskType::Upload,
            TaskType::DownloadObject,
            TaskType::DownloadPiece,
            TaskType::ChallengePiece,
            TaskType::GCObject,
            TaskType::GCZombiePiece,
            TaskType::GCMeta,
            TaskType::CreateBucketApproval,
            TaskType::MigrateBucketApproval,
            TaskType::CreateObjectApproval,
            TaskType::ReplicatePieceApproval,
        ] {
            assert_eq!(task_priority(kind), UNSCHEDULING_PRIORITY, "kind {kind}");
        }
    }
}
