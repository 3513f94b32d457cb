//! # OSPN Task Crate
//!
//! The universal unit of work and its scheduling policy:
//!
//! - `types`: task kinds, priorities and bands, keys, common metadata
//! - `task`: per-kind payloads and the tagged task union
//! - `policy`: pure timeout / retry / priority functions
//! - `queue`: the manager's keyed task pool with deterministic selection
//!
//! ## Scheduling model
//!
//! A task is either scheduling-eligible (priority above the unscheduling
//! sentinel — the manager dispatches it to executors) or caller-driven
//! (approvals, upload, download, challenge — executed synchronously with the
//! request that carries them).

pub mod policy;
pub mod queue;
pub mod task;
pub mod types;

pub use queue::{QueueError, TaskQueue, TaskState};
pub use task::{
    BucketInfo, ObjectInfo, SecondaryConfirmation, StorageParams, Task, TaskBody,
};
pub use types::{
    priority_band, TaskKey, TaskMeta, TaskPriority, TaskType, DEFAULT_LARGER_PRIORITY,
    DEFAULT_SMALLER_PRIORITY, MAX_TASK_PRIORITY, UNSCHEDULING_PRIORITY,
};
