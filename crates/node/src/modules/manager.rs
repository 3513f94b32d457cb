//! # The Manager
//!
//! Owns the pool of dispatchable tasks and drives the dispatch–execute–
//! report cycle: uploads are registered with `begin_task`, executors pull
//! work with `ask_task` within their capability envelope, and `report_task`
//! records outcomes and advances the object pipeline
//! (upload → replicate → seal).
//!
//! ## State machine (per dispatchable task)
//!
//! ```text
//! Pending ──ask_task──▶ Dispatched ──report ok──▶ done (removed)
//!    ▲                      │
//!    └──────retry budget────┘ report err / timeout
//!                             (terminal once retry ≥ max_retry)
//! ```
//!
//! Dispatch is atomic with respect to report: the task leaves the pool and
//! re-enters as Dispatched under one pool lock sequence, so a report can
//! only ever observe a task the manager actually handed out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ospn_common::error::{
    CodedError, ERR_NO_SUCH_TASK, ERR_NO_TASK_MATCH_LIMIT, ERR_REPEATED_TASK,
    ERR_TASK_QUEUE_FULL, ERR_UNSUPPORTED_TASK_TYPE,
};
use ospn_common::now_secs;
use ospn_rcmgr::Limit;

use crate::metrics::Metrics;
use crate::modules::{Module, MANAGER_MODULE};
use crate::services::Services;
use crate::spdb::UploadProgress;

use ospn_chain::TxPayload;
use ospn_task::{
    QueueError, Task, TaskBody, TaskKey, TaskQueue, TaskState, TaskType,
};

pub struct ManagerModule {
    services: Arc<Services>,
    /// Dispatchable tasks: replicate, seal, receive-confirm, gc, recover,
    /// migrate.
    pool: TaskQueue,
    /// Caller-driven upload tasks, tracked for progress and queries only —
    /// never dispatched.
    uploading: TaskQueue,
}

fn queue_err(e: QueueError) -> CodedError {
    match e {
        QueueError::Full(name) => ERR_TASK_QUEUE_FULL.with_detail(name),
        QueueError::Repeated(key) => ERR_REPEATED_TASK.with_detail(key),
    }
}

impl ManagerModule {
    pub fn new(services: Arc<Services>) -> Arc<ManagerModule> {
        let cap = {
            let tasks = services.config().resource.tasks;
            if tasks > 0 {
                tasks as usize
            } else {
                ospn_rcmgr::limit::DEFAULT_TASKS as usize
            }
        };
        Arc::new(ManagerModule {
            services,
            pool: TaskQueue::new("manager-pool", cap),
            uploading: TaskQueue::new("manager-uploading", cap),
        })
    }

    // ── begin ───────────────────────────────────────────────────────────────

    /// Accept a newly created upload (or resumable upload) task.
    pub fn begin_task(&self, task: Task) -> Result<(), CodedError> {
        if task.kind() != TaskType::Upload {
            return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string()));
        }
        let object_id = match &task.body {
            TaskBody::Upload { object, .. } => object.id,
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };
        self.uploading.push(task).map_err(queue_err)?;
        let _ = self
            .services
            .db()
            .set_upload_progress(object_id, UploadProgress::Uploading);
        Metrics::incr(&self.services.metrics().tasks_begun);
        Ok(())
    }

    // ── ask ─────────────────────────────────────────────────────────────────

    /// Hand the best-fitting pending task to an executor. Sets the dispatch
    /// address and update time, bumps the retry counter, clears the last
    /// error.
    pub fn ask_task(&self, node_limit: &Limit, peer: &str) -> Result<Task, CodedError> {
        let now = now_secs();
        for dead in self.pool.sweep_exhausted(now) {
            warn!(key = %dead.key(), kind = %dead.kind(), "task timed out past retry budget");
            Metrics::incr(&self.services.metrics().tasks_reported_err);
            self.record_terminal_failure(&dead);
        }

        let mut task = self
            .pool
            .pop_by_limit(node_limit, now)
            .ok_or_else(|| ERR_NO_TASK_MATCH_LIMIT.to_err())?;
        task.meta.address = peer.to_string();
        task.meta.update_time = now;
        task.meta.retry += 1;
        task.meta.error = None;
        self.pool.push_dispatched(task.clone());
        Metrics::incr(&self.services.metrics().tasks_dispatched);
        info!(key = %task.key(), kind = %task.kind(), retry = task.meta.retry, peer, "dispatched task");
        Ok(task)
    }

    // ── report ──────────────────────────────────────────────────────────────

    /// Record an executor's outcome, routed by task kind.
    pub async fn report_task(&self, task: Task) -> Result<(), CodedError> {
        match task.kind() {
            TaskType::Upload => self.handle_upload_report(task),
            TaskType::ReplicatePiece => self.handle_replicate_report(task).await,
            TaskType::SealObject => self.handle_seal_report(task).await,
            TaskType::ReceivePiece
            | TaskType::GCObject
            | TaskType::GCZombiePiece
            | TaskType::GCMeta
            | TaskType::RecoverPiece
            | TaskType::MigrateGVG => self.handle_generic_report(task),
            other => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(other.to_string())),
        }
    }

    /// A report is only valid for a task this manager dispatched.
    fn take_dispatched(&self, key: &TaskKey) -> Result<Task, CodedError> {
        match self.pool.state_of(key) {
            Some(TaskState::Dispatched) => {
                self.pool.pop_by_key(key).ok_or_else(|| ERR_NO_SUCH_TASK.to_err())
            }
            _ => Err(ERR_NO_SUCH_TASK.with_detail(key.to_string())),
        }
    }

    /// Failed report with retry budget left: the task re-enters Pending.
    /// The recorded error stays visible until the next dispatch clears it.
    fn retry_or_drop(&self, task: Task) -> bool {
        if task.meta.retry < task.meta.max_retry {
            debug!(key = %task.key(), retry = task.meta.retry, max = task.meta.max_retry, "requeueing failed task");
            Metrics::incr(&self.services.metrics().tasks_retried);
            if let Err(e) = self.pool.push(task) {
                warn!(err = %e, "requeue failed, dropping task");
                return false;
            }
            true
        } else {
            Metrics::incr(&self.services.metrics().tasks_reported_err);
            self.record_terminal_failure(&task);
            false
        }
    }

    fn record_terminal_failure(&self, task: &Task) {
        let progress = match &task.body {
            TaskBody::ReplicatePiece { object, .. } => {
                Some((object.id, UploadProgress::ReplicateFailed))
            }
            TaskBody::SealObject { object, .. } => {
                Some((object.id, UploadProgress::SealFailed))
            }
            _ => None,
        };
        if let Some((object_id, state)) = progress {
            let _ = self.services.db().set_upload_progress(object_id, state);
        }
    }

    fn handle_upload_report(&self, task: Task) -> Result<(), CodedError> {
        let key = task.key().clone();
        if self.uploading.pop_by_key(&key).is_none() {
            return Err(ERR_NO_SUCH_TASK.with_detail(key.to_string()));
        }
        let (object, params) = match &task.body {
            TaskBody::Upload { object, params, .. } => (object.clone(), params.clone()),
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };

        if let Some(err) = &task.meta.error {
            warn!(key = %key, %err, "upload reported failed");
            Metrics::incr(&self.services.metrics().tasks_reported_err);
            let _ = self
                .services
                .db()
                .set_upload_progress(object.id, UploadProgress::UploadFailed);
            return Ok(());
        }

        Metrics::incr(&self.services.metrics().tasks_reported_ok);
        let peers = self.services.config().p2p.peers.clone();
        if peers.is_empty() {
            // single-SP deployments stop the pipeline after the payload lands
            debug!(key = %key, "no replication peers configured");
            return Ok(());
        }

        let mut replicate = Task::new(
            TaskBody::ReplicatePiece {
                object: object.clone(),
                params,
                secondary_endpoints: peers,
                confirmations: Vec::new(),
            },
            now_secs(),
        );
        replicate.apply_policy(&self.services.config().task);
        let _ = self
            .services
            .db()
            .set_upload_progress(object.id, UploadProgress::Replicating);
        info!(key = %replicate.key(), object = %object.object_name, "created replicate task");
        self.pool.push(replicate).map_err(queue_err)
    }

    async fn handle_replicate_report(&self, task: Task) -> Result<(), CodedError> {
        self.take_dispatched(task.key())?;
        let (object, params, confirmations) = match &task.body {
            TaskBody::ReplicatePiece { object, params, confirmations, .. } => {
                (object.clone(), params.clone(), confirmations.clone())
            }
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };

        if task.meta.error.is_some() {
            if !self.retry_or_drop(task) {
                warn!(object = %object.object_name, "replication failed terminally, rejecting unseal");
                self.reject_unseal(&object).await;
            }
            return Ok(());
        }

        Metrics::incr(&self.services.metrics().tasks_reported_ok);
        let mut seal = Task::new(
            TaskBody::SealObject {
                object: object.clone(),
                params,
                secondary_endpoints: confirmations.iter().map(|c| c.endpoint.clone()).collect(),
                secondary_signatures: confirmations.into_iter().map(|c| c.signature).collect(),
            },
            now_secs(),
        );
        seal.apply_policy(&self.services.config().task);
        let _ = self
            .services
            .db()
            .set_upload_progress(object.id, UploadProgress::Sealing);
        info!(key = %seal.key(), object = %object.object_name, "created seal task");
        self.pool.push(seal).map_err(queue_err)
    }

    async fn handle_seal_report(&self, task: Task) -> Result<(), CodedError> {
        self.take_dispatched(task.key())?;
        let object = match &task.body {
            TaskBody::SealObject { object, .. } => object.clone(),
            _ => return Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string())),
        };

        if task.meta.error.is_some() {
            if !self.retry_or_drop(task) {
                warn!(object = %object.object_name, "seal failed terminally, rejecting unseal");
                self.reject_unseal(&object).await;
            }
            return Ok(());
        }

        Metrics::incr(&self.services.metrics().tasks_reported_ok);
        let _ = self
            .services
            .db()
            .set_upload_progress(object.id, UploadProgress::Sealed);
        info!(object = %object.object_name, "object sealed");
        Ok(())
    }

    fn handle_generic_report(&self, task: Task) -> Result<(), CodedError> {
        self.take_dispatched(task.key())?;
        if task.meta.error.is_some() {
            self.retry_or_drop(task);
        } else {
            Metrics::incr(&self.services.metrics().tasks_reported_ok);
            debug!(key = %task.key(), kind = %task.kind(), "task reported done");
        }
        Ok(())
    }

    async fn reject_unseal(&self, object: &ospn_task::ObjectInfo) {
        let payload = TxPayload::RejectUnSealObject {
            bucket_name: object.bucket_name.clone(),
            object_name: object.object_name.clone(),
            object_id: object.id,
        };
        match self.services.signer().broadcast(payload).await {
            Ok(tx_hash) => info!(object = %object.object_name, tx_hash = %tx_hash, "rejected unseal on chain"),
            Err(e) => warn!(object = %object.object_name, err = %e, "reject unseal broadcast failed"),
        }
    }

    // ── gc ──────────────────────────────────────────────────────────────────

    /// Enqueue an object-GC sweep over a block range. GC tasks carry the
    /// unscheduling priority, so they dispatch only when nothing hotter is
    /// pending.
    pub fn enqueue_gc_object(
        &self,
        start_block: u64,
        end_block: u64,
    ) -> Result<TaskKey, CodedError> {
        let mut task = Task::new(
            TaskBody::GCObject {
                start_block,
                end_block,
                current_block: start_block,
                last_deleted_object_id: 0,
            },
            now_secs(),
        );
        task.apply_policy(&self.services.config().task);
        let key = task.key().clone();
        self.pool.push(task).map_err(queue_err)?;
        Ok(key)
    }

    // ── queries ─────────────────────────────────────────────────────────────

    pub fn query_task(&self, key: &str) -> Result<Task, CodedError> {
        self.pool
            .get_by_str(key)
            .or_else(|| self.uploading.get_by_str(key))
            .ok_or_else(|| ERR_NO_SUCH_TASK.with_detail(key))
    }

    pub fn query_tasks(&self, sub_key: &str) -> Vec<String> {
        let mut infos = self.pool.query(sub_key);
        infos.extend(self.uploading.query(sub_key));
        infos
    }

    pub fn pending_count(&self) -> usize {
        self.pool.len()
    }
}

#[async_trait]
impl Module for ManagerModule {
    fn name(&self) -> &'static str {
        MANAGER_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("manager started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!(pending = self.pool.len(), "manager stopped");
        Ok(())
    }
}
