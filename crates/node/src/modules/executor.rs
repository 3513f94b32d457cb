//! The executor: the remote side of the dispatch–execute–report cycle.
//!
//! A background loop asks the manager for work matching this node's
//! capability limit, runs the matching handler, and reports the outcome.
//! The ask goes over the RPC surface — dispatch records this executor's
//! peer address — so the same loop works whether the manager is in-process
//! or on another SP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use ospn_common::error::{CodedError, ERR_NO_SUCH_PIECE, ERR_REPLICATE_UNFINISHED};
use ospn_common::crypto::sha256;
use ospn_common::{now_millis, now_secs};
use ospn_rcmgr::Limit;

use crate::modules::{Module, EXECUTOR_MODULE};
use crate::piece_store::{primary_piece_key, secondary_piece_key};
use crate::rpc::client::NodeClient;
use crate::rpc::wire::SignOp;
use crate::services::Services;

use ospn_chain::TxPayload;
use ospn_task::{ObjectInfo, SecondaryConfirmation, Task, TaskBody, TaskType};

pub struct ExecutorModule {
    services: Arc<Services>,
    node_limit: Limit,
    ask_interval: Duration,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorModule {
    pub fn new(services: Arc<Services>) -> Arc<ExecutorModule> {
        let node_limit = *services.resource_manager().system_scope().limit();
        let interval = services.config().task.ask_task_interval_secs.max(1);
        Arc::new(ExecutorModule {
            services,
            node_limit,
            ask_interval: Duration::from_secs(interval),
            running: Mutex::new(None),
        })
    }

    async fn run_once(services: &Arc<Services>, client: &NodeClient, limit: Limit) {
        let mut task = match client.ask_task(limit).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                debug!(err = %e, "ask task failed");
                return;
            }
        };
        debug!(key = %task.key(), kind = %task.kind(), "executing task");
        if let Err(e) = execute(services, &mut task).await {
            warn!(key = %task.key(), err = %e, "task execution failed");
            task.meta.error = Some(e);
        }
        if let Err(e) = client.report_task(task).await {
            warn!(err = %e, "report task failed");
        }
    }
}

/// Route one dispatched task to its handler.
async fn execute(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    match task.kind() {
        TaskType::ReplicatePiece => replicate_object(services, task).await,
        TaskType::SealObject => seal_object(services, task).await,
        TaskType::ReceivePiece => confirm_receive(services, task),
        TaskType::GCObject => gc_object(services, task),
        TaskType::GCZombiePiece => gc_zombie(services, task),
        TaskType::GCMeta => gc_meta(services, task),
        TaskType::RecoverPiece => recover_piece(services, task).await,
        TaskType::MigrateGVG => migrate_gvg(services, task).await,
        other => Err(ospn_common::error::ERR_UNSUPPORTED_TASK_TYPE
            .with_detail(other.to_string())),
    }
}

fn internal(e: impl std::fmt::Display) -> CodedError {
    CodedError::internal(e.to_string())
}

/// Push every segment to every secondary, collect the signed confirmations.
async fn replicate_object(
    services: &Arc<Services>,
    task: &mut Task,
) -> Result<(), CodedError> {
    let (object, params, endpoints) = match &task.body {
        TaskBody::ReplicatePiece { object, params, secondary_endpoints, .. } => {
            (object.clone(), params.clone(), secondary_endpoints.clone())
        }
        _ => return Err(internal("replicate handler on wrong task body")),
    };
    let segments = params.segment_count(object.payload_size);
    let store = services.piece_store();

    let mut confirmations: Vec<SecondaryConfirmation> = Vec::with_capacity(endpoints.len());
    for (replicate_idx, endpoint) in endpoints.iter().enumerate() {
        let peer = NodeClient::new(endpoint);
        for segment_idx in 0..segments {
            let key = primary_piece_key(object.id, segment_idx);
            let piece = store
                .get_piece(&key)
                .map_err(internal)?
                .ok_or_else(|| ERR_NO_SUCH_PIECE.with_detail(&key))?;
            let mut receive = Task::new(
                TaskBody::ReceivePiece {
                    object: object.clone(),
                    params: params.clone(),
                    segment_idx,
                    replicate_idx: replicate_idx as u32,
                    piece_size: piece.len() as u64,
                    piece_checksum: sha256(&piece).to_vec(),
                    finished: false,
                },
                now_secs(),
            );
            receive.apply_policy(&services.config().task);
            peer.replicate_piece(receive, piece).await?;
        }

        let mut done = Task::new(
            TaskBody::ReceivePiece {
                object: object.clone(),
                params: params.clone(),
                segment_idx: 0,
                replicate_idx: replicate_idx as u32,
                piece_size: 0,
                piece_checksum: Vec::new(),
                finished: true,
            },
            now_secs(),
        );
        done.apply_policy(&services.config().task);
        let confirmation = peer.done_replicate(done).await?;
        let integrity_hash: [u8; 32] = confirmation
            .integrity_hash
            .as_slice()
            .try_into()
            .map_err(|_| internal("confirmation integrity hash length"))?;
        confirmations.push(SecondaryConfirmation {
            endpoint: endpoint.clone(),
            sp_address: confirmation.sp_address,
            integrity_hash,
            signature: confirmation.signature,
        });
    }

    if let TaskBody::ReplicatePiece { confirmations: slot, .. } = &mut task.body {
        *slot = confirmations;
    }
    info!(object = %object.object_name, secondaries = endpoints.len(), "replication complete");
    Ok(())
}

/// Submit the seal transaction through the signer service.
async fn seal_object(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    let (object, signatures) = match &task.body {
        TaskBody::SealObject { object, secondary_signatures, .. } => {
            (object.clone(), secondary_signatures.clone())
        }
        _ => return Err(internal("seal handler on wrong task body")),
    };
    let payload = TxPayload::SealObject {
        bucket_name: object.bucket_name.clone(),
        object_name: object.object_name.clone(),
        object_id: object.id,
        // virtual-group assignment comes from the chain's vg module
        gvg_id: 0,
        secondary_signatures: signatures,
    };
    let client = NodeClient::new(services.config().rpc_address());
    let outcome = client.sign(SignOp::Broadcast(payload)).await?;
    info!(object = %object.object_name, tx_hash = %outcome.tx_hash, "seal submitted");
    Ok(())
}

/// Confirm-receive: the secondary checks its own integrity row exists for
/// the slot, proving the replication finished locally.
fn confirm_receive(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    let (object, replicate_idx) = match &task.body {
        TaskBody::ReceivePiece { object, replicate_idx, .. } => {
            (object.clone(), *replicate_idx)
        }
        _ => return Err(internal("confirm handler on wrong task body")),
    };
    let present = services
        .db()
        .get_object_integrity(object.id, Some(replicate_idx))
        .map_err(internal)?
        .is_some();
    if !present {
        return Err(ERR_REPLICATE_UNFINISHED.with_detail(&object.object_name));
    }
    Ok(())
}

/// Purge pieces and meta of objects the chain deleted inside the block
/// range.
fn gc_object(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    let (start_block, end_block) = match &task.body {
        TaskBody::GCObject { start_block, end_block, .. } => (*start_block, *end_block),
        _ => return Err(internal("gc handler on wrong task body")),
    };
    let db = services.db();
    let store = services.piece_store();
    let mut deleted = 0u64;
    for object_id in db.list_deleted_objects(start_block, end_block).map_err(internal)? {
        if let Some(meta) = db.get_object_integrity(object_id, None).map_err(internal)? {
            for seg in 0..meta.checksums.len() as u32 {
                store
                    .delete_piece(&primary_piece_key(object_id, seg))
                    .map_err(internal)?;
            }
        }
        db.delete_object_integrity(object_id).map_err(internal)?;
        deleted += 1;
        if let TaskBody::GCObject { current_block, last_deleted_object_id, .. } =
            &mut task.body
        {
            *current_block = end_block;
            *last_deleted_object_id = object_id;
        }
    }
    info!(start_block, end_block, deleted, "gc object sweep done");
    Ok(())
}

/// Purge pieces of failed uploads inside the object-id range: anything that
/// never reached Sealed and is marked failed is a zombie.
fn gc_zombie(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    let (start_object_id, end_object_id) = match &task.body {
        TaskBody::GCZombiePiece { start_object_id, end_object_id } => {
            (*start_object_id, *end_object_id)
        }
        _ => return Err(internal("gc zombie handler on wrong task body")),
    };
    use crate::spdb::UploadProgress::{ReplicateFailed, SealFailed, UploadFailed};
    let db = services.db();
    let store = services.piece_store();
    let mut purged = 0u64;
    for object_id in db.list_integrity_object_ids().map_err(internal)? {
        if object_id < start_object_id || object_id > end_object_id {
            continue;
        }
        let failed = matches!(
            db.get_upload_progress(object_id).map_err(internal)?,
            Some(UploadFailed) | Some(ReplicateFailed) | Some(SealFailed)
        );
        if !failed {
            continue;
        }
        if let Some(meta) = db.get_object_integrity(object_id, None).map_err(internal)? {
            for seg in 0..meta.checksums.len() as u32 {
                store
                    .delete_piece(&primary_piece_key(object_id, seg))
                    .map_err(internal)?;
            }
        }
        db.delete_object_integrity(object_id).map_err(internal)?;
        purged += 1;
    }
    info!(start_object_id, end_object_id, purged, "gc zombie sweep done");
    Ok(())
}

/// Meta sweep: currently expired off-chain auth keys.
fn gc_meta(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    let purged = services.db().purge_expired_auth_keys(now_millis()).map_err(internal)?;
    if let TaskBody::GCMeta { delete_count, .. } = &mut task.body {
        *delete_count += purged as u64;
    }
    info!(purged, "gc meta sweep done");
    Ok(())
}

/// Rebuild a lost primary piece from a secondary holding the same segment.
async fn recover_piece(
    services: &Arc<Services>,
    task: &mut Task,
) -> Result<(), CodedError> {
    let (object, params, segment_idx, ec_idx) = match &task.body {
        TaskBody::RecoverPiece { object, params, segment_idx, ec_idx } => {
            (object.clone(), params.clone(), *segment_idx, *ec_idx)
        }
        _ => return Err(internal("recover handler on wrong task body")),
    };
    let peers = services.config().p2p.peers.clone();
    let slots: Vec<u32> = if ec_idx >= 0 {
        vec![ec_idx as u32]
    } else {
        (0..params.secondary_count()).collect()
    };

    let expected = services
        .db()
        .get_object_integrity(object.id, None)
        .map_err(internal)?
        .and_then(|m| m.checksums.get(segment_idx as usize).copied());

    for peer in &peers {
        let client = NodeClient::new(peer);
        for slot in &slots {
            let mut fetch = Task::new(
                TaskBody::DownloadPiece {
                    object: object.clone(),
                    piece_key: secondary_piece_key(object.id, segment_idx, *slot),
                    piece_size: 0,
                    offset: 0,
                    length: 0,
                },
                now_secs(),
            );
            fetch.apply_policy(&services.config().task);
            let piece = match client.download_piece(fetch).await {
                Ok(piece) if !piece.is_empty() => piece,
                _ => continue,
            };
            if let Some(expected) = expected {
                if sha256(&piece) != expected {
                    warn!(peer = %peer, slot = *slot, "recovered piece failed checksum, trying next source");
                    continue;
                }
            }
            services
                .piece_store()
                .put_piece(&primary_piece_key(object.id, segment_idx), &piece)
                .map_err(internal)?;
            info!(object = %object.object_name, segment_idx, peer = %peer, "piece recovered");
            return Ok(());
        }
    }
    Err(ERR_NO_SUCH_PIECE
        .with_detail(format!("no source for {} segment {}", object.object_name, segment_idx)))
}

/// Pull the pieces of a migrating virtual group from the source SP. The
/// object set comes from the local SP-DB, fed by the block syncer.
async fn migrate_gvg(services: &Arc<Services>, task: &mut Task) -> Result<(), CodedError> {
    let (redundancy_idx, last_migrated, src) = match &task.body {
        TaskBody::MigrateGVG {
            redundancy_idx, last_migrated_object_id, src_sp_endpoint, ..
        } => (*redundancy_idx, *last_migrated_object_id, src_sp_endpoint.clone()),
        _ => return Err(internal("migrate handler on wrong task body")),
    };
    if src.is_empty() {
        debug!("no migration source configured, nothing to pull");
        return Ok(());
    }
    let client = NodeClient::new(&src);
    let db = services.db();
    let store = services.piece_store();
    let mut migrated = 0u64;
    for object_id in db.list_integrity_object_ids().map_err(internal)? {
        if object_id <= last_migrated {
            continue;
        }
        let meta = match db.get_object_integrity(object_id, None).map_err(internal)? {
            Some(meta) => meta,
            None => continue,
        };
        for seg in 0..meta.checksums.len() as u32 {
            let key = if redundancy_idx < 0 {
                primary_piece_key(object_id, seg)
            } else {
                secondary_piece_key(object_id, seg, redundancy_idx as u32)
            };
            if store.has_piece(&key).map_err(internal)? {
                continue;
            }
            let mut fetch = Task::new(
                TaskBody::DownloadPiece {
                    object: ObjectInfo { id: object_id, ..ObjectInfo::default() },
                    piece_key: key.clone(),
                    piece_size: 0,
                    offset: 0,
                    length: 0,
                },
                now_secs(),
            );
            fetch.apply_policy(&services.config().task);
            let piece = client.download_piece(fetch).await?;
            store.put_piece(&key, &piece).map_err(internal)?;
        }
        migrated += 1;
        if let TaskBody::MigrateGVG { last_migrated_object_id, .. } = &mut task.body {
            *last_migrated_object_id = object_id;
        }
    }
    info!(migrated, "gvg migration pass done");
    Ok(())
}

#[async_trait]
impl Module for ExecutorModule {
    fn name(&self) -> &'static str {
        EXECUTOR_MODULE
    }

    async fn start(&self) -> anyhow::Result<()> {
        let services = Arc::clone(&self.services);
        let client = NodeClient::new(services.config().rpc_address());
        let limit = self.node_limit;
        let interval = self.ask_interval;
        let shutdown = services.shutdown().clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "executor loop running");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("executor shutting down");
                        break;
                    }
                    _ = sleep(interval) => {
                        ExecutorModule::run_once(&services, &client, limit).await;
                    }
                }
            }
        });
        *self.running.lock() = Some(handle);
        info!("executor started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.running.lock().take() {
            handle.abort();
        }
        info!("executor stopped");
        Ok(())
    }
}
