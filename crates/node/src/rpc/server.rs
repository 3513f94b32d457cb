//! The RPC façade: one route per service method, each running its
//! module's pipeline.
//!
//! Pipelines follow one shape: reject a null task with the service's
//! dangling code, reserve the task's estimated footprint on the service
//! scope (exhaustion is the service's 503 code), run pre → handle → post,
//! and release the span on every exit path. Failures of a started operation
//! travel in the response's `err` field; transport-level status codes are
//! reserved for malformed requests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info_span, warn, Instrument};

use ospn_common::error::{
    CodedError, ERR_APPROVAL_EXHAUST_RESOURCE, ERR_APPROVAL_TASK_DANGLING,
    ERR_DOWNLOAD_EXHAUST_RESOURCE, ERR_DOWNLOAD_TASK_DANGLING,
    ERR_RECEIVE_EXHAUST_RESOURCE, ERR_RECEIVE_TASK_DANGLING,
    ERR_REPLICATE_APPROVAL_TASK_DANGLING, ERR_SIGN_TASK_DANGLING,
    ERR_UNSUPPORTED_TASK_TYPE, ERR_UPLOAD_EXHAUST_RESOURCE, ERR_UPLOAD_OBJECT_DANGLING,
    ERR_UPLOAD_TASK_DANGLING,
};
use ospn_task::TaskType;

use crate::app::App;
use crate::metrics::Metrics;
use crate::modules::signer::SignOutcome;
use crate::modules::{APPROVER_MODULE, DOWNLOADER_MODULE, RECEIVER_MODULE, UPLOADER_MODULE};
use crate::rpc::client::routes;
use crate::rpc::wire;
use crate::rpc::wire::*;
use crate::services::Services;

// ════════════════════════════════════════════════════════════════════════════
// ROUTER
// ════════════════════════════════════════════════════════════════════════════

pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route(routes::ASK_APPROVAL, post(ask_approval_handler))
        .route(routes::UPLOAD_OBJECT, post(upload_object_handler))
        .route(routes::DOWNLOAD_OBJECT, post(download_object_handler))
        .route(routes::DOWNLOAD_PIECE, post(download_piece_handler))
        .route(routes::CHALLENGE_INFO, post(challenge_info_handler))
        .route(routes::RECEIVE_PIECE, post(receive_piece_handler))
        .route(routes::RECEIVE_DONE, post(receive_done_handler))
        .route(routes::MANAGE_BEGIN, post(begin_task_handler))
        .route(routes::MANAGE_ASK, post(ask_task_handler))
        .route(routes::MANAGE_REPORT, post(report_task_handler))
        .route(routes::MANAGE_QUERY_TASK, post(query_task_handler))
        .route(routes::MANAGE_QUERY_TASKS, post(query_tasks_handler))
        .route(routes::SIGN, post(sign_handler))
        .route(routes::P2P_ASK_APPROVAL, post(p2p_ask_approval_handler))
        .route(routes::P2P_BOOTSTRAP, post(p2p_bootstrap_handler))
        .route(routes::AUTH_VERIFY, post(auth_verify_handler))
        .route(routes::AUTH_NONCE, post(auth_nonce_handler))
        .route(routes::AUTH_UPDATE_KEY, post(auth_update_key_handler))
        .route(routes::AUTH_VERIFY_OFFCHAIN, post(auth_verify_offchain_handler))
        .route(routes::QUERY_RESOURCE, post(query_resource_handler))
        .layer(DefaultBodyLimit::max(MAX_RPC_MSG_SIZE))
        .with_state(app)
}

/// Health and counters, bound separately from the service façade.
pub fn build_monitor_router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .with_state(services)
}

async fn metrics_handler(State(services): State<Arc<Services>>) -> String {
    services.metrics().render_text()
}

fn reply<T: Serialize>(value: &T) -> Response {
    match wire::encode(value) {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) => {
            warn!(err = %e, "response encode failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Malformed request bytes are a transport fault, not a coded error.
macro_rules! decode_or_400 {
    ($body:expr) => {
        match wire::decode(&$body) {
            Ok(req) => req,
            Err(e) => {
                debug!(err = %e, "request decode failed");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    };
}

// ════════════════════════════════════════════════════════════════════════════
// APPROVAL SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn ask_approval(app: &App, req: AskApprovalRequest) -> AskApprovalResponse {
    let refuse = |err: CodedError| AskApprovalResponse { allowed: false, task: None, err: Some(err) };
    let Some(mut task) = req.task else {
        return refuse(ERR_APPROVAL_TASK_DANGLING.to_err());
    };
    let approver = match app.handles().approver() {
        Ok(a) => Arc::clone(a),
        Err(e) => return refuse(e),
    };
    task.apply_policy(&app.services().config().task);

    let span = match app
        .services()
        .resource_manager()
        .reserve(APPROVER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return refuse(ERR_APPROVAL_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };

    let pipeline_span = info_span!("ask_approval", task_key = %task.key());
    let outcome: Result<bool, CodedError> = async {
        match task.kind() {
            TaskType::CreateBucketApproval => {
                approver.pre_create_bucket_approval(&task)?;
                let allowed = approver.handle_create_bucket_approval(&mut task).await;
                approver.post_create_bucket_approval(&task);
                allowed
            }
            TaskType::MigrateBucketApproval => {
                approver.pre_migrate_bucket_approval(&task)?;
                let allowed = approver.handle_migrate_bucket_approval(&mut task).await;
                approver.post_migrate_bucket_approval(&task);
                allowed
            }
            TaskType::CreateObjectApproval => {
                approver.pre_create_object_approval(&task)?;
                let allowed = approver.handle_create_object_approval(&mut task).await;
                approver.post_create_object_approval(&task);
                allowed
            }
            TaskType::ReplicatePieceApproval => {
                approver.pre_replicate_piece_approval(&task)?;
                let allowed = approver.handle_replicate_piece_approval(&mut task).await;
                approver.post_replicate_piece_approval(&task);
                allowed
            }
            other => Err(ERR_UNSUPPORTED_TASK_TYPE.with_detail(other.to_string())),
        }
    }
    .instrument(pipeline_span)
    .await;

    span.release();
    match outcome {
        Ok(allowed) => AskApprovalResponse { allowed, task: Some(task), err: None },
        Err(e) => AskApprovalResponse { allowed: false, task: Some(task), err: Some(e) },
    }
}

async fn ask_approval_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: AskApprovalRequest = decode_or_400!(body);
    reply(&ask_approval(&app, req).await)
}

// ════════════════════════════════════════════════════════════════════════════
// UPLOAD SERVICE (streaming)
// ════════════════════════════════════════════════════════════════════════════

/// Run the streaming upload pipeline over raw body chunks. Frame 0 must
/// decode to the task descriptor; the resource reservation happens only
/// after that frame validates.
pub async fn upload_object<S>(app: &App, mut chunks: S) -> UploadObjectResponse
where
    S: Stream<Item = Result<Bytes, CodedError>> + Unpin + Send,
{
    let fail = |err: CodedError| UploadObjectResponse { err: Some(err) };
    let uploader = match app.handles().uploader() {
        Ok(u) => Arc::clone(u),
        Err(e) => return fail(e),
    };

    // first frame: the task descriptor
    let mut decoder = FrameDecoder::new();
    let first_frame: Vec<u8> = loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => break frame,
            Ok(None) => {}
            Err(e) => return fail(e),
        }
        match chunks.next().await {
            Some(Ok(chunk)) => decoder.push(&chunk),
            Some(Err(e)) => return fail(e),
            None => return fail(ERR_UPLOAD_OBJECT_DANGLING.to_err()),
        }
    };
    let begin: UploadBeginRequest = match wire::decode(&first_frame) {
        Ok(b) => b,
        Err(_) => return fail(ERR_UPLOAD_OBJECT_DANGLING.with_detail("bad descriptor frame")),
    };
    let Some(mut task) = begin.task else {
        return fail(ERR_UPLOAD_OBJECT_DANGLING.to_err());
    };
    task.apply_policy(&app.services().config().task);

    let span = match app
        .services()
        .resource_manager()
        .reserve(UPLOADER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return fail(ERR_UPLOAD_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };

    let pipeline_span = info_span!("upload_object", task_key = %task.key());
    let final_err: Option<CodedError> = async {
        if let Err(e) = uploader.pre_upload_object(&task) {
            return Some(e);
        }

        // producer/consumer byte pipe: this loop feeds, the handler drains
        let (tx, rx) = mpsc::channel::<Result<Bytes, CodedError>>(16);
        let consumer = {
            let uploader = Arc::clone(&uploader);
            let task = task.clone();
            tokio::spawn(async move { uploader.handle_upload_object(&task, rx).await })
        };

        let mut pump_err: Option<CodedError> = None;
        'pump: loop {
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => {
                        if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                            // consumer exited; its error is authoritative
                            break 'pump;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        pump_err = Some(e);
                        break 'pump;
                    }
                }
            }
            match chunks.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    pump_err = Some(e);
                    break;
                }
                None => break,
            }
        }
        if let Some(e) = &pump_err {
            // close the pipe with the error so the consumer aborts
            let _ = tx.send(Err(e.clone())).await;
        }
        drop(tx);

        let handled = match consumer.await {
            Ok(result) => result,
            Err(join_err) => Err(CodedError::internal(join_err.to_string())),
        };
        handled.err().or(pump_err)
    }
    .instrument(pipeline_span)
    .await;

    uploader.post_upload_object(&task, final_err.as_ref());
    span.release();

    // hand the outcome to the manager so the replicate step can follow
    if let Ok(manager) = app.handles().manager() {
        task.meta.error = final_err.clone();
        if let Err(e) = manager.report_task(task).await {
            debug!(err = %e, "upload outcome not reported to manager");
        }
    }
    UploadObjectResponse { err: final_err }
}

async fn upload_object_handler(State(app): State<Arc<App>>, body: Body) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let chunks = body
        .into_data_stream()
        .map(|item| {
            item.map_err(|e| {
                ospn_common::error::ERR_UPLOAD_STREAM_BROKEN.with_detail(e.to_string())
            })
        })
        .boxed();
    reply(&upload_object(&app, chunks).await)
}

// ════════════════════════════════════════════════════════════════════════════
// DOWNLOAD SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn download_object(app: &App, req: DownloadObjectRequest) -> DownloadObjectResponse {
    let fail = |err: CodedError| DownloadObjectResponse { data: Vec::new(), err: Some(err) };
    let Some(mut task) = req.task else {
        return fail(ERR_DOWNLOAD_TASK_DANGLING.to_err());
    };
    let downloader = match app.handles().downloader() {
        Ok(d) => Arc::clone(d),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    let span = match app
        .services()
        .resource_manager()
        .reserve(DOWNLOADER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return fail(ERR_DOWNLOAD_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };
    let outcome = {
        let _guard = info_span!("download_object", task_key = %task.key()).entered();
        downloader.pre_download_object(&task).and_then(|()| {
            let data = downloader.handle_download_object(&task);
            downloader.post_download_object(&task);
            data
        })
    };
    span.release();
    match outcome {
        Ok(data) => DownloadObjectResponse { data, err: None },
        Err(e) => fail(e),
    }
}

async fn download_object_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: DownloadObjectRequest = decode_or_400!(body);
    reply(&download_object(&app, req).await)
}

pub async fn download_piece(app: &App, req: DownloadPieceRequest) -> DownloadPieceResponse {
    let fail = |err: CodedError| DownloadPieceResponse { data: Vec::new(), err: Some(err) };
    let Some(mut task) = req.task else {
        return fail(ERR_DOWNLOAD_TASK_DANGLING.to_err());
    };
    let downloader = match app.handles().downloader() {
        Ok(d) => Arc::clone(d),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    let span = match app
        .services()
        .resource_manager()
        .reserve(DOWNLOADER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return fail(ERR_DOWNLOAD_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };
    let outcome = {
        let _guard = info_span!("download_piece", task_key = %task.key()).entered();
        downloader.pre_download_piece(&task).and_then(|()| {
            let data = downloader.handle_download_piece(&task);
            downloader.post_download_piece(&task);
            data
        })
    };
    span.release();
    match outcome {
        Ok(data) => DownloadPieceResponse { data, err: None },
        Err(e) => fail(e),
    }
}

async fn download_piece_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: DownloadPieceRequest = decode_or_400!(body);
    reply(&download_piece(&app, req).await)
}

pub async fn challenge_info(app: &App, req: ChallengeInfoRequest) -> ChallengeInfoResponse {
    let fail = |err: CodedError| ChallengeInfoResponse {
        integrity_hash: Vec::new(),
        checksums: Vec::new(),
        data: Vec::new(),
        err: Some(err),
    };
    let Some(mut task) = req.task else {
        return fail(ERR_DOWNLOAD_TASK_DANGLING.to_err());
    };
    let downloader = match app.handles().downloader() {
        Ok(d) => Arc::clone(d),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    // memory reservation equals the task's declared estimate
    let span = match app
        .services()
        .resource_manager()
        .reserve(DOWNLOADER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return fail(ERR_DOWNLOAD_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };
    let outcome = {
        let _guard = info_span!("challenge_info", task_key = %task.key()).entered();
        downloader.pre_challenge(&task).and_then(|()| {
            let info = downloader.handle_challenge(&task);
            downloader.post_challenge(&task);
            info
        })
    };
    span.release();
    match outcome {
        Ok(info) => ChallengeInfoResponse {
            integrity_hash: info.integrity_hash.to_vec(),
            checksums: info.checksums.iter().map(|c| c.to_vec()).collect(),
            data: info.piece,
            err: None,
        },
        Err(e) => fail(e),
    }
}

async fn challenge_info_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: ChallengeInfoRequest = decode_or_400!(body);
    reply(&challenge_info(&app, req).await)
}

// ════════════════════════════════════════════════════════════════════════════
// RECEIVE SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn receive_piece(app: &App, req: ReplicatePieceRequest) -> ReplicatePieceResponse {
    let fail = |err: CodedError| ReplicatePieceResponse { err: Some(err) };
    let Some(mut task) = req.task else {
        return fail(ERR_RECEIVE_TASK_DANGLING.to_err());
    };
    let receiver = match app.handles().receiver() {
        Ok(r) => Arc::clone(r),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    let span = match app
        .services()
        .resource_manager()
        .reserve(RECEIVER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return fail(ERR_RECEIVE_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };
    let outcome = {
        let _guard = info_span!("receive_piece", task_key = %task.key()).entered();
        receiver
            .pre_receive_piece(&task)
            .and_then(|()| receiver.handle_receive_piece(&task, &req.piece))
    };
    span.release();
    ReplicatePieceResponse { err: outcome.err() }
}

async fn receive_piece_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: ReplicatePieceRequest = decode_or_400!(body);
    reply(&receive_piece(&app, req).await)
}

pub async fn done_replicate(app: &App, req: DoneReplicateRequest) -> DoneReplicateResponse {
    let fail = |err: CodedError| DoneReplicateResponse {
        integrity_hash: Vec::new(),
        signature: Vec::new(),
        sp_address: String::new(),
        err: Some(err),
    };
    let Some(mut task) = req.task else {
        return fail(ERR_RECEIVE_TASK_DANGLING.to_err());
    };
    let receiver = match app.handles().receiver() {
        Ok(r) => Arc::clone(r),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    let span = match app
        .services()
        .resource_manager()
        .reserve(RECEIVER_MODULE, task.meta.estimate_limit)
    {
        Ok(span) => span,
        Err(e) => return fail(ERR_RECEIVE_EXHAUST_RESOURCE.with_detail(e.to_string())),
    };
    let outcome = {
        let _guard = info_span!("done_replicate", task_key = %task.key()).entered();
        receiver
            .pre_receive_piece(&task)
            .and_then(|()| receiver.handle_done_replicate(&task))
    };
    span.release();
    match outcome {
        Ok(confirmation) => DoneReplicateResponse {
            integrity_hash: confirmation.integrity_hash.to_vec(),
            signature: confirmation.signature,
            sp_address: confirmation.sp_address,
            err: None,
        },
        Err(e) => fail(e),
    }
}

async fn receive_done_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: DoneReplicateRequest = decode_or_400!(body);
    reply(&done_replicate(&app, req).await)
}

// ════════════════════════════════════════════════════════════════════════════
// MANAGE SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn begin_task(app: &App, req: BeginTaskRequest) -> BeginTaskResponse {
    let fail = |err: CodedError| BeginTaskResponse { err: Some(err) };
    let Some(mut task) = req.task else {
        return fail(ERR_UPLOAD_TASK_DANGLING.to_err());
    };
    let manager = match app.handles().manager() {
        Ok(m) => Arc::clone(m),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    let _guard = info_span!("begin_task", task_key = %task.key()).entered();
    BeginTaskResponse { err: manager.begin_task(task).err() }
}

async fn begin_task_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: BeginTaskRequest = decode_or_400!(body);
    reply(&begin_task(&app, req).await)
}

pub async fn ask_task(app: &App, req: AskTaskRequest, peer: &str) -> AskTaskResponse {
    let manager = match app.handles().manager() {
        Ok(m) => Arc::clone(m),
        Err(e) => return AskTaskResponse { task: None, err: Some(e) },
    };
    match manager.ask_task(&req.node_limit, peer) {
        Ok(task) => AskTaskResponse { task: Some(task), err: None },
        Err(e) => AskTaskResponse { task: None, err: Some(e) },
    }
}

async fn ask_task_handler(
    State(app): State<Arc<App>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: AskTaskRequest = decode_or_400!(body);
    reply(&ask_task(&app, req, &peer.to_string()).await)
}

pub async fn report_task(app: &App, req: ReportTaskRequest) -> ReportTaskResponse {
    let fail = |err: CodedError| ReportTaskResponse { err: Some(err) };
    let Some(task) = req.task else {
        return fail(ERR_UPLOAD_TASK_DANGLING.to_err());
    };
    let manager = match app.handles().manager() {
        Ok(m) => Arc::clone(m),
        Err(e) => return fail(e),
    };
    let outcome = manager
        .report_task(task)
        .instrument(info_span!("report_task"))
        .await;
    ReportTaskResponse { err: outcome.err() }
}

async fn report_task_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: ReportTaskRequest = decode_or_400!(body);
    reply(&report_task(&app, req).await)
}

pub async fn query_task(app: &App, req: QueryTaskRequest) -> QueryTaskResponse {
    let manager = match app.handles().manager() {
        Ok(m) => Arc::clone(m),
        Err(e) => return QueryTaskResponse { task: None, err: Some(e) },
    };
    match manager.query_task(&req.key) {
        Ok(task) => QueryTaskResponse { task: Some(task), err: None },
        Err(e) => QueryTaskResponse { task: None, err: Some(e) },
    }
}

async fn query_task_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: QueryTaskRequest = decode_or_400!(body);
    reply(&query_task(&app, req).await)
}

pub async fn query_tasks(app: &App, req: QueryTasksRequest) -> QueryTasksResponse {
    let manager = match app.handles().manager() {
        Ok(m) => Arc::clone(m),
        Err(e) => return QueryTasksResponse { task_infos: Vec::new(), err: Some(e) },
    };
    QueryTasksResponse { task_infos: manager.query_tasks(&req.sub_key), err: None }
}

async fn query_tasks_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: QueryTasksRequest = decode_or_400!(body);
    reply(&query_tasks(&app, req).await)
}

// ════════════════════════════════════════════════════════════════════════════
// SIGN SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn sign(app: &App, req: SignRequest) -> SignResponse {
    let fail = |err: CodedError| SignResponse {
        signature: Vec::new(),
        tx_hash: String::new(),
        err: Some(err),
    };
    let Some(op) = req.op else {
        return fail(ERR_SIGN_TASK_DANGLING.to_err());
    };
    let signer = match app.handles().signer() {
        Ok(s) => Arc::clone(s),
        Err(e) => return fail(e),
    };
    match signer.handle(op).await {
        Ok(SignOutcome::Signature(signature)) => {
            SignResponse { signature, tx_hash: String::new(), err: None }
        }
        Ok(SignOutcome::TxHash(tx_hash)) => {
            SignResponse { signature: Vec::new(), tx_hash, err: None }
        }
        Err(e) => fail(e),
    }
}

async fn sign_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: SignRequest = decode_or_400!(body);
    reply(&sign(&app, req).await)
}

// ════════════════════════════════════════════════════════════════════════════
// P2P SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn p2p_ask_replicate_approval(
    app: &App,
    req: AskReplicateApprovalRequest,
) -> AskReplicateApprovalResponse {
    let fail = |err: CodedError| AskReplicateApprovalResponse {
        approvals: Vec::new(),
        err: Some(err),
    };
    let Some(mut task) = req.task else {
        return fail(ERR_REPLICATE_APPROVAL_TASK_DANGLING.to_err());
    };
    if task.kind() != TaskType::ReplicatePieceApproval {
        return fail(ERR_UNSUPPORTED_TASK_TYPE.with_detail(task.kind().to_string()));
    }
    let p2p = match app.handles().p2p() {
        Ok(p) => Arc::clone(p),
        Err(e) => return fail(e),
    };
    task.apply_policy(&app.services().config().task);
    let outcome = p2p
        .ask_secondary_replicate_piece_approval(
            &task,
            req.min_approvals,
            req.max_approvals,
            req.timeout_secs,
        )
        .instrument(info_span!("ask_replicate_approval", task_key = %task.key()))
        .await;
    match outcome {
        Ok(approvals) => AskReplicateApprovalResponse { approvals, err: None },
        Err(e) => fail(e),
    }
}

async fn p2p_ask_approval_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: AskReplicateApprovalRequest = decode_or_400!(body);
    reply(&p2p_ask_replicate_approval(&app, req).await)
}

pub async fn p2p_bootstrap(app: &App) -> QueryBootstrapResponse {
    match app.handles().p2p() {
        Ok(p2p) => QueryBootstrapResponse { peers: p2p.query_bootstrap(), err: None },
        Err(e) => QueryBootstrapResponse { peers: Vec::new(), err: Some(e) },
    }
}

async fn p2p_bootstrap_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let _req: QueryBootstrapRequest = decode_or_400!(body);
    reply(&p2p_bootstrap(&app).await)
}

// ════════════════════════════════════════════════════════════════════════════
// AUTH SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn auth_verify(app: &App, req: VerifyAuthRequest) -> VerifyAuthResponse {
    let authenticator = match app.handles().authenticator() {
        Ok(a) => Arc::clone(a),
        Err(e) => return VerifyAuthResponse { allowed: false, err: Some(e) },
    };
    match authenticator.verify_authentication(req.op, &req.account, &req.bucket, &req.object)
    {
        Ok(allowed) => VerifyAuthResponse { allowed, err: None },
        Err(e) => VerifyAuthResponse { allowed: false, err: Some(e) },
    }
}

async fn auth_verify_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: VerifyAuthRequest = decode_or_400!(body);
    reply(&auth_verify(&app, req).await)
}

pub async fn auth_nonce(app: &App, req: GetAuthNonceRequest) -> GetAuthNonceResponse {
    let fail = |err: CodedError| GetAuthNonceResponse {
        current_nonce: 0,
        next_nonce: 0,
        current_public_key: Vec::new(),
        expiry_ms: 0,
        err: Some(err),
    };
    let authenticator = match app.handles().authenticator() {
        Ok(a) => Arc::clone(a),
        Err(e) => return fail(e),
    };
    match authenticator.get_auth_nonce(&req.account, &req.domain) {
        Ok((current_nonce, next_nonce, current_public_key, expiry_ms)) => {
            GetAuthNonceResponse {
                current_nonce,
                next_nonce,
                current_public_key,
                expiry_ms,
                err: None,
            }
        }
        Err(e) => fail(e),
    }
}

async fn auth_nonce_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: GetAuthNonceRequest = decode_or_400!(body);
    reply(&auth_nonce(&app, req).await)
}

pub async fn auth_update_key(
    app: &App,
    req: UpdateUserPublicKeyRequest,
) -> UpdateUserPublicKeyResponse {
    let authenticator = match app.handles().authenticator() {
        Ok(a) => Arc::clone(a),
        Err(e) => return UpdateUserPublicKeyResponse { err: Some(e) },
    };
    let outcome = authenticator.update_user_public_key(
        &req.account,
        &req.domain,
        req.current_nonce,
        req.nonce,
        req.public_key,
        req.expiry_ms,
    );
    UpdateUserPublicKeyResponse { err: outcome.err() }
}

async fn auth_update_key_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: UpdateUserPublicKeyRequest = decode_or_400!(body);
    reply(&auth_update_key(&app, req).await)
}

pub async fn auth_verify_offchain(
    app: &App,
    req: VerifyOffChainSignatureRequest,
) -> VerifyOffChainSignatureResponse {
    let authenticator = match app.handles().authenticator() {
        Ok(a) => Arc::clone(a),
        Err(e) => return VerifyOffChainSignatureResponse { ok: false, err: Some(e) },
    };
    match authenticator.verify_off_chain_signature(
        &req.account,
        &req.domain,
        &req.signature,
        &req.real_msg,
    ) {
        Ok(()) => VerifyOffChainSignatureResponse { ok: true, err: None },
        Err(e) => VerifyOffChainSignatureResponse { ok: false, err: Some(e) },
    }
}

async fn auth_verify_offchain_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let req: VerifyOffChainSignatureRequest = decode_or_400!(body);
    reply(&auth_verify_offchain(&app, req).await)
}

// ════════════════════════════════════════════════════════════════════════════
// RESOURCE SERVICE
// ════════════════════════════════════════════════════════════════════════════

pub async fn query_resource(app: &App) -> QueryResourceResponse {
    let rcmgr = app.services().resource_manager();
    QueryResourceResponse {
        limit: *rcmgr.system_scope().limit(),
        usage: rcmgr.system_usage(),
        err: None,
    }
}

async fn query_resource_handler(State(app): State<Arc<App>>, body: Bytes) -> Response {
    Metrics::incr(&app.services().metrics().rpc_requests);
    let _req: QueryResourceRequest = decode_or_400!(body);
    reply(&query_resource(&app).await)
}
