//! Service pipeline tests: the per-operation pre/handle/post flows, the
//! manager's dispatch cycle, and the streaming uploader, all against the
//! in-memory collaborators and the mock chain.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream;

use ospn_chain::{ChainClient, MockChainClient, SignerRole, TxPayload};
use ospn_common::crypto::{sha256, RoleKey};
use ospn_common::error::CodedError;
use ospn_common::{now_millis, now_secs, SpConfig};
use ospn_node::modules::receiver::confirmation_signing_bytes;
use ospn_node::modules::APPROVER_MODULE;
use ospn_node::registry::{register_default_modules, ModuleRegistry};
use ospn_node::rpc::server;
use ospn_node::rpc::wire::{
    AskApprovalRequest, AskReplicateApprovalRequest, AuthOp, BeginTaskRequest,
    ChallengeInfoRequest, DoneReplicateRequest, DownloadObjectRequest,
    GetAuthNonceRequest, QueryTaskRequest, QueryTasksRequest, ReplicatePieceRequest,
    SignOp, SignRequest, UpdateUserPublicKeyRequest, UploadBeginRequest,
    VerifyAuthRequest, VerifyOffChainSignatureRequest,
};
use ospn_node::rpc::wire;
use ospn_node::spdb::UploadProgress;
use ospn_node::{App, Services};
use ospn_rcmgr::{Limit, PriorityBand, ScopeStat};
use ospn_task::{
    BucketInfo, ObjectInfo, SecondaryConfirmation, StorageParams, Task, TaskBody,
    TaskType, DEFAULT_SMALLER_PRIORITY, MAX_TASK_PRIORITY,
};

async fn build_app(cfg: SpConfig) -> (Arc<App>, Arc<MockChainClient>) {
    let mock = Arc::new(MockChainClient::new());
    let chain: Arc<dyn ChainClient> = mock.clone();
    let services = Services::bootstrap(cfg, chain).await.expect("bootstrap");
    let mut registry = ModuleRegistry::new();
    register_default_modules(&mut registry);
    let app = App::build(&registry, services).expect("build app");
    (app, mock)
}

fn object(id: u64, name: &str, size: u64) -> ObjectInfo {
    ObjectInfo {
        id,
        bucket_name: "bucket".into(),
        object_name: name.into(),
        owner: "0xowner".into(),
        payload_size: size,
    }
}

fn small_params() -> StorageParams {
    StorageParams { segment_size: 32_768, ..StorageParams::default() }
}

fn upload_task(id: u64, name: &str, size: u64) -> Task {
    Task::new(
        TaskBody::Upload {
            object: object(id, name, size),
            params: small_params(),
            resumable: false,
            offset: 0,
        },
        now_secs(),
    )
}

/// Stream the descriptor and payload as frames, re-chunked at awkward
/// boundaries to exercise reassembly.
fn upload_stream(
    task: Option<Task>,
    payload: &[u8],
) -> impl futures::Stream<Item = Result<Bytes, CodedError>> + Unpin + Send {
    let descriptor = wire::encode(&UploadBeginRequest { task }).expect("descriptor");
    let mut train = wire::encode_frame(&descriptor);
    for chunk in payload.chunks(9_000) {
        train.extend_from_slice(&wire::encode_frame(chunk));
    }
    let chunks: Vec<Result<Bytes, CodedError>> = train
        .chunks(7_777)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks)
}

// ════════════════════════════════════════════════════════════════════════════
// APPROVAL
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn approval_null_task_is_dangling() {
    let (app, _) = build_app(SpConfig::default()).await;
    let resp = server::ask_approval(&app, AskApprovalRequest { task: None }).await;
    assert!(!resp.allowed);
    assert_eq!(resp.err.expect("err").inner_code, 990_101);
}

#[tokio::test]
async fn approval_grants_and_signs() {
    let (app, _) = build_app(SpConfig::default()).await;
    let task = Task::new(
        TaskBody::CreateBucketApproval {
            bucket: BucketInfo { id: 1, bucket_name: "bucket".into(), owner: "0xowner".into() },
            expired_height: 0,
            signature: Vec::new(),
        },
        now_secs(),
    );
    let resp = server::ask_approval(&app, AskApprovalRequest { task: Some(task) }).await;
    assert!(resp.err.is_none(), "unexpected err: {:?}", resp.err);
    assert!(resp.allowed);
    let granted = resp.task.expect("task");
    match granted.body {
        TaskBody::CreateBucketApproval { expired_height, signature, .. } => {
            // mock chain height 0 + the approval window
            assert_eq!(expired_height, 100);
            assert!(!signature.is_empty());
        }
        other => panic!("wrong body: {other:?}"),
    }
}

#[tokio::test]
async fn approval_reservation_exhausted_leaves_counters_unchanged() {
    let cfg = SpConfig {
        resource: ospn_common::config::ResourceConfig {
            tasks: 1,
            ..Default::default()
        },
        ..SpConfig::default()
    };
    let (app, _) = build_app(cfg).await;
    let rcmgr = app.services().resource_manager();

    // saturate the single task slot
    let held = rcmgr
        .reserve(APPROVER_MODULE, ScopeStat::for_task(0, PriorityBand::Low))
        .expect("hold the only slot");
    let usage_before = rcmgr.system_usage();

    let task = Task::new(
        TaskBody::CreateBucketApproval {
            bucket: BucketInfo { id: 1, bucket_name: "bucket".into(), owner: "0xowner".into() },
            expired_height: 0,
            signature: Vec::new(),
        },
        now_secs(),
    );
    let resp =
        server::ask_approval(&app, AskApprovalRequest { task: Some(task.clone()) }).await;
    assert!(!resp.allowed);
    assert_eq!(resp.err.expect("err").inner_code, 990_102);
    assert_eq!(rcmgr.system_usage(), usage_before);

    // once the slot frees, the same request succeeds
    held.release();
    let resp = server::ask_approval(&app, AskApprovalRequest { task: Some(task) }).await;
    assert!(resp.allowed);
}

// ════════════════════════════════════════════════════════════════════════════
// UPLOAD / DOWNLOAD / CHALLENGE
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn upload_stores_segments_and_integrity() {
    let (app, _) = build_app(SpConfig::default()).await;
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let task = upload_task(7, "photo", payload.len() as u64);

    let begin =
        server::begin_task(&app, BeginTaskRequest { task: Some(task.clone()) }).await;
    assert!(begin.err.is_none());

    let resp = server::upload_object(&app, upload_stream(Some(task), &payload)).await;
    assert!(resp.err.is_none(), "unexpected err: {:?}", resp.err);

    let store = app.services().piece_store();
    let seg0 = store.get_piece("s0_7").expect("get").expect("piece");
    assert_eq!(seg0.len(), 32_768);
    assert_eq!(seg0, &payload[..32_768]);
    let seg3 = store.get_piece("s3_7").expect("get").expect("piece");
    assert_eq!(seg3.len(), 100_000 - 3 * 32_768);

    let meta = app
        .services()
        .db()
        .get_object_integrity(7, None)
        .expect("db")
        .expect("meta");
    assert_eq!(meta.checksums.len(), 4);
    assert_eq!(meta.checksums[0], sha256(&payload[..32_768]));
    assert_eq!(
        app.services().db().get_upload_progress(7).expect("db"),
        Some(UploadProgress::Uploaded)
    );
}

#[tokio::test]
async fn upload_without_descriptor_task_is_dangling() {
    let (app, _) = build_app(SpConfig::default()).await;
    let resp = server::upload_object(&app, upload_stream(None, b"data")).await;
    assert_eq!(resp.err.expect("err").inner_code, 99_111);
}

#[tokio::test]
async fn truncated_upload_surfaces_stream_broken() {
    let (app, _) = build_app(SpConfig::default()).await;
    let task = upload_task(8, "short", 100_000);
    // only 10 KiB of the declared 100 KB arrives
    let resp = server::upload_object(&app, upload_stream(Some(task), &[0u8; 10_240])).await;
    assert_eq!(resp.err.expect("err").inner_code, 99_113);
    assert_eq!(
        app.services().db().get_upload_progress(8).expect("db"),
        Some(UploadProgress::UploadFailed)
    );
}

#[tokio::test]
async fn download_and_challenge_roundtrip() {
    let (app, _) = build_app(SpConfig::default()).await;
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    let task = upload_task(9, "doc", payload.len() as u64);
    let resp = server::upload_object(&app, upload_stream(Some(task), &payload)).await;
    assert!(resp.err.is_none());

    let download = Task::new(
        TaskBody::DownloadObject {
            object: object(9, "doc", payload.len() as u64),
            params: small_params(),
            low: 100,
            high: 40_000,
        },
        now_secs(),
    );
    let resp = server::download_object(
        &app,
        DownloadObjectRequest { task: Some(download) },
    )
    .await;
    assert!(resp.err.is_none());
    assert_eq!(resp.data, &payload[100..=40_000]);

    let challenge = Task::new(
        TaskBody::ChallengePiece {
            object: object(9, "doc", payload.len() as u64),
            params: small_params(),
            segment_idx: 2,
            redundancy_idx: -1,
        },
        now_secs(),
    );
    let resp =
        server::challenge_info(&app, ChallengeInfoRequest { task: Some(challenge) }).await;
    assert!(resp.err.is_none());
    assert_eq!(resp.data, &payload[2 * 32_768..3 * 32_768]);
    assert_eq!(resp.checksums.len(), 4);
    assert_eq!(resp.checksums[2], sha256(&payload[2 * 32_768..3 * 32_768]).to_vec());
}

#[tokio::test]
async fn download_null_and_missing_object() {
    let (app, _) = build_app(SpConfig::default()).await;
    let resp = server::download_object(&app, DownloadObjectRequest { task: None }).await;
    assert_eq!(resp.err.expect("err").inner_code, 990_301);

    let download = Task::new(
        TaskBody::DownloadObject {
            object: object(404, "ghost", 10),
            params: small_params(),
            low: 0,
            high: 0,
        },
        now_secs(),
    );
    let resp =
        server::download_object(&app, DownloadObjectRequest { task: Some(download) }).await;
    assert_eq!(resp.err.expect("err").inner_code, 990_304);
}

// ════════════════════════════════════════════════════════════════════════════
// RECEIVE
// ════════════════════════════════════════════════════════════════════════════

fn receive_task(id: u64, seg: u32, slot: u32, piece: &[u8], size: u64) -> Task {
    Task::new(
        TaskBody::ReceivePiece {
            object: object(id, "replica", size),
            params: StorageParams { segment_size: 1_024, ..StorageParams::default() },
            segment_idx: seg,
            replicate_idx: slot,
            piece_size: piece.len() as u64,
            piece_checksum: sha256(piece).to_vec(),
            finished: false,
        },
        now_secs(),
    )
}

#[tokio::test]
async fn receive_and_confirm_replication() {
    let (app, _) = build_app(SpConfig::default()).await;
    let seg0 = vec![0xAB; 1_024];
    let seg1 = vec![0xCD; 1_024];

    for (seg, piece) in [(0u32, &seg0), (1u32, &seg1)] {
        let resp = server::receive_piece(
            &app,
            ReplicatePieceRequest {
                task: Some(receive_task(11, seg, 2, piece, 2_048)),
                piece: piece.clone(),
            },
        )
        .await;
        assert!(resp.err.is_none(), "unexpected err: {:?}", resp.err);
    }

    let resp = server::done_replicate(
        &app,
        DoneReplicateRequest { task: Some(receive_task(11, 0, 2, &[], 2_048)) },
    )
    .await;
    assert!(resp.err.is_none(), "unexpected err: {:?}", resp.err);
    assert!(!resp.sp_address.is_empty());

    // the stored integrity row matches the confirmation
    let meta = app
        .services()
        .db()
        .get_object_integrity(11, Some(2))
        .expect("db")
        .expect("meta");
    assert_eq!(meta.integrity_hash.to_vec(), resp.integrity_hash);

    // and the Bls signature verifies over the canonical bytes
    let msg = confirmation_signing_bytes(11, 2, &meta.integrity_hash);
    assert!(app.services().signer().verify(SignerRole::Bls, &msg, &resp.signature));
}

#[tokio::test]
async fn receive_rejects_checksum_mismatch_and_early_done() {
    let (app, _) = build_app(SpConfig::default()).await;
    let piece = vec![1u8; 1_024];
    let mut task = receive_task(12, 0, 0, &piece, 2_048);
    if let TaskBody::ReceivePiece { piece_checksum, .. } = &mut task.body {
        *piece_checksum = sha256(b"something else").to_vec();
    }
    let resp = server::receive_piece(
        &app,
        ReplicatePieceRequest { task: Some(task), piece: piece.clone() },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_803);

    // nothing received yet for slot 1: done must refuse
    let resp = server::done_replicate(
        &app,
        DoneReplicateRequest { task: Some(receive_task(12, 0, 1, &[], 2_048)) },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_804);
}

// ════════════════════════════════════════════════════════════════════════════
// MANAGER: DISPATCH CYCLE
// ════════════════════════════════════════════════════════════════════════════

fn peers_config() -> SpConfig {
    SpConfig {
        p2p: ospn_common::config::P2pConfig {
            peers: vec!["127.0.0.1:59999".into()],
            bootstrap: vec!["127.0.0.1:59998".into()],
        },
        ..SpConfig::default()
    }
}

/// Drive one object to the point where its replicate task is pending.
async fn pend_replicate(app: &App, id: u64, name: &str) -> Task {
    let manager = app.handles().manager().expect("manager");
    let mut task = upload_task(id, name, 4_096);
    task.apply_policy(&app.services().config().task);
    manager.begin_task(task.clone()).expect("begin");
    manager.report_task(task).await.expect("report upload");
    manager
        .query_tasks(&format!("object:{name}"))
        .first()
        .cloned()
        .expect("replicate task visible");
    let infos = manager.query_tasks("ReplicatePiece");
    let key = infos
        .iter()
        .filter_map(|info| info.strip_prefix("key["))
        .filter_map(|rest| rest.split(']').next())
        .find(|k| k.contains(&format!("object:{name}")))
        .expect("replicate key");
    manager.query_task(key).expect("replicate task")
}

#[tokio::test]
async fn dispatch_prefers_replicate_over_seal() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");

    // object A: replicate dispatched and reported done → seal pending
    pend_replicate(&app, 21, "alpha").await;
    let mut repl_a = manager.ask_task(&Limit::default_node(), "peer-1").expect("ask A");
    assert_eq!(repl_a.kind(), TaskType::ReplicatePiece);
    if let TaskBody::ReplicatePiece { confirmations, .. } = &mut repl_a.body {
        confirmations.push(SecondaryConfirmation {
            endpoint: "127.0.0.1:59999".into(),
            sp_address: "0xsecondary".into(),
            integrity_hash: [9; 32],
            signature: vec![1, 2, 3],
        });
    }
    manager.report_task(repl_a).await.expect("report A");

    // object B: replicate pending
    pend_replicate(&app, 22, "beta").await;

    // pool now holds seal(A, priority 85) and replicate(B, priority 255)
    let picked = manager.ask_task(&Limit::default_node(), "peer-2").expect("ask");
    assert_eq!(picked.kind(), TaskType::ReplicatePiece);
    assert_eq!(picked.meta.priority, MAX_TASK_PRIORITY);
    // dispatch postconditions
    assert_eq!(picked.meta.retry, 1);
    assert_eq!(picked.meta.address, "peer-2");
    assert!(picked.meta.error.is_none());

    let next = manager.ask_task(&Limit::default_node(), "peer-2").expect("ask seal");
    assert_eq!(next.kind(), TaskType::SealObject);
    assert_eq!(next.meta.priority, DEFAULT_SMALLER_PRIORITY);
}

#[tokio::test]
async fn ask_task_with_nothing_pending_is_no_match() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");
    let err = manager.ask_task(&Limit::default_node(), "peer").expect_err("empty");
    assert_eq!(err.inner_code, 990_603);

    // a begun upload is caller-driven and never dispatched
    let mut task = upload_task(30, "direct", 128);
    task.apply_policy(&app.services().config().task);
    manager.begin_task(task).expect("begin");
    let err = manager.ask_task(&Limit::default_node(), "peer").expect_err("still empty");
    assert_eq!(err.inner_code, 990_603);
}

#[tokio::test]
async fn ask_task_respects_the_capability_limit() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");
    pend_replicate(&app, 23, "heavy").await;

    let tiny = Limit { memory: 16, ..Limit::default_node() };
    let err = manager.ask_task(&tiny, "peer").expect_err("does not fit");
    assert_eq!(err.inner_code, 990_603);

    manager.ask_task(&Limit::default_node(), "peer").expect("fits");
}

#[tokio::test]
async fn failed_report_requeues_until_retry_budget_exhausts() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");
    pend_replicate(&app, 24, "flaky").await;

    // replicate max_retry defaults to 2
    let mut task = manager.ask_task(&Limit::default_node(), "peer").expect("ask 1");
    assert_eq!(task.meta.retry, 1);
    task.meta.error = Some(CodedError::internal("secondary unreachable"));
    manager.report_task(task).await.expect("report err 1");

    let mut task = manager.ask_task(&Limit::default_node(), "peer").expect("ask 2");
    assert_eq!(task.meta.retry, 2);
    assert!(task.meta.error.is_none(), "error clears on dispatch");
    task.meta.error = Some(CodedError::internal("secondary still unreachable"));
    manager.report_task(task).await.expect("report err 2");

    // budget exhausted: removed from the pool, marked failed
    let err = manager.ask_task(&Limit::default_node(), "peer").expect_err("drained");
    assert_eq!(err.inner_code, 990_603);
    assert_eq!(
        app.services().db().get_upload_progress(24).expect("db"),
        Some(UploadProgress::ReplicateFailed)
    );
}

#[tokio::test]
async fn report_of_undispatched_task_is_rejected() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");
    let pending = pend_replicate(&app, 25, "pending").await;

    // still Pending: the manager never dispatched it
    let err = manager.report_task(pending).await.expect_err("not dispatched");
    assert_eq!(err.inner_code, 990_604);

    let mut unknown = upload_task(26, "unknown", 64);
    unknown.apply_policy(&app.services().config().task);
    let err = manager.report_task(unknown).await.expect_err("never begun");
    assert_eq!(err.inner_code, 990_604);
}

#[tokio::test]
async fn query_task_by_key_and_sub_key() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");
    let replicate = pend_replicate(&app, 27, "findme").await;

    let found = manager.query_task(replicate.key().as_str()).expect("by key");
    assert_eq!(found.key(), replicate.key());

    let infos = manager.query_tasks("object:findme");
    assert_eq!(infos.len(), 1);
    assert!(infos[0].contains("ReplicatePiece"));

    let err = manager.query_task("no-such-key").expect_err("miss");
    assert_eq!(err.inner_code, 990_604);
    assert!(manager.query_tasks("object:absent").is_empty());

    let resp = server::query_task(
        &app,
        QueryTaskRequest { key: replicate.key().to_string() },
    )
    .await;
    assert!(resp.err.is_none());
    let resp = server::query_tasks(&app, QueryTasksRequest { sub_key: "object:findme".into() })
        .await;
    assert_eq!(resp.task_infos.len(), 1);
}

#[tokio::test]
async fn gc_tasks_dispatch_after_scheduled_work() {
    let (app, _) = build_app(peers_config()).await;
    let manager = app.handles().manager().expect("manager");
    manager.enqueue_gc_object(100, 200).expect("enqueue gc");
    pend_replicate(&app, 28, "hot").await;

    let first = manager.ask_task(&Limit::default_node(), "peer").expect("ask");
    assert_eq!(first.kind(), TaskType::ReplicatePiece);
    let second = manager.ask_task(&Limit::default_node(), "peer").expect("ask");
    assert_eq!(second.kind(), TaskType::GCObject);
}

// ════════════════════════════════════════════════════════════════════════════
// SIGN / P2P / AUTH / RESOURCE
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn sign_service_signs_and_broadcasts() {
    let (app, _mock) = build_app(SpConfig::default()).await;

    let resp = server::sign(&app, SignRequest { op: None }).await;
    assert_eq!(resp.err.expect("err").inner_code, 991_001);

    let msg = b"secondary seal confirmation".to_vec();
    let resp = server::sign(
        &app,
        SignRequest { op: Some(SignOp::SignSecondarySealBls { msg: msg.clone() }) },
    )
    .await;
    assert!(resp.err.is_none());
    assert!(app.services().signer().verify(SignerRole::Bls, &msg, &resp.signature));

    let payload = TxPayload::SealObject {
        bucket_name: "bucket".into(),
        object_name: "o".into(),
        object_id: 5,
        gvg_id: 0,
        secondary_signatures: vec![resp.signature],
    };
    let resp = server::sign(&app, SignRequest { op: Some(SignOp::Broadcast(payload)) }).await;
    assert!(resp.err.is_none(), "unexpected err: {:?}", resp.err);
    assert!(!resp.tx_hash.is_empty());
}

#[tokio::test]
async fn p2p_without_peers_cannot_reach_min_approvals() {
    let (app, _) = build_app(SpConfig::default()).await;
    let resp = server::p2p_ask_replicate_approval(
        &app,
        AskReplicateApprovalRequest { task: None, min_approvals: 1, max_approvals: 3, timeout_secs: 1 },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_701);

    let task = Task::new(
        TaskBody::ReplicatePieceApproval {
            object: object(40, "o", 10),
            expired_height: 0,
            approved_sp: String::new(),
            signature: Vec::new(),
        },
        now_secs(),
    );
    let resp = server::p2p_ask_replicate_approval(
        &app,
        AskReplicateApprovalRequest {
            task: Some(task),
            min_approvals: 1,
            max_approvals: 3,
            timeout_secs: 1,
        },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_702);

    let resp = server::p2p_bootstrap(&app).await;
    assert!(resp.err.is_none());
    assert!(resp.peers.is_empty());
}

#[tokio::test]
async fn off_chain_auth_key_lifecycle() {
    let (app, _) = build_app(SpConfig::default()).await;
    let account = "0xuser";
    let domain = "dapp.example";
    let user_key = RoleKey::generate();

    let resp = server::auth_nonce(
        &app,
        GetAuthNonceRequest { account: account.into(), domain: domain.into() },
    )
    .await;
    assert_eq!((resp.current_nonce, resp.next_nonce), (0, 1));
    assert!(resp.current_public_key.is_empty());

    // wrong current nonce refused
    let resp = server::auth_update_key(
        &app,
        UpdateUserPublicKeyRequest {
            account: account.into(),
            domain: domain.into(),
            current_nonce: 5,
            nonce: 6,
            public_key: user_key.public_key().to_vec(),
            expiry_ms: now_millis() + 60_000,
        },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_402);

    let resp = server::auth_update_key(
        &app,
        UpdateUserPublicKeyRequest {
            account: account.into(),
            domain: domain.into(),
            current_nonce: 0,
            nonce: 1,
            public_key: user_key.public_key().to_vec(),
            expiry_ms: now_millis() + 60_000,
        },
    )
    .await;
    assert!(resp.err.is_none());

    let msg = b"GET /object/doc";
    let sig = user_key.sign(msg);
    let resp = server::auth_verify_offchain(
        &app,
        VerifyOffChainSignatureRequest {
            account: account.into(),
            domain: domain.into(),
            signature: sig.clone(),
            real_msg: msg.to_vec(),
        },
    )
    .await;
    assert!(resp.ok, "unexpected err: {:?}", resp.err);

    let resp = server::auth_verify_offchain(
        &app,
        VerifyOffChainSignatureRequest {
            account: account.into(),
            domain: domain.into(),
            signature: sig,
            real_msg: b"GET /object/other".to_vec(),
        },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_404);

    // unknown account has no key
    let resp = server::auth_verify_offchain(
        &app,
        VerifyOffChainSignatureRequest {
            account: "0xother".into(),
            domain: domain.into(),
            signature: Vec::new(),
            real_msg: Vec::new(),
        },
    )
    .await;
    assert_eq!(resp.err.expect("err").inner_code, 990_405);
}

#[tokio::test]
async fn verify_authentication_rules() {
    let (app, _) = build_app(SpConfig::default()).await;
    let payload = vec![7u8; 2_000];
    let task = upload_task(50, "mine", payload.len() as u64);
    let resp = server::upload_object(&app, upload_stream(Some(task), &payload)).await;
    assert!(resp.err.is_none());

    let verify = |op, account: &str| {
        let app = Arc::clone(&app);
        let account = account.to_string();
        async move {
            server::auth_verify(
                &app,
                VerifyAuthRequest {
                    op,
                    account,
                    bucket: "bucket".into(),
                    object: "mine".into(),
                },
            )
            .await
        }
    };

    // owner may keep writing; others may not
    assert!(verify(AuthOp::PutObject, "0xowner").await.allowed);
    assert!(!verify(AuthOp::PutObject, "0xthief").await.allowed);
    // not sealed yet: owner cannot read it back
    assert!(!verify(AuthOp::GetObject, "0xowner").await.allowed);
    app.services()
        .db()
        .set_upload_progress(50, UploadProgress::Sealed)
        .expect("progress");
    assert!(verify(AuthOp::GetObject, "0xowner").await.allowed);
    // challenges are never owner-gated
    assert!(verify(AuthOp::ChallengePiece, "0xanyone").await.allowed);
}

#[tokio::test]
async fn resource_query_reports_usage() {
    let (app, _) = build_app(SpConfig::default()).await;
    let resp = server::query_resource(&app).await;
    assert!(resp.err.is_none());
    assert_eq!(resp.usage, ScopeStat::default());
    assert_eq!(resp.limit, Limit::default_node());
}
