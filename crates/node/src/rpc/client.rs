//! RPC client for the node's service façade.
//!
//! Used by executors pulling work from a manager, by primary SPs pushing
//! pieces to secondaries, and by the p2p fan-out. Bodies are bincode
//! records; a response whose embedded `err` is set surfaces as `Err`.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use ospn_common::error::{CodedError, ERR_NO_TASK_MATCH_LIMIT};
use ospn_rcmgr::Limit;
use ospn_task::Task;

use super::wire;
use super::wire::{
    AskApprovalRequest, AskApprovalResponse, AskReplicateApprovalRequest,
    AskReplicateApprovalResponse, AskTaskRequest, AskTaskResponse, BeginTaskRequest,
    BeginTaskResponse, ChallengeInfoRequest, ChallengeInfoResponse,
    DoneReplicateRequest, DoneReplicateResponse, DownloadObjectRequest,
    DownloadObjectResponse, DownloadPieceRequest, DownloadPieceResponse,
    QueryBootstrapRequest, QueryBootstrapResponse, QueryResourceRequest,
    QueryResourceResponse, QueryTaskRequest, QueryTaskResponse,
    QueryTasksRequest, QueryTasksResponse, ReplicatePieceRequest,
    ReplicatePieceResponse, ReportTaskRequest, ReportTaskResponse, SignOp, SignRequest,
    SignResponse, UploadBeginRequest, UploadObjectResponse, VerifyAuthRequest,
    VerifyAuthResponse,
};

/// Route table shared with the server.
pub mod routes {
    pub const ASK_APPROVAL: &str = "/ospn/v1/approval/ask";
    pub const UPLOAD_OBJECT: &str = "/ospn/v1/upload/object";
    pub const DOWNLOAD_OBJECT: &str = "/ospn/v1/download/object";
    pub const DOWNLOAD_PIECE: &str = "/ospn/v1/download/piece";
    pub const CHALLENGE_INFO: &str = "/ospn/v1/challenge/info";
    pub const RECEIVE_PIECE: &str = "/ospn/v1/receive/piece";
    pub const RECEIVE_DONE: &str = "/ospn/v1/receive/done";
    pub const MANAGE_BEGIN: &str = "/ospn/v1/manage/begin";
    pub const MANAGE_ASK: &str = "/ospn/v1/manage/ask";
    pub const MANAGE_REPORT: &str = "/ospn/v1/manage/report";
    pub const MANAGE_QUERY_TASK: &str = "/ospn/v1/manage/query_task";
    pub const MANAGE_QUERY_TASKS: &str = "/ospn/v1/manage/query_tasks";
    pub const SIGN: &str = "/ospn/v1/sign";
    pub const P2P_ASK_APPROVAL: &str = "/ospn/v1/p2p/ask_replicate_approval";
    pub const P2P_BOOTSTRAP: &str = "/ospn/v1/p2p/bootstrap";
    pub const AUTH_VERIFY: &str = "/ospn/v1/auth/verify";
    pub const AUTH_NONCE: &str = "/ospn/v1/auth/nonce";
    pub const AUTH_UPDATE_KEY: &str = "/ospn/v1/auth/update_key";
    pub const AUTH_VERIFY_OFFCHAIN: &str = "/ospn/v1/auth/verify_offchain";
    pub const QUERY_RESOURCE: &str = "/ospn/v1/query/resource";
}

#[derive(Clone)]
pub struct NodeClient {
    http: Client,
    base: String,
}

impl NodeClient {
    /// `endpoint` is "host:port" or a full "http://…" base URL.
    pub fn new(endpoint: &str) -> NodeClient {
        let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", endpoint.trim_end_matches('/'))
        };
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        NodeClient { http, base }
    }

    async fn call<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, CodedError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = wire::encode(req)?;
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .body(body)
            .send()
            .await
            .map_err(|e| CodedError::internal(format!("rpc send: {e}")))?;
        if !resp.status().is_success() {
            return Err(CodedError::internal(format!(
                "rpc {} -> http {}",
                path,
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CodedError::internal(format!("rpc body: {e}")))?;
        wire::decode(&bytes)
    }

    fn take<T>(value: T, err: Option<CodedError>) -> Result<T, CodedError> {
        match err {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }

    // ── approval ────────────────────────────────────────────────────────────

    pub async fn ask_approval(
        &self,
        task: Task,
    ) -> Result<(bool, Option<Task>), CodedError> {
        let resp: AskApprovalResponse = self
            .call(routes::ASK_APPROVAL, &AskApprovalRequest { task: Some(task) })
            .await?;
        Self::take((resp.allowed, resp.task), resp.err)
    }

    // ── upload / download ───────────────────────────────────────────────────

    /// Upload a whole payload: descriptor frame followed by segment-sized
    /// payload frames.
    pub async fn upload_object(
        &self,
        task: Task,
        payload: &[u8],
    ) -> Result<(), CodedError> {
        let mut body = Vec::with_capacity(payload.len() + 1024);
        let descriptor = wire::encode(&UploadBeginRequest { task: Some(task) })?;
        body.extend_from_slice(&wire::encode_frame(&descriptor));
        for chunk in payload.chunks(4 * 1024 * 1024) {
            body.extend_from_slice(&wire::encode_frame(chunk));
        }
        let resp = self
            .http
            .post(format!("{}{}", self.base, routes::UPLOAD_OBJECT))
            .body(body)
            .send()
            .await
            .map_err(|e| CodedError::internal(format!("rpc send: {e}")))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CodedError::internal(format!("rpc body: {e}")))?;
        let resp: UploadObjectResponse = wire::decode(&bytes)?;
        Self::take((), resp.err)
    }

    pub async fn download_object(&self, task: Task) -> Result<Vec<u8>, CodedError> {
        let resp: DownloadObjectResponse = self
            .call(routes::DOWNLOAD_OBJECT, &DownloadObjectRequest { task: Some(task) })
            .await?;
        Self::take(resp.data, resp.err)
    }

    pub async fn download_piece(&self, task: Task) -> Result<Vec<u8>, CodedError> {
        let resp: DownloadPieceResponse = self
            .call(routes::DOWNLOAD_PIECE, &DownloadPieceRequest { task: Some(task) })
            .await?;
        Self::take(resp.data, resp.err)
    }

    pub async fn challenge_info(
        &self,
        task: Task,
    ) -> Result<ChallengeInfoResponse, CodedError> {
        let resp: ChallengeInfoResponse = self
            .call(routes::CHALLENGE_INFO, &ChallengeInfoRequest { task: Some(task) })
            .await?;
        match &resp.err {
            Some(e) => Err(e.clone()),
            None => Ok(resp),
        }
    }

    // ── receive ─────────────────────────────────────────────────────────────

    pub async fn replicate_piece(
        &self,
        task: Task,
        piece: Vec<u8>,
    ) -> Result<(), CodedError> {
        let resp: ReplicatePieceResponse = self
            .call(routes::RECEIVE_PIECE, &ReplicatePieceRequest { task: Some(task), piece })
            .await?;
        Self::take((), resp.err)
    }

    pub async fn done_replicate(
        &self,
        task: Task,
    ) -> Result<DoneReplicateResponse, CodedError> {
        let resp: DoneReplicateResponse = self
            .call(routes::RECEIVE_DONE, &DoneReplicateRequest { task: Some(task) })
            .await?;
        match &resp.err {
            Some(e) => Err(e.clone()),
            None => Ok(resp),
        }
    }

    // ── manage ──────────────────────────────────────────────────────────────

    pub async fn begin_task(&self, task: Task) -> Result<(), CodedError> {
        let resp: BeginTaskResponse = self
            .call(routes::MANAGE_BEGIN, &BeginTaskRequest { task: Some(task) })
            .await?;
        Self::take((), resp.err)
    }

    /// Pull one task within `node_limit`. `Ok(None)` when nothing matches.
    pub async fn ask_task(&self, node_limit: Limit) -> Result<Option<Task>, CodedError> {
        let resp: AskTaskResponse =
            self.call(routes::MANAGE_ASK, &AskTaskRequest { node_limit }).await?;
        match resp.err {
            None => Ok(resp.task),
            Some(e) if e.inner_code == ERR_NO_TASK_MATCH_LIMIT.inner_code => Ok(None),
            Some(e) => Err(e),
        }
    }

    pub async fn report_task(&self, task: Task) -> Result<(), CodedError> {
        let resp: ReportTaskResponse = self
            .call(routes::MANAGE_REPORT, &ReportTaskRequest { task: Some(task) })
            .await?;
        Self::take((), resp.err)
    }

    pub async fn query_task(&self, key: &str) -> Result<Task, CodedError> {
        let resp: QueryTaskResponse = self
            .call(routes::MANAGE_QUERY_TASK, &QueryTaskRequest { key: key.to_string() })
            .await?;
        match (resp.task, resp.err) {
            (Some(task), None) => Ok(task),
            (_, Some(e)) => Err(e),
            (None, None) => Err(CodedError::internal("query returned neither task nor error")),
        }
    }

    pub async fn query_tasks(&self, sub_key: &str) -> Result<Vec<String>, CodedError> {
        let resp: QueryTasksResponse = self
            .call(
                routes::MANAGE_QUERY_TASKS,
                &QueryTasksRequest { sub_key: sub_key.to_string() },
            )
            .await?;
        Self::take(resp.task_infos, resp.err)
    }

    // ── sign / p2p / auth ───────────────────────────────────────────────────

    pub async fn sign(&self, op: SignOp) -> Result<SignResponse, CodedError> {
        let resp: SignResponse =
            self.call(routes::SIGN, &SignRequest { op: Some(op) }).await?;
        match &resp.err {
            Some(e) => Err(e.clone()),
            None => Ok(resp),
        }
    }

    pub async fn ask_replicate_approval(
        &self,
        task: Task,
        min_approvals: u32,
        max_approvals: u32,
        timeout_secs: u64,
    ) -> Result<Vec<Task>, CodedError> {
        let resp: AskReplicateApprovalResponse = self
            .call(
                routes::P2P_ASK_APPROVAL,
                &AskReplicateApprovalRequest {
                    task: Some(task),
                    min_approvals,
                    max_approvals,
                    timeout_secs,
                },
            )
            .await?;
        Self::take(resp.approvals, resp.err)
    }

    pub async fn query_bootstrap(&self) -> Result<Vec<String>, CodedError> {
        let resp: QueryBootstrapResponse =
            self.call(routes::P2P_BOOTSTRAP, &QueryBootstrapRequest {}).await?;
        Self::take(resp.peers, resp.err)
    }

    pub async fn verify_auth(&self, req: VerifyAuthRequest) -> Result<bool, CodedError> {
        let resp: VerifyAuthResponse = self.call(routes::AUTH_VERIFY, &req).await?;
        Self::take(resp.allowed, resp.err)
    }

    pub async fn query_resource(&self) -> Result<QueryResourceResponse, CodedError> {
        let resp: QueryResourceResponse =
            self.call(routes::QUERY_RESOURCE, &QueryResourceRequest {}).await?;
        match &resp.err {
            Some(e) => Err(e.clone()),
            None => Ok(resp),
        }
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient").field("base", &self.base).finish()
    }
}
