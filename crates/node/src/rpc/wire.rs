//! Wire records and framing.
//!
//! Every request and response is a length-delimited bincode record; the same
//! input always encodes to the same bytes. Responses embed an
//! `Option<CodedError>` — a started operation never surfaces its failure as
//! a transport fault.
//!
//! ## Upload framing
//!
//! An upload body is a stream of length-prefixed frames:
//!
//! ```text
//! ┌───────────────┬───────────────────────────────┐
//! │ 4 bytes (BE)  │ frame payload                 │
//! │ frame length  │ frame 0: task descriptor      │
//! └───────────────┴ frames 1..n: raw payload ─────┘
//! ```
//!
//! Frames are independent of network chunking; [`FrameDecoder`] reassembles
//! them from arbitrary chunk boundaries.

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ospn_common::error::CodedError;
use ospn_rcmgr::Limit;
use ospn_task::Task;

use ospn_chain::TxPayload;

/// Max RPC message size, both directions: 3 GiB.
pub const MAX_RPC_MSG_SIZE: usize = 3 * 1024 * 1024 * 1024;

/// Upper bound for one upload frame. A frame carries at most one segment
/// plus the descriptor overhead.
pub const MAX_FRAME_SIZE: usize = 128 * 1024 * 1024;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodedError> {
    bincode::serialize(value).map_err(|e| CodedError::internal(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodedError> {
    bincode::deserialize(bytes).map_err(|e| CodedError::internal(e.to_string()))
}

/// Prefix a frame payload with its big-endian length.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental frame reassembly over arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// The next complete frame, if one is buffered. An oversized frame
    /// length is a protocol violation.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodedError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
            as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CodedError::internal(format!("frame length {} too large", len)));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        self.buf.advance(4);
        let frame = self.buf.split_to(len);
        Ok(Some(frame.to_vec()))
    }

    /// Bytes buffered but not yet consumed as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SERVICE RECORDS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskApprovalRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskApprovalResponse {
    pub allowed: bool,
    pub task: Option<Task>,
    pub err: Option<CodedError>,
}

/// First frame of an upload stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBeginRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadObjectResponse {
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadObjectRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadObjectResponse {
    pub data: Vec<u8>,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadPieceRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadPieceResponse {
    pub data: Vec<u8>,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeInfoRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeInfoResponse {
    pub integrity_hash: Vec<u8>,
    pub checksums: Vec<Vec<u8>>,
    pub data: Vec<u8>,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatePieceRequest {
    pub task: Option<Task>,
    pub piece: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatePieceResponse {
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneReplicateRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneReplicateResponse {
    pub integrity_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub sp_address: String,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginTaskRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginTaskResponse {
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskTaskRequest {
    pub node_limit: Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskTaskResponse {
    pub task: Option<Task>,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTaskRequest {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTaskResponse {
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTaskRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTaskResponse {
    pub task: Option<Task>,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTasksRequest {
    pub sub_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTasksResponse {
    pub task_infos: Vec<String>,
    pub err: Option<CodedError>,
}

/// Signer operations: the off-chain signing catalogue plus on-chain
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignOp {
    SignCreateBucketApproval { msg: Vec<u8> },
    SignMigrateBucketApproval { msg: Vec<u8> },
    SignCreateObjectApproval { msg: Vec<u8> },
    SignReplicatePieceApproval { msg: Vec<u8> },
    SignReceivePieceTask { msg: Vec<u8> },
    SignRecoveryPieceTask { msg: Vec<u8> },
    SignP2PPing { msg: Vec<u8> },
    SignP2PPong { msg: Vec<u8> },
    SignSecondarySealBls { msg: Vec<u8> },
    SignSecondarySPMigrationBucket { msg: Vec<u8> },
    SignSwapOut { msg: Vec<u8> },
    Broadcast(TxPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub op: Option<SignOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    pub signature: Vec<u8>,
    pub tx_hash: String,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskReplicateApprovalRequest {
    pub task: Option<Task>,
    pub min_approvals: u32,
    pub max_approvals: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskReplicateApprovalResponse {
    pub approvals: Vec<Task>,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBootstrapRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBootstrapResponse {
    pub peers: Vec<String>,
    pub err: Option<CodedError>,
}

/// The closed set of operations the authenticator arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthOp {
    AskCreateBucketApproval,
    AskMigrateBucketApproval,
    AskCreateObjectApproval,
    ChallengePiece,
    PutObject,
    GetUploadingState,
    GetObject,
    GetRecoveryPiece,
    MigratePiece,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyAuthRequest {
    pub op: AuthOp,
    pub account: String,
    pub bucket: String,
    pub object: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyAuthResponse {
    pub allowed: bool,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAuthNonceRequest {
    pub account: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAuthNonceResponse {
    pub current_nonce: u64,
    pub next_nonce: u64,
    pub current_public_key: Vec<u8>,
    pub expiry_ms: i64,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserPublicKeyRequest {
    pub account: String,
    pub domain: String,
    pub current_nonce: u64,
    pub nonce: u64,
    pub public_key: Vec<u8>,
    pub expiry_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserPublicKeyResponse {
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOffChainSignatureRequest {
    pub account: String,
    pub domain: String,
    pub signature: Vec<u8>,
    pub real_msg: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOffChainSignatureResponse {
    pub ok: bool,
    pub err: Option<CodedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResourceRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResourceResponse {
    pub limit: Limit,
    pub usage: ospn_rcmgr::ScopeStat,
    pub err: Option<CodedError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip_across_chunk_boundaries() {
        let payloads: Vec<Vec<u8>> = vec![b"first".to_vec(), vec![0u8; 1000], b"".to_vec()];
        let mut stream = Vec::new();
        for p in &payloads {
            stream.extend_from_slice(&encode_frame(p));
        }

        // feed in awkward chunk sizes
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for chunk in stream.chunks(7) {
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame().expect("frame") {
                out.push(frame);
            }
        }
        assert_eq!(out, payloads);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&(u32::MAX).to_be_bytes());
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn record_roundtrip_is_stable() {
        let req = QueryTasksRequest { sub_key: "object:o".into() };
        let a = encode(&req).expect("encode");
        let b = encode(&decode::<QueryTasksRequest>(&a).expect("decode")).expect("re-encode");
        assert_eq!(a, b);
    }
}
