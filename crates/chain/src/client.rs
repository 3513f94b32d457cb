//! # Chain Transport
//!
//! [`ChainClient`] decouples transaction submission from any specific chain
//! RPC implementation. The production client speaks JSON over HTTP; the mock
//! drives the signer tests without a network.
//!
//! This layer performs a single attempt per call. It does NOT retry, sleep,
//! or resynchronize nonces — that discipline lives in the signer.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use ospn_common::crypto::keccak256;

use crate::tx::SignedTx;

/// Transport-level or chain-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain rejected the tx because its nonce does not match the
    /// account sequence. The signer resynchronizes and retries.
    #[error("wrong sequence: tx nonce does not match account nonce")]
    WrongSequence,
    #[error("chain rpc error: {0}")]
    Rpc(String),
    #[error("chain request timed out")]
    Timeout,
    #[error("malformed chain response: {0}")]
    Malformed(String),
}

/// Result of a sync-mode broadcast. A nonzero `code` means the chain
/// accepted the bytes but rejected the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResponse {
    pub tx_hash: String,
    pub code: u32,
    pub raw_log: String,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Broadcast in sync mode: returns once the tx passed (or failed) the
    /// mempool check.
    async fn broadcast_tx_sync(
        &self,
        tx_bytes: Vec<u8>,
    ) -> Result<BroadcastResponse, ChainError>;

    /// The account's current on-chain nonce.
    async fn query_account_nonce(&self, address: &str) -> Result<u64, ChainError>;

    /// Latest committed block height.
    async fn query_latest_height(&self) -> Result<u64, ChainError>;

    /// Block until the chain commits one more block. Bounded: gives up with
    /// [`ChainError::Timeout`] rather than waiting forever.
    async fn wait_for_next_block(&self) -> Result<(), ChainError>;
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// JSON-over-HTTP chain client. Endpoints are tried in order; the first
/// reachable answer wins.
pub struct RpcChainClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    block_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct BroadcastBody {
    tx_hash: String,
    code: u32,
    #[serde(default)]
    raw_log: String,
}

#[derive(Debug, Deserialize)]
struct NonceBody {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    height: u64,
}

/// Raw-log marker the chain emits on an account sequence mismatch.
const WRONG_SEQUENCE_MARKER: &str = "account sequence mismatch";
/// Chain error code for a sequence mismatch.
const WRONG_SEQUENCE_CODE: u32 = 32;

impl RpcChainClient {
    pub fn new(endpoints: Vec<String>, block_interval_secs: u64) -> RpcChainClient {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        RpcChainClient {
            http,
            endpoints,
            block_interval: Duration::from_secs(block_interval_secs.max(1)),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, ChainError> {
        let mut last = String::from("no endpoints configured");
        for base in &self.endpoints {
            let url = format!("{}/{}", base.trim_end_matches('/'), path);
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| ChainError::Malformed(e.to_string()));
                }
                Ok(resp) => last = format!("{} -> http {}", url, resp.status()),
                Err(e) => last = format!("{} -> {}", url, e),
            }
        }
        Err(ChainError::Rpc(last))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn broadcast_tx_sync(
        &self,
        tx_bytes: Vec<u8>,
    ) -> Result<BroadcastResponse, ChainError> {
        let body = serde_json::json!({ "tx": BASE64.encode(&tx_bytes) });
        let mut last = String::from("no endpoints configured");
        for base in &self.endpoints {
            let url = format!("{}/broadcast_tx_sync", base.trim_end_matches('/'));
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: BroadcastBody = resp
                        .json()
                        .await
                        .map_err(|e| ChainError::Malformed(e.to_string()))?;
                    if parsed.code == WRONG_SEQUENCE_CODE
                        || parsed.raw_log.contains(WRONG_SEQUENCE_MARKER)
                    {
                        return Err(ChainError::WrongSequence);
                    }
                    return Ok(BroadcastResponse {
                        tx_hash: parsed.tx_hash,
                        code: parsed.code,
                        raw_log: parsed.raw_log,
                    });
                }
                Ok(resp) => last = format!("{} -> http {}", url, resp.status()),
                Err(e) => last = format!("{} -> {}", url, e),
            }
            warn!("broadcast endpoint failed: {}", last);
        }
        Err(ChainError::Rpc(last))
    }

    async fn query_account_nonce(&self, address: &str) -> Result<u64, ChainError> {
        let body: NonceBody = self.get_json(&format!("account_nonce/{}", address)).await?;
        Ok(body.nonce)
    }

    async fn query_latest_height(&self) -> Result<u64, ChainError> {
        let body: StatusBody = self.get_json("status").await?;
        Ok(body.height)
    }

    async fn wait_for_next_block(&self) -> Result<(), ChainError> {
        let start = self.query_latest_height().await?;
        // Poll for a bounded number of intervals; a stalled chain must not
        // wedge the signer's role mutex forever.
        for _ in 0..10u32 {
            tokio::time::sleep(self.block_interval).await;
            let now = self.query_latest_height().await?;
            if now > start {
                debug!(from = start, to = now, "observed next block");
                return Ok(());
            }
        }
        Err(ChainError::Timeout)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK CLIENT
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MockState {
    height: u64,
    /// Per-account expected nonce, the chain-side truth.
    expected_nonce: HashMap<String, u64>,
    /// Scripted failures consumed before normal processing, in order.
    scripted: VecDeque<MockOutcome>,
    /// Every (account, nonce) pair that reached broadcast.
    broadcasts: Vec<(String, u64)>,
    wait_calls: u64,
}

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Error(ChainError),
    /// Chain accepts the bytes but the tx fails with this code.
    FailedTx(u32),
}

/// In-memory chain for signer tests. Verifies nonces like the real chain:
/// a broadcast whose nonce differs from the account's expected nonce yields
/// [`ChainError::WrongSequence`].
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new() -> MockChainClient {
        MockChainClient::default()
    }

    /// Force the chain-side nonce for an account (simulates txs submitted
    /// outside this process).
    pub fn set_account_nonce(&self, address: &str, nonce: u64) {
        self.state.lock().expected_nonce.insert(address.to_string(), nonce);
    }

    /// Queue an outcome for the next broadcast, ahead of nonce checking.
    pub fn script(&self, outcome: MockOutcome) {
        self.state.lock().scripted.push_back(outcome);
    }

    /// Every (account, nonce) that reached the chain, in order.
    pub fn broadcasts(&self) -> Vec<(String, u64)> {
        self.state.lock().broadcasts.clone()
    }

    pub fn wait_calls(&self) -> u64 {
        self.state.lock().wait_calls
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn broadcast_tx_sync(
        &self,
        tx_bytes: Vec<u8>,
    ) -> Result<BroadcastResponse, ChainError> {
        let signed = SignedTx::decode(&tx_bytes)
            .map_err(|e| ChainError::Malformed(e.to_string()))?;
        let account = signed.envelope.account.clone();
        let nonce = signed.envelope.nonce;

        let mut state = self.state.lock();
        state.broadcasts.push((account.clone(), nonce));
        if let Some(outcome) = state.scripted.pop_front() {
            match outcome {
                MockOutcome::Error(e) => return Err(e),
                MockOutcome::FailedTx(code) => {
                    return Ok(BroadcastResponse {
                        tx_hash: String::new(),
                        code,
                        raw_log: "scripted tx failure".to_string(),
                    })
                }
            }
        }
        let expected = state.expected_nonce.entry(account).or_insert(0);
        if nonce != *expected {
            return Err(ChainError::WrongSequence);
        }
        *expected += 1;
        Ok(BroadcastResponse {
            tx_hash: hex::encode(keccak256(&tx_bytes)),
            code: 0,
            raw_log: String::new(),
        })
    }

    async fn query_account_nonce(&self, address: &str) -> Result<u64, ChainError> {
        Ok(*self.state.lock().expected_nonce.entry(address.to_string()).or_insert(0))
    }

    async fn query_latest_height(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().height)
    }

    async fn wait_for_next_block(&self) -> Result<(), ChainError> {
        let mut state = self.state.lock();
        state.height += 1;
        state.wait_calls += 1;
        Ok(())
    }
}
