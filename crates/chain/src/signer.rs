//! # Role-Keyed Signer
//!
//! The keyring holds the process's only reference to private keys: one
//! ed25519 key per role (Operator, Funding, Seal, Approval, Gc, Bls). Each
//! non-Bls role holds a chain client; the three submitting roles (Operator,
//! Seal, Gc) each cache an account nonce behind their own mutex.
//!
//! ## Nonce discipline
//!
//! Per-role submission is strictly serialized: the role mutex is held across
//! the whole broadcast loop, and the cached nonce only moves forward on a
//! confirmed success. A `WrongSequence` rejection waits for the next block,
//! re-queries the on-chain nonce, resets the cache, and retries. Any other
//! failure — including a tx response with a nonzero code — consumes one of
//! [`BROADCAST_TX_RETRY`] attempts before the per-operation failure code
//! surfaces.
//!
//! Roles are independent: a stuck Seal submission never blocks Gc or
//! Operator traffic.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ospn_common::config::SignerConfig;
use ospn_common::crypto::{CryptoError, RoleKey};
use ospn_common::error::{
    CodedError, ErrorSpec, ERR_COMPLETE_MIGRATE_BUCKET_ON_CHAIN,
    ERR_COMPLETE_SP_EXIT_ON_CHAIN, ERR_COMPLETE_SWAP_OUT_ON_CHAIN,
    ERR_CREATE_GVG_ON_CHAIN, ERR_DISCONTINUE_BUCKET_ON_CHAIN,
    ERR_REJECT_MIGRATE_BUCKET_ON_CHAIN, ERR_REJECT_UNSEAL_ON_CHAIN,
    ERR_SEAL_OBJECT_ON_CHAIN, ERR_SIGN_MSG, ERR_SP_EXIT_ON_CHAIN, ERR_SWAP_OUT_ON_CHAIN,
    ERR_UPDATE_SP_PRICE_ON_CHAIN,
};

use crate::client::{ChainClient, ChainError};
use crate::tx::{gas_for, no_simulate, TxEnvelope, TxKind, TxOption, TxPayload};

/// Bound on broadcast attempts before a per-operation failure surfaces.
pub const BROADCAST_TX_RETRY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerRole {
    Operator,
    Funding,
    Seal,
    Approval,
    Gc,
    Bls,
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignerRole::Operator => "operator",
            SignerRole::Funding => "funding",
            SignerRole::Seal => "seal",
            SignerRole::Approval => "approval",
            SignerRole::Gc => "gc",
            SignerRole::Bls => "bls",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid {role} private key: {source}")]
    InvalidKey { role: SignerRole, source: CryptoError },
    #[error("querying initial {role} nonce: {source}")]
    InitialNonce { role: SignerRole, source: ChainError },
}

/// A role that only signs; holds a client for chain queries but no nonce.
struct RoleAccount {
    key: RoleKey,
    client: Arc<dyn ChainClient>,
}

/// A role that submits transactions: key, client, and the serialized nonce
/// cache. External reads of the cache are forbidden; everything goes
/// through the broadcast loop.
struct SubmittingAccount {
    key: RoleKey,
    client: Arc<dyn ChainClient>,
    nonce: Mutex<u64>,
}

pub struct SignerKeyring {
    chain_id: String,
    gas: ospn_common::config::GasOverrides,
    operator: SubmittingAccount,
    seal: SubmittingAccount,
    gc: SubmittingAccount,
    funding: RoleAccount,
    approval: RoleAccount,
    bls: RoleKey,
}

fn load_key(role: SignerRole, hex_key: &str) -> Result<RoleKey, SignerError> {
    if hex_key.is_empty() {
        warn!(%role, "no private key configured, generating an ephemeral dev key");
        return Ok(RoleKey::generate());
    }
    RoleKey::from_hex(hex_key).map_err(|source| SignerError::InvalidKey { role, source })
}

impl SignerKeyring {
    /// Load each role key, attach a client per role, and seed the nonce
    /// cache of every submitting role from the chain.
    pub async fn new(
        chain_id: String,
        cfg: &SignerConfig,
        client: Arc<dyn ChainClient>,
    ) -> Result<SignerKeyring, SignerError> {
        let operator_key = load_key(SignerRole::Operator, &cfg.operator_priv_key)?;
        let seal_key = load_key(SignerRole::Seal, &cfg.seal_priv_key)?;
        let gc_key = load_key(SignerRole::Gc, &cfg.gc_priv_key)?;
        let funding_key = load_key(SignerRole::Funding, &cfg.funding_priv_key)?;
        let approval_key = load_key(SignerRole::Approval, &cfg.approval_priv_key)?;
        let bls = load_key(SignerRole::Bls, &cfg.bls_priv_key)?;

        let seed = |role: SignerRole, key: &RoleKey| {
            let client = Arc::clone(&client);
            let address = key.address();
            async move {
                let nonce = client
                    .query_account_nonce(&address)
                    .await
                    .map_err(|source| SignerError::InitialNonce { role, source })?;
                debug!(%role, address = %address, nonce, "seeded nonce cache");
                Ok::<u64, SignerError>(nonce)
            }
        };
        let operator_nonce = seed(SignerRole::Operator, &operator_key).await?;
        let seal_nonce = seed(SignerRole::Seal, &seal_key).await?;
        let gc_nonce = seed(SignerRole::Gc, &gc_key).await?;

        Ok(SignerKeyring {
            chain_id,
            gas: cfg.gas.clone(),
            operator: SubmittingAccount {
                key: operator_key,
                client: Arc::clone(&client),
                nonce: Mutex::new(operator_nonce),
            },
            seal: SubmittingAccount {
                key: seal_key,
                client: Arc::clone(&client),
                nonce: Mutex::new(seal_nonce),
            },
            gc: SubmittingAccount {
                key: gc_key,
                client: Arc::clone(&client),
                nonce: Mutex::new(gc_nonce),
            },
            funding: RoleAccount { key: funding_key, client: Arc::clone(&client) },
            approval: RoleAccount { key: approval_key, client },
            bls,
        })
    }

    fn key_of(&self, role: SignerRole) -> &RoleKey {
        match role {
            SignerRole::Operator => &self.operator.key,
            SignerRole::Seal => &self.seal.key,
            SignerRole::Gc => &self.gc.key,
            SignerRole::Funding => &self.funding.key,
            SignerRole::Approval => &self.approval.key,
            SignerRole::Bls => &self.bls,
        }
    }

    /// Which role submits each on-chain operation. Seal-path txs use the
    /// Seal key, bucket discontinuation the Gc key, everything else the
    /// Operator key.
    fn submitting_role(kind: TxKind) -> SignerRole {
        match kind {
            TxKind::SealObject | TxKind::RejectUnSealObject => SignerRole::Seal,
            TxKind::DiscontinueBucket => SignerRole::Gc,
            _ => SignerRole::Operator,
        }
    }

    fn submitting(&self, role: SignerRole) -> &SubmittingAccount {
        match role {
            SignerRole::Seal => &self.seal,
            SignerRole::Gc => &self.gc,
            _ => &self.operator,
        }
    }

    /// Failure code surfaced when an operation exhausts its attempts.
    pub fn failure_spec(kind: TxKind) -> ErrorSpec {
        match kind {
            TxKind::SealObject => ERR_SEAL_OBJECT_ON_CHAIN,
            TxKind::RejectUnSealObject => ERR_REJECT_UNSEAL_ON_CHAIN,
            TxKind::DiscontinueBucket => ERR_DISCONTINUE_BUCKET_ON_CHAIN,
            TxKind::CreateGlobalVirtualGroup => ERR_CREATE_GVG_ON_CHAIN,
            TxKind::CompleteMigrateBucket => ERR_COMPLETE_MIGRATE_BUCKET_ON_CHAIN,
            TxKind::RejectMigrateBucket => ERR_REJECT_MIGRATE_BUCKET_ON_CHAIN,
            TxKind::SwapOut => ERR_SWAP_OUT_ON_CHAIN,
            TxKind::CompleteSwapOut => ERR_COMPLETE_SWAP_OUT_ON_CHAIN,
            TxKind::SPExit => ERR_SP_EXIT_ON_CHAIN,
            TxKind::CompleteSPExit => ERR_COMPLETE_SP_EXIT_ON_CHAIN,
            TxKind::UpdateSPPrice => ERR_UPDATE_SP_PRICE_ON_CHAIN,
        }
    }

    /// Account address of a role key.
    pub fn role_address(&self, role: SignerRole) -> String {
        self.key_of(role).address()
    }

    pub fn role_public_key(&self, role: SignerRole) -> Vec<u8> {
        self.key_of(role).public_key().to_vec()
    }

    /// Off-chain signing: deterministic bytes → signature under the role
    /// key. Used for approvals, receive/recovery confirmations, p2p
    /// ping/pong, and the secondary seal confirmation (Bls role).
    pub fn sign(&self, role: SignerRole, msg: &[u8]) -> Vec<u8> {
        self.key_of(role).sign(msg)
    }

    /// Verify a signature produced by this keyring's role key.
    pub fn verify(&self, role: SignerRole, msg: &[u8], signature: &[u8]) -> bool {
        ospn_common::crypto::verify_signature(
            &self.key_of(role).public_key(),
            msg,
            signature,
        )
        .is_ok()
    }

    /// Test-only view of a role's cached nonce.
    pub async fn cached_nonce(&self, role: SignerRole) -> u64 {
        *self.submitting(role).nonce.lock().await
    }

    /// On-chain nonce of a role's account, through that role's client. A
    /// diagnostic query; the broadcast loop maintains its own caches.
    pub async fn query_role_nonce(&self, role: SignerRole) -> Result<u64, ChainError> {
        let (key, client) = match role {
            SignerRole::Operator => (&self.operator.key, &self.operator.client),
            SignerRole::Seal => (&self.seal.key, &self.seal.client),
            SignerRole::Gc => (&self.gc.key, &self.gc.client),
            SignerRole::Funding => (&self.funding.key, &self.funding.client),
            SignerRole::Approval => (&self.approval.key, &self.approval.client),
            SignerRole::Bls => (&self.bls, &self.operator.client),
        };
        client.query_account_nonce(&key.address()).await
    }

    /// Submit one transaction with the full nonce discipline. Returns the
    /// tx hash, or the operation's failure code once attempts are
    /// exhausted.
    pub async fn broadcast(&self, payload: TxPayload) -> Result<String, CodedError> {
        let kind = payload.kind();
        let role = Self::submitting_role(kind);
        let acct = self.submitting(role);
        let gas = gas_for(kind, &self.gas);

        // Serialize all submissions for this role; the guard also protects
        // the cached nonce.
        let mut nonce = acct.nonce.lock().await;
        let mut last_err = String::new();

        for attempt in 1..=BROADCAST_TX_RETRY {
            let opt = TxOption {
                nonce: *nonce,
                gas_limit: gas.gas_limit,
                fee_amount: gas.fee_amount,
                no_simulate: no_simulate(kind),
            };
            let envelope = TxEnvelope {
                chain_id: self.chain_id.clone(),
                account: acct.key.address(),
                nonce: opt.nonce,
                gas_limit: opt.gas_limit,
                fee_amount: opt.fee_amount,
                payload: payload.clone(),
            };
            let bytes = envelope
                .sign(&acct.key)
                .and_then(|signed| signed.encode())
                .map_err(|e| ERR_SIGN_MSG.with_detail(e.to_string()))?;

            match acct.client.broadcast_tx_sync(bytes).await {
                Ok(resp) if resp.code == 0 => {
                    *nonce += 1;
                    info!(%kind, %role, nonce = *nonce, tx_hash = %resp.tx_hash, "broadcast ok");
                    return Ok(resp.tx_hash);
                }
                Ok(resp) => {
                    // a failed tx response with nonzero code counts as a
                    // broadcast error
                    last_err = format!("tx code {}: {}", resp.code, resp.raw_log);
                    warn!(%kind, %role, attempt, code = resp.code, "tx rejected");
                }
                Err(ChainError::WrongSequence) => {
                    warn!(%kind, %role, attempt, cached = *nonce, "wrong sequence, resyncing nonce");
                    last_err = "wrong sequence".to_string();
                    match acct.client.wait_for_next_block().await {
                        Ok(()) => match acct
                            .client
                            .query_account_nonce(&acct.key.address())
                            .await
                        {
                            Ok(on_chain) => {
                                debug!(%role, cached = *nonce, on_chain, "nonce cache reset");
                                *nonce = on_chain;
                            }
                            Err(e) => last_err = e.to_string(),
                        },
                        Err(e) => last_err = e.to_string(),
                    }
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!(%kind, %role, attempt, err = %last_err, "broadcast failed");
                }
            }
        }

        Err(Self::failure_spec(kind)
            .with_detail(format!("after {} attempts: {}", BROADCAST_TX_RETRY, last_err)))
    }
}

impl fmt::Debug for SignerKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerKeyring")
            .field("chain_id", &self.chain_id)
            .field("operator", &self.operator.key.address())
            .field("seal", &self.seal.key.address())
            .field("gc", &self.gc.key.address())
            .finish()
    }
}
