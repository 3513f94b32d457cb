//! Transaction envelopes, the on-chain operation catalogue, and gas tables.
//!
//! Encoding is deterministic bincode: the same envelope always produces the
//! same signing bytes, so signatures are reproducible and the mock chain can
//! decode what the signer submits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ospn_common::crypto::RoleKey;

#[derive(Debug, Error)]
pub enum TxCodecError {
    #[error("tx encode failed: {0}")]
    Encode(String),
    #[error("tx decode failed: {0}")]
    Decode(String),
}

// ════════════════════════════════════════════════════════════════════════════
// OPERATION CATALOGUE
// ════════════════════════════════════════════════════════════════════════════

/// Every on-chain operation the SP submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    SealObject,
    RejectUnSealObject,
    DiscontinueBucket,
    CreateGlobalVirtualGroup,
    CompleteMigrateBucket,
    RejectMigrateBucket,
    SwapOut,
    CompleteSwapOut,
    SPExit,
    CompleteSPExit,
    UpdateSPPrice,
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxKind::SealObject => "SealObject",
            TxKind::RejectUnSealObject => "RejectUnSealObject",
            TxKind::DiscontinueBucket => "DiscontinueBucket",
            TxKind::CreateGlobalVirtualGroup => "CreateGlobalVirtualGroup",
            TxKind::CompleteMigrateBucket => "CompleteMigrateBucket",
            TxKind::RejectMigrateBucket => "RejectMigrateBucket",
            TxKind::SwapOut => "SwapOut",
            TxKind::CompleteSwapOut => "CompleteSwapOut",
            TxKind::SPExit => "SPExit",
            TxKind::CompleteSPExit => "CompleteSPExit",
            TxKind::UpdateSPPrice => "UpdateSPPrice",
        };
        f.write_str(name)
    }
}

/// Operation payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxPayload {
    SealObject {
        bucket_name: String,
        object_name: String,
        object_id: u64,
        gvg_id: u32,
        /// Aggregate of the secondary SPs' confirmations.
        secondary_signatures: Vec<Vec<u8>>,
    },
    RejectUnSealObject {
        bucket_name: String,
        object_name: String,
        object_id: u64,
    },
    DiscontinueBucket {
        bucket_name: String,
        reason: String,
    },
    CreateGlobalVirtualGroup {
        family_id: u32,
        secondary_sp_ids: Vec<u32>,
        deposit: u64,
    },
    CompleteMigrateBucket {
        bucket_id: u64,
        /// (src gvg id, dst gvg id) pairs.
        gvg_mappings: Vec<(u32, u32)>,
    },
    RejectMigrateBucket {
        bucket_id: u64,
    },
    SwapOut {
        gvg_family_id: u32,
        gvg_ids: Vec<u32>,
        successor_sp_id: u32,
        successor_approval: Vec<u8>,
    },
    CompleteSwapOut {
        gvg_family_id: u32,
        gvg_ids: Vec<u32>,
    },
    SPExit,
    CompleteSPExit {
        operator: String,
    },
    UpdateSPPrice {
        read_price: u64,
        store_price: u64,
        free_read_quota: u64,
    },
}

impl TxPayload {
    pub fn kind(&self) -> TxKind {
        match self {
            TxPayload::SealObject { .. } => TxKind::SealObject,
            TxPayload::RejectUnSealObject { .. } => TxKind::RejectUnSealObject,
            TxPayload::DiscontinueBucket { .. } => TxKind::DiscontinueBucket,
            TxPayload::CreateGlobalVirtualGroup { .. } => TxKind::CreateGlobalVirtualGroup,
            TxPayload::CompleteMigrateBucket { .. } => TxKind::CompleteMigrateBucket,
            TxPayload::RejectMigrateBucket { .. } => TxKind::RejectMigrateBucket,
            TxPayload::SwapOut { .. } => TxKind::SwapOut,
            TxPayload::CompleteSwapOut { .. } => TxKind::CompleteSwapOut,
            TxPayload::SPExit => TxKind::SPExit,
            TxPayload::CompleteSPExit { .. } => TxKind::CompleteSPExit,
            TxPayload::UpdateSPPrice { .. } => TxKind::UpdateSPPrice,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// GAS / FEE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasInfo {
    pub gas_limit: u64,
    pub fee_amount: u64,
}

/// Per-operation defaults. Seal-path operations are cheap and frequent;
/// lifecycle operations carry more state and cost more.
pub fn default_gas(kind: TxKind) -> GasInfo {
    match kind {
        TxKind::SealObject => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
        TxKind::RejectUnSealObject => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
        TxKind::DiscontinueBucket => GasInfo { gas_limit: 2_400, fee_amount: 12_000 },
        TxKind::CreateGlobalVirtualGroup => {
            GasInfo { gas_limit: 1_200, fee_amount: 6_000 }
        }
        TxKind::CompleteMigrateBucket => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
        TxKind::RejectMigrateBucket => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
        TxKind::SwapOut => GasInfo { gas_limit: 2_400, fee_amount: 12_000 },
        TxKind::CompleteSwapOut => GasInfo { gas_limit: 2_400, fee_amount: 12_000 },
        TxKind::SPExit => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
        TxKind::CompleteSPExit => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
        TxKind::UpdateSPPrice => GasInfo { gas_limit: 1_200, fee_amount: 6_000 },
    }
}

/// Resolve gas for an operation: configured override wins, zero falls back
/// to the operation default.
pub fn gas_for(kind: TxKind, overrides: &ospn_common::config::GasOverrides) -> GasInfo {
    let d = default_gas(kind);
    let (limit, fee) = match kind {
        TxKind::SealObject => (overrides.seal_gas_limit, overrides.seal_fee_amount),
        TxKind::RejectUnSealObject => {
            (overrides.reject_seal_gas_limit, overrides.reject_seal_fee_amount)
        }
        TxKind::DiscontinueBucket => (
            overrides.discontinue_bucket_gas_limit,
            overrides.discontinue_bucket_fee_amount,
        ),
        TxKind::CreateGlobalVirtualGroup => {
            (overrides.create_gvg_gas_limit, overrides.create_gvg_fee_amount)
        }
        TxKind::CompleteMigrateBucket => (
            overrides.complete_migrate_bucket_gas_limit,
            overrides.complete_migrate_bucket_fee_amount,
        ),
        TxKind::RejectMigrateBucket => (
            overrides.reject_migrate_bucket_gas_limit,
            overrides.reject_migrate_bucket_fee_amount,
        ),
        TxKind::SwapOut => (overrides.swap_out_gas_limit, overrides.swap_out_fee_amount),
        TxKind::CompleteSwapOut => (
            overrides.complete_swap_out_gas_limit,
            overrides.complete_swap_out_fee_amount,
        ),
        TxKind::SPExit => (overrides.sp_exit_gas_limit, overrides.sp_exit_fee_amount),
        TxKind::CompleteSPExit => (
            overrides.complete_sp_exit_gas_limit,
            overrides.complete_sp_exit_fee_amount,
        ),
        TxKind::UpdateSPPrice => {
            (overrides.update_sp_price_gas_limit, overrides.update_sp_price_fee_amount)
        }
    };
    GasInfo {
        gas_limit: if limit == 0 { d.gas_limit } else { limit },
        fee_amount: if fee == 0 { d.fee_amount } else { fee },
    }
}

/// Whether the operation skips gas simulation. Sealing must not stall on a
/// simulation round-trip.
pub fn no_simulate(kind: TxKind) -> bool {
    matches!(kind, TxKind::SealObject)
}

// ════════════════════════════════════════════════════════════════════════════
// ENVELOPE
// ════════════════════════════════════════════════════════════════════════════

/// Broadcast parameters resolved for one submission attempt.
#[derive(Debug, Clone, Copy)]
pub struct TxOption {
    pub nonce: u64,
    pub gas_limit: u64,
    pub fee_amount: u64,
    pub no_simulate: bool,
}

/// The signed-over record: chain identity, account, nonce, fees, payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEnvelope {
    pub chain_id: String,
    pub account: String,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fee_amount: u64,
    pub payload: TxPayload,
}

impl TxEnvelope {
    /// Deterministic signing bytes.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, TxCodecError> {
        bincode::serialize(self).map_err(|e| TxCodecError::Encode(e.to_string()))
    }

    pub fn sign(&self, key: &RoleKey) -> Result<SignedTx, TxCodecError> {
        let bytes = self.signing_bytes()?;
        Ok(SignedTx {
            envelope: self.clone(),
            signature: key.sign(&bytes),
            pubkey: key.public_key().to_vec(),
        })
    }
}

/// Envelope plus signature, the unit that goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTx {
    pub envelope: TxEnvelope,
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl SignedTx {
    pub fn encode(&self) -> Result<Vec<u8>, TxCodecError> {
        bincode::serialize(self).map_err(|e| TxCodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<SignedTx, TxCodecError> {
        bincode::deserialize(bytes).map_err(|e| TxCodecError::Decode(e.to_string()))
    }

    /// Verify the signature against the embedded public key.
    pub fn verify(&self) -> bool {
        match self.envelope.signing_bytes() {
            Ok(bytes) => ospn_common::crypto::verify_signature(
                &self.pubkey,
                &bytes,
                &self.signature,
            )
            .is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ospn_common::config::GasOverrides;

    fn seal_payload() -> TxPayload {
        TxPayload::SealObject {
            bucket_name: "b".into(),
            object_name: "o".into(),
            object_id: 9,
            gvg_id: 3,
            secondary_signatures: vec![vec![1, 2, 3]],
        }
    }

    #[test]
    fn payload_kind_mapping() {
        assert_eq!(seal_payload().kind(), TxKind::SealObject);
        assert_eq!(TxPayload::SPExit.kind(), TxKind::SPExit);
    }

    #[test]
    fn signed_tx_roundtrip_and_verify() {
        let key = RoleKey::generate();
        let envelope = TxEnvelope {
            chain_id: "ospn-dev-1".into(),
            account: key.address(),
            nonce: 4,
            gas_limit: 1_200,
            fee_amount: 6_000,
            payload: seal_payload(),
        };
        let signed = envelope.sign(&key).expect("sign");
        let bytes = signed.encode().expect("encode");
        let back = SignedTx::decode(&bytes).expect("decode");
        assert_eq!(back, signed);
        assert!(back.verify());
    }

    #[test]
    fn tampered_tx_fails_verification() {
        let key = RoleKey::generate();
        let envelope = TxEnvelope {
            chain_id: "ospn-dev-1".into(),
            account: key.address(),
            nonce: 4,
            gas_limit: 1_200,
            fee_amount: 6_000,
            payload: seal_payload(),
        };
        let mut signed = envelope.sign(&key).expect("sign");
        signed.envelope.nonce = 5;
        assert!(!signed.verify());
    }

    #[test]
    fn gas_overrides_zero_means_default() {
        let overrides = GasOverrides::default();
        assert_eq!(gas_for(TxKind::SealObject, &overrides), default_gas(TxKind::SealObject));

        let tuned = GasOverrides { seal_gas_limit: 9_000, ..GasOverrides::default() };
        let resolved = gas_for(TxKind::SealObject, &tuned);
        assert_eq!(resolved.gas_limit, 9_000);
        // fee stayed default
        assert_eq!(resolved.fee_amount, default_gas(TxKind::SealObject).fee_amount);
    }

    #[test]
    fn only_seal_skips_simulation() {
        assert!(no_simulate(TxKind::SealObject));
        assert!(!no_simulate(TxKind::SwapOut));
        assert!(!no_simulate(TxKind::DiscontinueBucket));
    }
}
