//! Crypto helpers: role keypairs, signing digests, addresses, checksums.
//!
//! All role keys are ed25519. Messages are signed over their Keccak-256
//! digest so arbitrarily large payloads cost one fixed-size signature.
//! Piece checksums use SHA-256. Secret key material never appears in Debug
//! output or logs.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};
use thiserror::Error;

pub const SECRET_KEY_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
/// Address length in bytes (tail of the keccak of the public key).
pub const ADDRESS_LEN: usize = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid private key hex: {0}")]
    InvalidPrivKeyHex(String),
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("signature verify failed")]
    VerifyFailed,
}

/// An ed25519 keypair bound to one signer role.
///
/// Wraps the dalek signing key so secret bytes stay out of Debug output and
/// so the signing digest is applied uniformly.
#[derive(Clone)]
pub struct RoleKey {
    key: SigningKey,
}

impl fmt::Debug for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleKey").field("address", &self.address()).finish()
    }
}

impl RoleKey {
    /// Parse a 32-byte hex secret key (with or without 0x prefix).
    pub fn from_hex(hex_key: &str) -> Result<RoleKey, CryptoError> {
        let trimmed = hex_key.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed)
            .map_err(|e| CryptoError::InvalidPrivKeyHex(e.to_string()))?;
        if bytes.len() != SECRET_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_LEN,
                got: bytes.len(),
            });
        }
        let mut secret = [0u8; SECRET_KEY_LEN];
        secret.copy_from_slice(&bytes);
        Ok(RoleKey { key: SigningKey::from_bytes(&secret) })
    }

    /// Fresh random keypair. Dev-mode nodes use this when no key is
    /// configured.
    pub fn generate() -> RoleKey {
        let secret: [u8; SECRET_KEY_LEN] = rand::random();
        RoleKey { key: SigningKey::from_bytes(&secret) }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.verifying_key().to_bytes()
    }

    /// Hex account address derived from the public key (keccak tail).
    pub fn address(&self) -> String {
        address_from_pubkey(&self.public_key())
    }

    /// Sign the Keccak-256 digest of `msg`. Deterministic: same key and
    /// message always yield the same signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let digest = keccak256(msg);
        self.key.sign(&digest).to_bytes().to_vec()
    }
}

/// Verify a signature produced by [`RoleKey::sign`].
pub fn verify_signature(
    pubkey: &[u8],
    msg: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let pk_bytes: [u8; PUBLIC_KEY_LEN] =
        pubkey.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
    let vk = VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig_bytes: [u8; SIGNATURE_LEN] =
        signature.try_into().map_err(|_| CryptoError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    let digest = keccak256(msg);
    vk.verify(&digest, &sig).map_err(|_| CryptoError::VerifyFailed)
}

/// Hex account address for raw public key bytes.
pub fn address_from_pubkey(pubkey: &[u8]) -> String {
    let digest = keccak256(pubkey);
    format!("0x{}", hex::encode(&digest[digest.len() - ADDRESS_LEN..]))
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest, used for piece checksums.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Integrity hash of an object: SHA-256 over the concatenated per-segment
/// checksums, in segment order.
pub fn integrity_hash(checksums: &[[u8; 32]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for c in checksums {
        hasher.update(c);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let key = RoleKey::generate();
        let msg = b"seal object 42";
        let sig = key.sign(msg);
        assert_eq!(sig.len(), SIGNATURE_LEN);
        verify_signature(&key.public_key(), msg, &sig).expect("verify");
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let key = RoleKey::generate();
        let sig = key.sign(b"original");
        let err = verify_signature(&key.public_key(), b"tampered", &sig);
        assert_eq!(err, Err(CryptoError::VerifyFailed));
    }

    #[test]
    fn signing_is_deterministic() {
        let key = RoleKey::from_hex(
            "0x1111111111111111111111111111111111111111111111111111111111111111",
        )
        .expect("key");
        assert_eq!(key.sign(b"msg"), key.sign(b"msg"));
    }

    #[test]
    fn from_hex_rejects_bad_lengths() {
        assert!(matches!(
            RoleKey::from_hex("deadbeef"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            RoleKey::from_hex("zz"),
            Err(CryptoError::InvalidPrivKeyHex(_))
        ));
    }

    #[test]
    fn address_is_stable_and_prefixed() {
        let key = RoleKey::from_hex(
            "2222222222222222222222222222222222222222222222222222222222222222",
        )
        .expect("key");
        let addr = key.address();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 2 + ADDRESS_LEN * 2);
        assert_eq!(addr, key.address());
    }

    #[test]
    fn integrity_hash_depends_on_segment_order() {
        let a = sha256(b"seg0");
        let b = sha256(b"seg1");
        assert_ne!(integrity_hash(&[a, b]), integrity_hash(&[b, a]));
    }
}
