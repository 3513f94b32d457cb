//! Signer integration tests: nonce discipline against the mock chain.

use std::sync::Arc;

use ospn_chain::{
    ChainError, MockChainClient, MockOutcome, SignerKeyring, SignerRole, TxPayload,
    BROADCAST_TX_RETRY,
};
use ospn_common::config::SignerConfig;
use ospn_common::crypto::RoleKey;

const OPERATOR_KEY: &str =
    "1111111111111111111111111111111111111111111111111111111111111111";
const FUNDING_KEY: &str =
    "2222222222222222222222222222222222222222222222222222222222222222";
const SEAL_KEY: &str = "3333333333333333333333333333333333333333333333333333333333333333";
const APPROVAL_KEY: &str =
    "4444444444444444444444444444444444444444444444444444444444444444";
const GC_KEY: &str = "5555555555555555555555555555555555555555555555555555555555555555";
const BLS_KEY: &str = "6666666666666666666666666666666666666666666666666666666666666666";

fn signer_config() -> SignerConfig {
    SignerConfig {
        operator_priv_key: OPERATOR_KEY.to_string(),
        funding_priv_key: FUNDING_KEY.to_string(),
        seal_priv_key: SEAL_KEY.to_string(),
        approval_priv_key: APPROVAL_KEY.to_string(),
        gc_priv_key: GC_KEY.to_string(),
        bls_priv_key: BLS_KEY.to_string(),
        ..SignerConfig::default()
    }
}

fn seal_address() -> String {
    RoleKey::from_hex(SEAL_KEY).expect("key").address()
}

async fn keyring(client: &Arc<MockChainClient>) -> SignerKeyring {
    let dyn_client: Arc<dyn ospn_chain::ChainClient> = client.clone();
    SignerKeyring::new("ospn-test-1".to_string(), &signer_config(), dyn_client)
        .await
        .expect("keyring init")
}

fn seal_payload(object_id: u64) -> TxPayload {
    TxPayload::SealObject {
        bucket_name: "bucket".into(),
        object_name: format!("object-{object_id}"),
        object_id,
        gvg_id: 1,
        secondary_signatures: vec![vec![0xAA; 64]],
    }
}

#[tokio::test]
async fn initial_nonce_is_seeded_from_chain() {
    let client = Arc::new(MockChainClient::new());
    client.set_account_nonce(&seal_address(), 17);
    let keyring = keyring(&client).await;
    assert_eq!(keyring.cached_nonce(SignerRole::Seal).await, 17);
    assert_eq!(keyring.cached_nonce(SignerRole::Operator).await, 0);
}

#[tokio::test]
async fn nonce_is_monotone_across_successes() {
    let client = Arc::new(MockChainClient::new());
    let keyring = keyring(&client).await;
    for i in 0..5u64 {
        keyring.broadcast(seal_payload(i)).await.expect("broadcast");
    }
    // cached nonce equals initial + k after k successes
    assert_eq!(keyring.cached_nonce(SignerRole::Seal).await, 5);
    let nonces: Vec<u64> = client.broadcasts().iter().map(|(_, n)| *n).collect();
    assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn wrong_sequence_resyncs_after_next_block() {
    let client = Arc::new(MockChainClient::new());
    client.set_account_nonce(&seal_address(), 40);
    let keyring = keyring(&client).await;
    // Chain moved on without us: on-chain nonce is now 42.
    client.set_account_nonce(&seal_address(), 42);

    let tx_hash = keyring.broadcast(seal_payload(1)).await.expect("broadcast");
    assert!(!tx_hash.is_empty());

    // first attempt used the stale 40, second used the resynced 42
    let nonces: Vec<u64> = client.broadcasts().iter().map(|(_, n)| *n).collect();
    assert_eq!(nonces, vec![40, 42]);
    assert_eq!(client.wait_calls(), 1);
    assert_eq!(keyring.cached_nonce(SignerRole::Seal).await, 43);
}

#[tokio::test]
async fn failed_tx_code_counts_as_broadcast_error() {
    let client = Arc::new(MockChainClient::new());
    let keyring = keyring(&client).await;
    for _ in 0..BROADCAST_TX_RETRY {
        client.script(MockOutcome::FailedTx(5));
    }
    let err = keyring.broadcast(seal_payload(1)).await.expect_err("must fail");
    assert_eq!(err.inner_code, 120_002); // SealObjectOnChain
    assert_eq!(err.http_status, 400);
    assert_eq!(client.broadcasts().len(), BROADCAST_TX_RETRY);
    // cache never advanced
    assert_eq!(keyring.cached_nonce(SignerRole::Seal).await, 0);
}

#[tokio::test]
async fn transient_rpc_error_is_retried_then_succeeds() {
    let client = Arc::new(MockChainClient::new());
    let keyring = keyring(&client).await;
    client.script(MockOutcome::Error(ChainError::Rpc("connection reset".into())));
    keyring.broadcast(seal_payload(1)).await.expect("second attempt succeeds");
    assert_eq!(client.broadcasts().len(), 2);
    assert_eq!(keyring.cached_nonce(SignerRole::Seal).await, 1);
}

#[tokio::test]
async fn submitting_roles_are_independent() {
    let client = Arc::new(MockChainClient::new());
    let keyring = keyring(&client).await;

    keyring.broadcast(seal_payload(1)).await.expect("seal role");
    keyring
        .broadcast(TxPayload::DiscontinueBucket {
            bucket_name: "bucket".into(),
            reason: "expired".into(),
        })
        .await
        .expect("gc role");
    keyring
        .broadcast(TxPayload::SwapOut {
            gvg_family_id: 1,
            gvg_ids: vec![2, 3],
            successor_sp_id: 9,
            successor_approval: vec![1],
        })
        .await
        .expect("operator role");

    assert_eq!(keyring.cached_nonce(SignerRole::Seal).await, 1);
    assert_eq!(keyring.cached_nonce(SignerRole::Gc).await, 1);
    assert_eq!(keyring.cached_nonce(SignerRole::Operator).await, 1);

    // three distinct accounts reached the chain
    let accounts: std::collections::HashSet<String> =
        client.broadcasts().into_iter().map(|(a, _)| a).collect();
    assert_eq!(accounts.len(), 3);
}

#[tokio::test]
async fn off_chain_signing_is_deterministic_and_verifiable() {
    let client = Arc::new(MockChainClient::new());
    let keyring = keyring(&client).await;
    let msg = b"replicate piece approval for object 7";
    let sig_a = keyring.sign(SignerRole::Approval, msg);
    let sig_b = keyring.sign(SignerRole::Approval, msg);
    assert_eq!(sig_a, sig_b);
    assert!(keyring.verify(SignerRole::Approval, msg, &sig_a));
    assert!(!keyring.verify(SignerRole::Operator, msg, &sig_a));

    let bls_sig = keyring.sign(SignerRole::Bls, msg);
    assert!(keyring.verify(SignerRole::Bls, msg, &bls_sig));
    assert_ne!(bls_sig, sig_a);
}
