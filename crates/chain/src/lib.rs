//! # OSPN Chain Crate
//!
//! Everything between the node and the chain:
//!
//! - `client`: the [`ChainClient`] transport trait, an HTTP implementation,
//!   and a nonce-verifying mock for tests
//! - `tx`: the on-chain operation catalogue, envelopes, and gas tables
//! - `signer`: the role keyring with nonce-serialized broadcast

pub mod client;
pub mod signer;
pub mod tx;

pub use client::{BroadcastResponse, ChainClient, ChainError, MockChainClient, MockOutcome, RpcChainClient};
pub use signer::{SignerError, SignerKeyring, SignerRole, BROADCAST_TX_RETRY};
pub use tx::{default_gas, gas_for, GasInfo, SignedTx, TxEnvelope, TxKind, TxOption, TxPayload};
