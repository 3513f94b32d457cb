//! # OSPN Common Crate
//!
//! Shared foundations for the storage provider node:
//!
//! - `error`: the coded wire error and the process-wide inner-code registry
//! - `config`: TOML configuration with environment overrides
//! - `crypto`: role keypairs, signing digests, addresses, checksums

pub mod config;
pub mod crypto;
pub mod error;

pub use config::SpConfig;
pub use error::{CodedError, ErrorSpec};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Wall-clock seconds since the unix epoch.
pub fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Wall-clock milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
