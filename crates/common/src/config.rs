//! Node configuration: TOML file + environment overrides.
//!
//! Every section has working defaults so a node can start from an empty
//! file. Secrets (role private keys, SP-DB credentials) are read from the
//! environment at init and override whatever the file carries.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default RPC listen address.
pub const DEFAULT_RPC_ADDRESS: &str = "localhost:9333";

/// Environment variable names for signer role keys.
pub const ENV_SIGNER_OPERATOR_PRIV_KEY: &str = "SIGNER_OPERATOR_PRIV_KEY";
pub const ENV_SIGNER_FUNDING_PRIV_KEY: &str = "SIGNER_FUNDING_PRIV_KEY";
pub const ENV_SIGNER_SEAL_PRIV_KEY: &str = "SIGNER_SEAL_PRIV_KEY";
pub const ENV_SIGNER_APPROVAL_PRIV_KEY: &str = "SIGNER_APPROVAL_PRIV_KEY";
pub const ENV_SIGNER_GC_PRIV_KEY: &str = "SIGNER_GC_PRIV_KEY";
pub const ENV_SIGNER_BLS_PRIV_KEY: &str = "SIGNER_BLS_PRIV_KEY";

/// Environment variable names for SP-DB credentials.
pub const ENV_SP_DB_USER: &str = "SP_DB_USER";
pub const ENV_SP_DB_PASSWORD: &str = "SP_DB_PASSWORD";
pub const ENV_SP_DB_ADDRESS: &str = "SP_DB_ADDRESS";
pub const ENV_SP_DB_DATABASE: &str = "SP_DB_DATABASE";

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpConfig {
    /// Module names to instantiate and start, in registration order.
    pub server: Vec<String>,
    /// RPC listen address for the service façade.
    pub rpc_address: Option<String>,
    /// Optional monitor (health/metrics) listen address.
    pub monitor_address: Option<String>,
    pub chain: ChainConfig,
    pub sp_account: SpAccountConfig,
    pub signer: SignerConfig,
    pub task: TaskPolicyConfig,
    pub resource: ResourceConfig,
    pub db: DbConfig,
    pub piece_store: PieceStoreConfig,
    pub p2p: P2pConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: String,
    /// One or more chain RPC endpoints; the first reachable one is used.
    pub endpoints: Vec<String>,
    /// Expected block interval, seconds. Drives WaitForNextBlock polling.
    pub block_interval_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            chain_id: "ospn-dev-1".to_string(),
            endpoints: vec!["http://localhost:26657".to_string()],
            block_interval_secs: 2,
        }
    }
}

/// The SP's on-chain identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpAccountConfig {
    pub sp_operator_address: String,
}

/// Role private keys (hex) plus per-operation gas/fee overrides.
/// A zero override falls back to the operation default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub operator_priv_key: String,
    pub funding_priv_key: String,
    pub seal_priv_key: String,
    pub approval_priv_key: String,
    pub gc_priv_key: String,
    pub bls_priv_key: String,
    pub gas: GasOverrides,
}

/// Per-operation gas limit and fee overrides; 0 means "use the default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GasOverrides {
    pub seal_gas_limit: u64,
    pub seal_fee_amount: u64,
    pub reject_seal_gas_limit: u64,
    pub reject_seal_fee_amount: u64,
    pub discontinue_bucket_gas_limit: u64,
    pub discontinue_bucket_fee_amount: u64,
    pub create_gvg_gas_limit: u64,
    pub create_gvg_fee_amount: u64,
    pub complete_migrate_bucket_gas_limit: u64,
    pub complete_migrate_bucket_fee_amount: u64,
    pub reject_migrate_bucket_gas_limit: u64,
    pub reject_migrate_bucket_fee_amount: u64,
    pub swap_out_gas_limit: u64,
    pub swap_out_fee_amount: u64,
    pub complete_swap_out_gas_limit: u64,
    pub complete_swap_out_fee_amount: u64,
    pub sp_exit_gas_limit: u64,
    pub sp_exit_fee_amount: u64,
    pub complete_sp_exit_gas_limit: u64,
    pub complete_sp_exit_fee_amount: u64,
    pub update_sp_price_gas_limit: u64,
    pub update_sp_price_fee_amount: u64,
}

/// Knobs feeding the pure dispatch-policy functions. Zero speed or timeout
/// falls back to the per-kind default; configured values are clamped into
/// the per-kind ranges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPolicyConfig {
    /// Bytes per second. 0 → default speed.
    pub upload_speed: u64,
    pub replicate_speed: u64,
    pub receive_speed: u64,
    pub download_speed: u64,
    /// Seconds. 0 → clamped default.
    pub seal_object_timeout: i64,
    pub gc_object_timeout: i64,
    pub gc_zombie_timeout: i64,
    pub gc_meta_timeout: i64,
    pub migrate_gvg_timeout: i64,
    pub replicate_retry: u64,
    pub receive_confirm_retry: u64,
    pub seal_object_retry: u64,
    pub gc_object_retry: u64,
    pub recover_retry: u64,
    pub migrate_gvg_retry: u64,
    /// Executor ask interval, seconds. 0 → 1.
    pub ask_task_interval_secs: u64,
}

/// System-scope resource limits. Zero fields fall back to the resource
/// manager defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub memory_bytes: i64,
    pub tasks: i32,
    pub tasks_high_priority: i32,
    pub tasks_medium_priority: i32,
    pub tasks_low_priority: i32,
    pub fd: i32,
    pub connections: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub address: String,
    pub database: String,
}

impl DbConfig {
    /// DSN for the SQL collaborator. The in-process reference DB ignores it.
    pub fn dsn(&self) -> String {
        format!("{}:***@{}/{}", self.user, self.address, self.database)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PieceStoreConfig {
    /// "mem" for the in-memory store, otherwise a filesystem root.
    pub root: String,
}

impl Default for PieceStoreConfig {
    fn default() -> Self {
        PieceStoreConfig { root: "mem".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Secondary SP endpoints ("host:port") for replicate approval fan-out.
    pub peers: Vec<String>,
    /// Bootstrap peer set returned by QueryP2PBootstrap.
    pub bootstrap: Vec<String>,
}

impl SpConfig {
    /// Load a config from a TOML file. Missing file or parse failure is an
    /// error; use `SpConfig::default()` for an all-defaults node.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<SpConfig> {
        let raw = fs::read_to_string(path.as_ref())?;
        let cfg: SpConfig = toml::from_str(&raw)?;
        Ok(cfg)
    }

    pub fn rpc_address(&self) -> &str {
        self.rpc_address.as_deref().unwrap_or(DEFAULT_RPC_ADDRESS)
    }

    /// Apply environment overrides. Called once at init, after file load.
    pub fn apply_env_overrides(&mut self) {
        let mut set = |target: &mut String, var: &str| {
            if let Ok(v) = env::var(var) {
                if !v.is_empty() {
                    *target = v;
                }
            }
        };
        set(&mut self.signer.operator_priv_key, ENV_SIGNER_OPERATOR_PRIV_KEY);
        set(&mut self.signer.funding_priv_key, ENV_SIGNER_FUNDING_PRIV_KEY);
        set(&mut self.signer.seal_priv_key, ENV_SIGNER_SEAL_PRIV_KEY);
        set(&mut self.signer.approval_priv_key, ENV_SIGNER_APPROVAL_PRIV_KEY);
        set(&mut self.signer.gc_priv_key, ENV_SIGNER_GC_PRIV_KEY);
        set(&mut self.signer.bls_priv_key, ENV_SIGNER_BLS_PRIV_KEY);
        set(&mut self.db.user, ENV_SP_DB_USER);
        set(&mut self.db.password, ENV_SP_DB_PASSWORD);
        set(&mut self.db.address, ENV_SP_DB_ADDRESS);
        set(&mut self.db.database, ENV_SP_DB_DATABASE);
    }
}
