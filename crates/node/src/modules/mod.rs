//! The node's modules.
//!
//! Every module implements [`Module`]: a name for the registry, `start` in
//! registration order, `stop` in reverse. Modules are constructed from
//! factories with a shared [`crate::services::Services`] handle; the kernel
//! owns them and routes RPCs to them.

use async_trait::async_trait;

pub mod approver;
pub mod authenticator;
pub mod downloader;
pub mod executor;
pub mod manager;
pub mod p2p;
pub mod receiver;
pub mod signer;
pub mod uploader;

pub const APPROVER_MODULE: &str = "approver";
pub const AUTHENTICATOR_MODULE: &str = "authenticator";
pub const DOWNLOADER_MODULE: &str = "downloader";
pub const EXECUTOR_MODULE: &str = "executor";
pub const MANAGER_MODULE: &str = "manager";
pub const P2P_MODULE: &str = "p2p";
pub const RECEIVER_MODULE: &str = "receiver";
pub const SIGNER_MODULE: &str = "signer";
pub const UPLOADER_MODULE: &str = "uploader";

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bring the module up. A failure here rolls back the whole start
    /// sequence and cancels the process context.
    async fn start(&self) -> anyhow::Result<()>;

    /// Tear the module down. Runs under the kernel's stop budget.
    async fn stop(&self) -> anyhow::Result<()>;
}
