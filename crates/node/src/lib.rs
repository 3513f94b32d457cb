//! # OSPN Node
//!
//! The service spine of a decentralized storage provider: an application
//! kernel hosting cooperating modules behind a uniform task
//! dispatch/report loop.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────┐
//!                 │               kernel                 │
//!                 │  lifecycle · registry · RPC façade   │
//!                 └──────┬───────────────────────────────┘
//!                        │ routes by service
//!   ┌─────────┬──────────┼──────────┬──────────┬────────────┐
//!   ▼         ▼          ▼          ▼          ▼            ▼
//! approver uploader downloader receiver    manager ◀──ask/report──▶ executor
//!   │         │          │          │          │
//!   └─────────┴──────────┴──────────┴──────────┘
//!                        │ narrow services handle
//!        signer · chain · piece store · rcmgr · sp-db
//! ```
//!
//! Modules never hold the kernel; they share the [`services::Services`]
//! façade. The manager's dispatch pool, the resource scopes, and the
//! signer's nonce caches are the only cross-request state.

pub mod app;
pub mod cli;
pub mod metrics;
pub mod modules;
pub mod piece_store;
pub mod registry;
pub mod rpc;
pub mod services;
pub mod shutdown;
pub mod spdb;

pub use app::{App, STOP_BUDGET};
pub use registry::{register_default_modules, ModuleRegistry};
pub use services::Services;
pub use shutdown::ShutdownSignal;

pub const NODE_NAME: &str = "ospn-node";
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");
