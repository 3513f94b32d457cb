//! RPC plumbing: wire records, the axum server façade, and the client.

pub mod client;
pub mod server;
pub mod wire;

pub use client::NodeClient;
