//! The narrow services façade handed to every module.
//!
//! The kernel owns the modules; each module holds a shared handle to this
//! façade for chain, signer, store, db, and admission access. No ownership
//! cycles: modules never hold the kernel.

use std::sync::Arc;

use anyhow::Context;

use ospn_chain::{ChainClient, SignerKeyring};
use ospn_common::config::ResourceConfig;
use ospn_common::SpConfig;
use ospn_rcmgr::{Limit, ResourceManager};

use crate::metrics::Metrics;
use crate::piece_store::{LocalFsPieceStore, MemPieceStore, PieceStore};
use crate::shutdown::ShutdownSignal;
use crate::spdb::{MemSpDb, SpDb};

pub struct Services {
    config: Arc<SpConfig>,
    signer: Arc<SignerKeyring>,
    chain: Arc<dyn ChainClient>,
    piece_store: Arc<dyn PieceStore>,
    rcmgr: Arc<ResourceManager>,
    db: Arc<dyn SpDb>,
    metrics: Arc<Metrics>,
    shutdown: ShutdownSignal,
}

fn limit_from_config(cfg: &ResourceConfig) -> Limit {
    let d = Limit::default_node();
    let nz32 = |v: i32, fallback: i32| if v == 0 { fallback } else { v };
    Limit {
        memory: if cfg.memory_bytes == 0 { d.memory } else { cfg.memory_bytes },
        tasks: nz32(cfg.tasks, d.tasks),
        tasks_high: nz32(cfg.tasks_high_priority, d.tasks_high),
        tasks_medium: nz32(cfg.tasks_medium_priority, d.tasks_medium),
        tasks_low: nz32(cfg.tasks_low_priority, d.tasks_low),
        fd: nz32(cfg.fd, d.fd),
        conns: nz32(cfg.connections, d.conns),
        conns_inbound: nz32(cfg.connections, d.conns_inbound),
        conns_outbound: nz32(cfg.connections, d.conns_outbound),
    }
}

impl Services {
    /// Wire the shared collaborators from config. The chain client is
    /// injected so dev nodes and tests can run against the mock chain.
    pub async fn bootstrap(
        cfg: SpConfig,
        chain: Arc<dyn ChainClient>,
    ) -> anyhow::Result<Arc<Services>> {
        let signer = SignerKeyring::new(
            cfg.chain.chain_id.clone(),
            &cfg.signer,
            Arc::clone(&chain),
        )
        .await
        .context("initializing signer keyring")?;

        let piece_store: Arc<dyn PieceStore> = if cfg.piece_store.root == "mem" {
            Arc::new(MemPieceStore::new())
        } else {
            Arc::new(
                LocalFsPieceStore::new(cfg.piece_store.root.clone())
                    .context("opening piece store root")?,
            )
        };

        let rcmgr = Arc::new(ResourceManager::new(limit_from_config(&cfg.resource)));

        Ok(Arc::new(Services {
            config: Arc::new(cfg),
            signer: Arc::new(signer),
            chain,
            piece_store,
            rcmgr,
            db: Arc::new(MemSpDb::new()),
            metrics: Arc::new(Metrics::new()),
            shutdown: ShutdownSignal::new(),
        }))
    }

    pub fn config(&self) -> &Arc<SpConfig> {
        &self.config
    }

    pub fn signer(&self) -> &Arc<SignerKeyring> {
        &self.signer
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    pub fn piece_store(&self) -> &Arc<dyn PieceStore> {
        &self.piece_store
    }

    pub fn resource_manager(&self) -> &Arc<ResourceManager> {
        &self.rcmgr
    }

    pub fn db(&self) -> &Arc<dyn SpDb> {
        &self.db
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("rpc_address", &self.config.rpc_address())
            .field("chain_id", &self.config.chain.chain_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_resource_fields_fall_back_to_defaults() {
        let limit = limit_from_config(&ResourceConfig::default());
        assert_eq!(limit, Limit::default_node());

        let tuned = ResourceConfig { tasks: 64, ..ResourceConfig::default() };
        let limit = limit_from_config(&tuned);
        assert_eq!(limit.tasks, 64);
        assert_eq!(limit.memory, Limit::default_node().memory);
    }
}
