//! CLI entry: config load, env overrides, registry population, kernel run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ospn_chain::{ChainClient, MockChainClient, RpcChainClient};
use ospn_common::error::registry as error_registry;
use ospn_common::SpConfig;

use crate::app::App;
use crate::registry::{register_default_modules, ModuleRegistry};
use crate::services::Services;
use crate::{NODE_NAME, NODE_VERSION};

#[derive(Parser)]
#[command(name = NODE_NAME, version = NODE_VERSION, about = "OSPN storage provider node")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node.
    Run {
        /// Path to the TOML config file.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
        /// Use the in-memory mock chain (dev only).
        #[arg(long)]
        mock_chain: bool,
    },
    /// Print the registered modules.
    Modules,
    /// Print the error catalogue.
    Errors,
    /// Print the version.
    Version,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("{} {}", NODE_NAME, NODE_VERSION);
            Ok(())
        }
        Command::Modules => {
            let mut registry = ModuleRegistry::new();
            register_default_modules(&mut registry);
            for (name, description) in registry.registered_modules() {
                println!("{name}: {description}");
            }
            Ok(())
        }
        Command::Errors => {
            for err in error_registry().list() {
                println!(
                    "{} {} {} {}",
                    err.inner_code, err.http_status, err.code_space, err.description
                );
            }
            Ok(())
        }
        Command::Run { config, mock_chain } => {
            init_tracing();
            run_node(config, mock_chain).await
        }
    }
}

async fn run_node(config_path: PathBuf, mock_chain: bool) -> anyhow::Result<()> {
    // the error catalogue registers (and dedup-checks) at bootstrap
    let registered = error_registry().len();
    info!(registered, "error catalogue registered");

    let mut cfg = if config_path.is_file() {
        SpConfig::load_from_file(&config_path)
            .map_err(|e| anyhow::anyhow!("loading {}: {}", config_path.display(), e))?
    } else {
        warn!(path = %config_path.display(), "config file missing, using defaults");
        SpConfig::default()
    };
    cfg.apply_env_overrides();

    let chain: Arc<dyn ChainClient> = if mock_chain {
        warn!("running against the in-memory mock chain");
        Arc::new(MockChainClient::new())
    } else {
        Arc::new(RpcChainClient::new(
            cfg.chain.endpoints.clone(),
            cfg.chain.block_interval_secs,
        ))
    };

    let services = Services::bootstrap(cfg, chain)
        .await
        .context("bootstrapping services")?;

    let mut registry = ModuleRegistry::new();
    register_default_modules(&mut registry);

    let app = App::build(&registry, services).context("building application")?;
    info!(modules = ?app.module_names(), "node built");
    app.run().await
}
