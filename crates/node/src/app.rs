//! # The Application Kernel
//!
//! Owns the process lifecycle: builds modules from config through the
//! registry, starts them in registration order, serves the RPC façade, and
//! tears everything down in reverse under a bounded stop budget.
//!
//! ## Lifecycle
//!
//! ```text
//! build ─▶ start (in order, rollback on first failure)
//!            │
//!            ▼
//!        serve RPC ──signal / fatal──▶ cancel process context
//!            │
//!            ▼
//!        stop (reverse order, 30 s budget, then abandon)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::modules::Module;
use crate::registry::{default_server_list, ModuleHandles, ModuleRegistry};
use crate::rpc::server::{build_monitor_router, build_router};
use crate::services::Services;

/// Bounded cleanup time for the whole stop sequence. Exceeding it logs and
/// abandons cleanup; stop never blocks forever.
pub const STOP_BUDGET: Duration = Duration::from_secs(30);

pub struct App {
    services: Arc<Services>,
    /// Built modules in start order.
    modules: Vec<Arc<dyn Module>>,
    handles: ModuleHandles,
}

impl App {
    /// Instantiate every module the config selects. A name with no
    /// registered factory aborts the build.
    pub fn build(
        registry: &ModuleRegistry,
        services: Arc<Services>,
    ) -> anyhow::Result<Arc<App>> {
        let selected: Vec<String> = if services.config().server.is_empty() {
            default_server_list()
        } else {
            services.config().server.clone()
        };
        for name in &selected {
            if !registry.contains(name) {
                bail!("module {} has no registered factory", name);
            }
        }

        let mut handles = ModuleHandles::default();
        let mut modules: Vec<Arc<dyn Module>> = Vec::with_capacity(selected.len());
        // iterate the registry so start order equals registration order,
        // whatever order the config lists names in
        for (name, _) in registry.registered_modules() {
            if !selected.contains(&name) {
                continue;
            }
            match registry.build_module(&name, &services, &mut handles) {
                Some(Ok(module)) => {
                    info!(module = %name, "built module");
                    modules.push(module);
                }
                Some(Err(e)) => return Err(e.context(format!("building module {name}"))),
                None => bail!("module {} has no registered factory", name),
            }
        }
        Ok(Arc::new(App { services, modules, handles }))
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn handles(&self) -> &ModuleHandles {
        &self.handles
    }

    /// Names of the built modules, in start order.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Start modules in order. The first failure stops the already-started
    /// modules in reverse, cancels the process context, and surfaces the
    /// error.
    pub async fn start(&self) -> anyhow::Result<()> {
        for (idx, module) in self.modules.iter().enumerate() {
            info!(module = module.name(), "starting module");
            if let Err(e) = module.start().await {
                error!(module = module.name(), err = %e, "module start failed, rolling back");
                for started in self.modules[..idx].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        warn!(module = started.name(), err = %stop_err, "rollback stop failed");
                    }
                }
                self.services.shutdown().cancel();
                return Err(e.context(format!("starting module {}", module.name())));
            }
        }
        info!(modules = self.modules.len(), "all modules started");
        Ok(())
    }

    /// Stop modules in reverse order under [`STOP_BUDGET`].
    pub async fn stop(&self) {
        let sequence = async {
            for module in self.modules.iter().rev() {
                if let Err(e) = module.stop().await {
                    warn!(module = module.name(), err = %e, "module stop failed");
                }
            }
        };
        match tokio::time::timeout(STOP_BUDGET, sequence).await {
            Ok(()) => info!("all modules stopped"),
            Err(_) => warn!(
                budget_secs = STOP_BUDGET.as_secs(),
                "stop budget exceeded, abandoning cleanup"
            ),
        }
    }

    /// Install process signal handlers. The first listed signal received
    /// cancels the process context exactly once.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let shutdown = self.services.shutdown().clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut interrupt = match signal(SignalKind::interrupt()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(err = %e, "installing SIGINT handler failed");
                        return;
                    }
                };
                let mut terminate = match signal(SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(err = %e, "installing SIGTERM handler failed");
                        return;
                    }
                };
                let mut quit = match signal(SignalKind::quit()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(err = %e, "installing SIGQUIT handler failed");
                        return;
                    }
                };
                tokio::select! {
                    _ = interrupt.recv() => info!("received SIGINT"),
                    _ = terminate.recv() => info!("received SIGTERM"),
                    _ = quit.recv() => info!("received SIGQUIT"),
                }
            }
            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(err = %e, "ctrl-c handler failed");
                    return;
                }
            }
            shutdown.cancel();
        });
    }

    /// Start modules, serve the RPC façade until the process context is
    /// cancelled, then stop everything.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.start().await?;
        self.install_signal_handlers();

        if let Some(monitor_addr) = self.services.config().monitor_address.clone() {
            let router = build_monitor_router(Arc::clone(&self.services));
            let shutdown = self.services.shutdown().clone();
            tokio::spawn(async move {
                let listener = match TcpListener::bind(&monitor_addr).await {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(addr = %monitor_addr, err = %e, "monitor bind failed");
                        return;
                    }
                };
                info!(addr = %monitor_addr, "monitor listening");
                let serve = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await });
                if let Err(e) = serve.await {
                    warn!(err = %e, "monitor server error");
                }
            });
        }

        let rpc_address = self.services.config().rpc_address().to_string();
        let listener = TcpListener::bind(&rpc_address)
            .await
            .with_context(|| format!("binding rpc address {rpc_address}"))?;
        info!(addr = %rpc_address, "rpc façade listening");

        let router = build_router(Arc::clone(&self));
        let shutdown = self.services.shutdown().clone();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("rpc server")?;

        self.stop().await;
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("modules", &self.module_names())
            .finish()
    }
}
