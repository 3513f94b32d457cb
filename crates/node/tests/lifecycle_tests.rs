//! Kernel lifecycle: build, ordered start with rollback, reverse stop.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use ospn_chain::{ChainClient, MockChainClient};
use ospn_common::SpConfig;
use ospn_node::modules::Module;
use ospn_node::registry::{register_default_modules, ModuleRegistry};
use ospn_node::{App, Services, STOP_BUDGET};

async fn test_services(cfg: SpConfig) -> Arc<Services> {
    let chain: Arc<dyn ChainClient> = Arc::new(MockChainClient::new());
    Services::bootstrap(cfg, chain).await.expect("bootstrap services")
}

/// Records lifecycle events into a shared log; optionally fails start.
struct RecordingModule {
    name: &'static str,
    fail_start: bool,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("start {}", self.name));
        if self.fail_start {
            anyhow::bail!("{} refuses to start", self.name);
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("stop {}", self.name));
        Ok(())
    }
}

fn recording_registry(
    log: &Arc<Mutex<Vec<String>>>,
    fail: &'static str,
) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    for name in ["alpha", "beta", "gamma"] {
        let log = Arc::clone(log);
        registry.register(
            name,
            "recording module",
            Box::new(move |_services, _handles| {
                Ok(Arc::new(RecordingModule {
                    name,
                    fail_start: name == fail,
                    log: Arc::clone(&log),
                }) as Arc<dyn Module>)
            }),
        );
    }
    registry
}

#[tokio::test]
async fn start_failure_rolls_back_and_cancels_context() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&log, "beta");
    let cfg = SpConfig {
        server: vec!["alpha".into(), "beta".into(), "gamma".into()],
        ..SpConfig::default()
    };
    let services = test_services(cfg).await;
    let app = App::build(&registry, Arc::clone(&services)).expect("build");

    let err = app.start().await.expect_err("beta start fails");
    assert!(err.to_string().contains("beta"));

    // gamma never started; alpha was stopped during rollback
    let events = log.lock().clone();
    assert_eq!(events, vec!["start alpha", "start beta", "stop alpha"]);
    assert!(services.shutdown().is_cancelled());
}

#[tokio::test]
async fn start_and_stop_follow_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&log, "none");
    // config lists names out of order; registration order still governs
    let cfg = SpConfig {
        server: vec!["gamma".into(), "alpha".into(), "beta".into()],
        ..SpConfig::default()
    };
    let services = test_services(cfg).await;
    let app = App::build(&registry, services).expect("build");

    app.start().await.expect("start");
    app.stop().await;

    let events = log.lock().clone();
    assert_eq!(
        events,
        vec![
            "start alpha",
            "start beta",
            "start gamma",
            "stop gamma",
            "stop beta",
            "stop alpha"
        ]
    );
}

#[tokio::test]
async fn build_rejects_unknown_module_names() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&log, "none");
    let cfg = SpConfig { server: vec!["delta".into()], ..SpConfig::default() };
    let services = test_services(cfg).await;
    let err = App::build(&registry, services).expect_err("unknown module");
    assert!(err.to_string().contains("delta"));
}

#[tokio::test]
async fn default_module_set_builds_and_cycles() {
    let mut registry = ModuleRegistry::new();
    register_default_modules(&mut registry);
    let services = test_services(SpConfig::default()).await;
    let app = App::build(&registry, Arc::clone(&services)).expect("build");

    assert_eq!(app.module_names().len(), 9);
    app.start().await.expect("start");
    app.stop().await;
    // stopping again is harmless; the budget bounds the whole sequence
    assert_eq!(STOP_BUDGET.as_secs(), 30);
}

#[tokio::test]
async fn module_query_reflects_registration() {
    let mut registry = ModuleRegistry::new();
    register_default_modules(&mut registry);
    let names: Vec<String> =
        registry.registered_modules().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names[0], "approver");
    assert!(names.contains(&"manager".to_string()));
    assert!(names.contains(&"executor".to_string()));
}
