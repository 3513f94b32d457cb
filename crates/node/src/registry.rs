//! The module registry and the kernel's typed module handles.
//!
//! The registry is an explicit value built during program bootstrap and
//! handed to the kernel — not hidden module-level state. Registration order
//! is preserved: it is the start order, and stop runs in reverse. An empty
//! or duplicate name is a fatal bootstrap error.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;

use crate::modules::approver::ApproverModule;
use crate::modules::authenticator::AuthenticatorModule;
use crate::modules::downloader::DownloaderModule;
use crate::modules::executor::ExecutorModule;
use crate::modules::manager::ManagerModule;
use crate::modules::p2p::P2pModule;
use crate::modules::receiver::ReceiverModule;
use crate::modules::signer::SignerModule;
use crate::modules::uploader::UploaderModule;
use crate::modules::{
    Module, APPROVER_MODULE, AUTHENTICATOR_MODULE, DOWNLOADER_MODULE, EXECUTOR_MODULE,
    MANAGER_MODULE, P2P_MODULE, RECEIVER_MODULE, SIGNER_MODULE, UPLOADER_MODULE,
};
use crate::services::Services;

use ospn_common::error::{CodedError, ERR_MODULE_MISSING};

/// Typed handles the kernel uses to route RPCs. Each setter rejects a
/// repeated assignment — two modules claiming the same slot is a wiring
/// bug caught at build time.
#[derive(Default)]
pub struct ModuleHandles {
    approver: Option<Arc<ApproverModule>>,
    authenticator: Option<Arc<AuthenticatorModule>>,
    downloader: Option<Arc<DownloaderModule>>,
    executor: Option<Arc<ExecutorModule>>,
    manager: Option<Arc<ManagerModule>>,
    p2p: Option<Arc<P2pModule>>,
    receiver: Option<Arc<ReceiverModule>>,
    signer: Option<Arc<SignerModule>>,
    uploader: Option<Arc<UploaderModule>>,
}

macro_rules! handle_accessors {
    ($field:ident, $set:ident, $ty:ty, $name:expr) => {
        pub fn $set(&mut self, module: Arc<$ty>) -> anyhow::Result<()> {
            if self.$field.is_some() {
                bail!("module {} already assigned", $name);
            }
            self.$field = Some(module);
            Ok(())
        }

        pub fn $field(&self) -> Result<&Arc<$ty>, CodedError> {
            self.$field
                .as_ref()
                .ok_or_else(|| ERR_MODULE_MISSING.with_detail($name))
        }
    };
}

impl ModuleHandles {
    handle_accessors!(approver, set_approver, ApproverModule, APPROVER_MODULE);
    handle_accessors!(
        authenticator,
        set_authenticator,
        AuthenticatorModule,
        AUTHENTICATOR_MODULE
    );
    handle_accessors!(downloader, set_downloader, DownloaderModule, DOWNLOADER_MODULE);
    handle_accessors!(executor, set_executor, ExecutorModule, EXECUTOR_MODULE);
    handle_accessors!(manager, set_manager, ManagerModule, MANAGER_MODULE);
    handle_accessors!(p2p, set_p2p, P2pModule, P2P_MODULE);
    handle_accessors!(receiver, set_receiver, ReceiverModule, RECEIVER_MODULE);
    handle_accessors!(signer, set_signer, SignerModule, SIGNER_MODULE);
    handle_accessors!(uploader, set_uploader, UploaderModule, UPLOADER_MODULE);
}

pub type ModuleFactory = Box<
    dyn Fn(&Arc<Services>, &mut ModuleHandles) -> anyhow::Result<Arc<dyn Module>>
        + Send
        + Sync,
>;

pub struct ModuleRegistry {
    order: Vec<String>,
    descriptions: HashMap<String, String>,
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> ModuleRegistry {
        ModuleRegistry {
            order: Vec::new(),
            descriptions: HashMap::new(),
            factories: HashMap::new(),
        }
    }

    /// Register one module. Panics on an empty or duplicate name — this is
    /// bootstrap, and a bad registration must never reach serving.
    pub fn register(&mut self, name: &str, description: &str, factory: ModuleFactory) {
        if name.is_empty() {
            panic!("module name must not be empty");
        }
        if self.factories.contains_key(name) {
            panic!("module {} registered twice", name);
        }
        self.order.push(name.to_string());
        self.descriptions.insert(name.to_string(), description.to_string());
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// (name, description) pairs in registration order.
    pub fn registered_modules(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    self.descriptions.get(name).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn build_module(
        &self,
        name: &str,
        services: &Arc<Services>,
        handles: &mut ModuleHandles,
    ) -> Option<anyhow::Result<Arc<dyn Module>>> {
        self.factories.get(name).map(|factory| factory(services, handles))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        ModuleRegistry::new()
    }
}

/// The standard module set. Bootstrap calls this once; the config's
/// `server` list then selects which registered modules the node actually
/// runs.
pub fn register_default_modules(registry: &mut ModuleRegistry) {
    registry.register(
        APPROVER_MODULE,
        "grants approvals for bucket/object creation, migration, and replication",
        Box::new(|services, handles| {
            let module = ApproverModule::new(Arc::clone(services));
            handles.set_approver(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        UPLOADER_MODULE,
        "streams user payloads into primary pieces",
        Box::new(|services, handles| {
            let module = UploaderModule::new(Arc::clone(services));
            handles.set_uploader(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        DOWNLOADER_MODULE,
        "serves object reads, piece reads, and integrity challenges",
        Box::new(|services, handles| {
            let module = DownloaderModule::new(Arc::clone(services));
            handles.set_downloader(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        RECEIVER_MODULE,
        "receives replicated pieces and signs confirmations",
        Box::new(|services, handles| {
            let module = ReceiverModule::new(Arc::clone(services));
            handles.set_receiver(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        MANAGER_MODULE,
        "owns the dispatchable task pool and the dispatch/report cycle",
        Box::new(|services, handles| {
            let module = ManagerModule::new(Arc::clone(services));
            handles.set_manager(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        EXECUTOR_MODULE,
        "pulls dispatched tasks and runs them against this node's stores",
        Box::new(|services, handles| {
            let module = ExecutorModule::new(Arc::clone(services));
            handles.set_executor(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        P2P_MODULE,
        "fans replicate-approval requests out to the peer set",
        Box::new(|services, handles| {
            let module = P2pModule::new(Arc::clone(services));
            handles.set_p2p(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        SIGNER_MODULE,
        "signs protocol messages and submits on-chain transactions",
        Box::new(|services, handles| {
            let module = SignerModule::new(Arc::clone(services));
            handles.set_signer(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
    registry.register(
        AUTHENTICATOR_MODULE,
        "per-operation permission checks and off-chain auth keys",
        Box::new(|services, handles| {
            let module = AuthenticatorModule::new(Arc::clone(services));
            handles.set_authenticator(Arc::clone(&module))?;
            Ok(module as Arc<dyn Module>)
        }),
    );
}

/// The default `server` list when config names none: every standard module.
pub fn default_server_list() -> Vec<String> {
    vec![
        APPROVER_MODULE.to_string(),
        UPLOADER_MODULE.to_string(),
        DOWNLOADER_MODULE.to_string(),
        RECEIVER_MODULE.to_string(),
        MANAGER_MODULE.to_string(),
        EXECUTOR_MODULE.to_string(),
        P2P_MODULE.to_string(),
        SIGNER_MODULE.to_string(),
        AUTHENTICATOR_MODULE.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_factory() -> ModuleFactory {
        Box::new(|services, _handles| {
            Ok(ApproverModule::new(Arc::clone(services)) as Arc<dyn Module>)
        })
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut reg = ModuleRegistry::new();
        reg.register("b", "second", noop_factory());
        reg.register("a", "first", noop_factory());
        let names: Vec<String> =
            reg.registered_modules().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(reg.contains("a"));
        assert!(!reg.contains("c"));
    }

    #[test]
    fn duplicate_registration_panics() {
        let result = std::panic::catch_unwind(|| {
            let mut reg = ModuleRegistry::new();
            reg.register("dup", "one", noop_factory());
            reg.register("dup", "two", noop_factory());
        });
        assert!(result.is_err());
    }

    #[test]
    fn empty_name_panics() {
        let result = std::panic::catch_unwind(|| {
            let mut reg = ModuleRegistry::new();
            reg.register("", "nameless", noop_factory());
        });
        assert!(result.is_err());
    }

    #[test]
    fn default_set_registers_all_modules() {
        let mut reg = ModuleRegistry::new();
        register_default_modules(&mut reg);
        let names: Vec<String> =
            reg.registered_modules().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), default_server_list().len());
        for name in default_server_list() {
            assert!(reg.contains(&name), "missing {name}");
        }
    }
}
