//! The resource manager: owns the system scope and per-service children.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::limit::{Limit, ScopeStat};
use crate::scope::{ReserveError, ResourceScope, ScopeSpan};

/// Admission control for the whole node. One system scope at the root; each
/// service gets a lazily-created child. Transaction spans hang off the
/// service scopes.
pub struct ResourceManager {
    system: Arc<ResourceScope>,
    services: Mutex<HashMap<String, Arc<ResourceScope>>>,
}

impl ResourceManager {
    pub fn new(limit: Limit) -> ResourceManager {
        ResourceManager {
            system: ResourceScope::root("system", limit),
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn system_scope(&self) -> &Arc<ResourceScope> {
        &self.system
    }

    /// The scope for one service, created on first use. Service scopes carry
    /// no limit of their own by default; the system limit governs.
    pub fn service_scope(&self, service: &str) -> Arc<ResourceScope> {
        let mut map = self.services.lock();
        if let Some(scope) = map.get(service) {
            return Arc::clone(scope);
        }
        let scope = ResourceScope::child(&self.system, service, Limit::infinite());
        map.insert(service.to_string(), Arc::clone(&scope));
        scope
    }

    /// Open a transaction span under a service scope. This is the single
    /// admission point modules call before running a pipeline.
    pub fn reserve(
        &self,
        service: &str,
        stat: ScopeStat,
    ) -> Result<ScopeSpan, ReserveError> {
        self.service_scope(service).reserve(stat)
    }

    /// Current system usage, for the monitor surface.
    pub fn system_usage(&self) -> ScopeStat {
        self.system.usage()
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("system", &self.system)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::PriorityBand;

    #[test]
    fn service_scope_is_cached() {
        let mgr = ResourceManager::new(Limit::default_node());
        let a = mgr.service_scope("approver");
        let b = mgr.service_scope("approver");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn reserve_rolls_up_to_system() {
        let mgr = ResourceManager::new(Limit::default_node());
        let span = mgr
            .reserve("uploader", ScopeStat::for_task(4096, PriorityBand::Medium))
            .expect("reserve");
        assert_eq!(mgr.system_usage().memory, 4096);
        span.release();
        assert_eq!(mgr.system_usage(), ScopeStat::default());
    }

    #[test]
    fn system_limit_governs_all_services() {
        let limit = Limit { tasks: 1, ..Limit::default_node() };
        let mgr = ResourceManager::new(limit);
        let _span = mgr
            .reserve("uploader", ScopeStat::for_task(0, PriorityBand::Low))
            .expect("first task");
        let err = mgr
            .reserve("downloader", ScopeStat::for_task(0, PriorityBand::Low))
            .expect_err("system saturated");
        assert!(matches!(err, ReserveError::Exhausted { ref scope, .. } if scope == "system"));
    }
}
