//! Hierarchical resource scopes and reservation spans.
//!
//! Scopes form a tree: system → service → transaction span. A reservation
//! touches counters at every ancestor; if any ancestor refuses, counters
//! already incremented are unwound and the caller gets [`ReserveError`].
//! Reservation never queues: a saturated scope refuses immediately, which is
//! the transient-overload signal clients retry with back-off.
//!
//! ## Guarantees
//!
//! - If `reserve` returns a span, every touched counter is ≤ its limit.
//! - If `reserve` fails, no counter anywhere retains the delta.
//! - Releasing a span twice is a no-op; dropping a span releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::limit::{Limit, ScopeStat};

/// Reservation refusal. Transient and retriable, distinct from programmer
/// errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReserveError {
    #[error("resource exhausted on scope {scope}: {resource}")]
    Exhausted { scope: String, resource: &'static str },
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    memory: i64,
    tasks_high: i32,
    tasks_medium: i32,
    tasks_low: i32,
    fd: i32,
    conns_inbound: i32,
    conns_outbound: i32,
}

impl Counters {
    fn tasks(&self) -> i32 {
        self.tasks_high + self.tasks_medium + self.tasks_low
    }

    fn conns(&self) -> i32 {
        self.conns_inbound + self.conns_outbound
    }
}

/// One node in the scope tree.
pub struct ResourceScope {
    name: String,
    limit: Limit,
    counters: Mutex<Counters>,
    owner: Option<Arc<ResourceScope>>,
}

impl ResourceScope {
    /// Root scope.
    pub fn root(name: impl Into<String>, limit: Limit) -> Arc<ResourceScope> {
        Arc::new(ResourceScope {
            name: name.into(),
            limit,
            counters: Mutex::new(Counters::default()),
            owner: None,
        })
    }

    /// Child scope under `owner`.
    pub fn child(
        owner: &Arc<ResourceScope>,
        name: impl Into<String>,
        limit: Limit,
    ) -> Arc<ResourceScope> {
        Arc::new(ResourceScope {
            name: name.into(),
            limit,
            counters: Mutex::new(Counters::default()),
            owner: Some(Arc::clone(owner)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    /// Current usage as a [`ScopeStat`] snapshot.
    pub fn usage(&self) -> ScopeStat {
        let c = self.counters.lock();
        ScopeStat {
            memory: c.memory,
            num_tasks_high: c.tasks_high,
            num_tasks_medium: c.tasks_medium,
            num_tasks_low: c.tasks_low,
            num_fd: c.fd,
            num_conns_inbound: c.conns_inbound,
            num_conns_outbound: c.conns_outbound,
        }
    }

    /// Check every counter against the limit, then commit. All-or-nothing
    /// under the scope lock.
    fn add_stat(&self, stat: &ScopeStat) -> Result<(), ReserveError> {
        let mut c = self.counters.lock();
        let refuse = |resource: &'static str| ReserveError::Exhausted {
            scope: self.name.clone(),
            resource,
        };
        if c.memory.saturating_add(stat.memory) > self.limit.memory {
            return Err(refuse("memory"));
        }
        if c.tasks().saturating_add(stat.num_tasks()) > self.limit.tasks {
            return Err(refuse("tasks"));
        }
        if c.tasks_high.saturating_add(stat.num_tasks_high) > self.limit.tasks_high {
            return Err(refuse("tasks_high"));
        }
        if c.tasks_medium.saturating_add(stat.num_tasks_medium) > self.limit.tasks_medium
        {
            return Err(refuse("tasks_medium"));
        }
        if c.tasks_low.saturating_add(stat.num_tasks_low) > self.limit.tasks_low {
            return Err(refuse("tasks_low"));
        }
        if c.fd.saturating_add(stat.num_fd) > self.limit.fd {
            return Err(refuse("fd"));
        }
        if c.conns().saturating_add(stat.num_conns()) > self.limit.conns {
            return Err(refuse("conns"));
        }
        if c.conns_inbound.saturating_add(stat.num_conns_inbound)
            > self.limit.conns_inbound
        {
            return Err(refuse("conns_inbound"));
        }
        if c.conns_outbound.saturating_add(stat.num_conns_outbound)
            > self.limit.conns_outbound
        {
            return Err(refuse("conns_outbound"));
        }
        c.memory += stat.memory;
        c.tasks_high += stat.num_tasks_high;
        c.tasks_medium += stat.num_tasks_medium;
        c.tasks_low += stat.num_tasks_low;
        c.fd += stat.num_fd;
        c.conns_inbound += stat.num_conns_inbound;
        c.conns_outbound += stat.num_conns_outbound;
        Ok(())
    }

    fn remove_stat(&self, stat: &ScopeStat) {
        let mut c = self.counters.lock();
        c.memory -= stat.memory;
        c.tasks_high -= stat.num_tasks_high;
        c.tasks_medium -= stat.num_tasks_medium;
        c.tasks_low -= stat.num_tasks_low;
        c.fd -= stat.num_fd;
        c.conns_inbound -= stat.num_conns_inbound;
        c.conns_outbound -= stat.num_conns_outbound;
    }

    /// Reserve `stat` on this scope and every ancestor. On refusal anywhere
    /// in the chain, the scopes already incremented are unwound.
    pub fn reserve(self: &Arc<Self>, stat: ScopeStat) -> Result<ScopeSpan, ReserveError> {
        let mut chain: Vec<Arc<ResourceScope>> = Vec::new();
        let mut cursor = Some(Arc::clone(self));
        while let Some(scope) = cursor {
            cursor = scope.owner.as_ref().map(Arc::clone);
            chain.push(scope);
        }

        let mut done: usize = 0;
        for scope in &chain {
            match scope.add_stat(&stat) {
                Ok(()) => done += 1,
                Err(err) => {
                    for unwind in &chain[..done] {
                        unwind.remove_stat(&stat);
                    }
                    return Err(err);
                }
            }
        }
        Ok(ScopeSpan { chain, stat, released: AtomicBool::new(false) })
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScope")
            .field("name", &self.name)
            .field("usage", &self.usage())
            .finish()
    }
}

/// A granted reservation. Holds its delta until released; dropping the span
/// releases it on every exit path, including panics.
pub struct ScopeSpan {
    chain: Vec<Arc<ResourceScope>>,
    stat: ScopeStat,
    released: AtomicBool,
}

impl ScopeSpan {
    pub fn stat(&self) -> &ScopeStat {
        &self.stat
    }

    /// Return the reservation to every scope in the chain. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for scope in &self.chain {
            scope.remove_stat(&self.stat);
        }
    }
}

impl Drop for ScopeSpan {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ScopeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeSpan")
            .field("stat", &self.stat)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::PriorityBand;

    fn small_root(tasks: i32) -> Arc<ResourceScope> {
        let limit = Limit { tasks, ..Limit::default_node() };
        ResourceScope::root("system", limit)
    }

    #[test]
    fn reserve_within_limit_commits_counters() {
        let root = small_root(4);
        let span = root
            .reserve(ScopeStat::for_task(100, PriorityBand::Medium))
            .expect("reserve");
        assert_eq!(root.usage().memory, 100);
        assert_eq!(root.usage().num_tasks_medium, 1);
        span.release();
        assert_eq!(root.usage(), ScopeStat::default());
    }

    #[test]
    fn reserve_refuses_without_incrementing() {
        let root = small_root(0);
        let err = root
            .reserve(ScopeStat::for_task(1, PriorityBand::Low))
            .expect_err("must refuse");
        assert!(matches!(err, ReserveError::Exhausted { .. }));
        assert_eq!(root.usage(), ScopeStat::default());
    }

    #[test]
    fn child_refusal_unwinds_ancestors() {
        let root = small_root(1024);
        let tight = Limit { memory: 10, ..Limit::infinite() };
        let child = ResourceScope::child(&root, "service", tight);
        let err = child
            .reserve(ScopeStat::for_task(100, PriorityBand::Low))
            .expect_err("child limit refuses");
        assert!(matches!(err, ReserveError::Exhausted { ref scope, .. } if scope == "service"));
        assert_eq!(root.usage(), ScopeStat::default());
        assert_eq!(child.usage(), ScopeStat::default());
    }

    #[test]
    fn ancestor_refusal_unwinds_child() {
        let tight = Limit { memory: 10, ..Limit::infinite() };
        let root = ResourceScope::root("system", tight);
        let child = ResourceScope::child(&root, "service", Limit::infinite());
        let err = child
            .reserve(ScopeStat::for_task(100, PriorityBand::Low))
            .expect_err("root limit refuses");
        assert!(matches!(err, ReserveError::Exhausted { ref scope, .. } if scope == "system"));
        assert_eq!(child.usage(), ScopeStat::default());
        assert_eq!(root.usage(), ScopeStat::default());
    }

    #[test]
    fn reservation_touches_every_ancestor() {
        let root = small_root(16);
        let child = ResourceScope::child(&root, "service", Limit::infinite());
        let _span = child
            .reserve(ScopeStat::for_task(64, PriorityBand::High))
            .expect("reserve");
        assert_eq!(root.usage().memory, 64);
        assert_eq!(child.usage().memory, 64);
        assert_eq!(root.usage().num_tasks_high, 1);
    }

    #[test]
    fn double_release_is_noop() {
        let root = small_root(4);
        let span = root
            .reserve(ScopeStat::for_task(50, PriorityBand::Low))
            .expect("reserve");
        span.release();
        span.release();
        assert_eq!(root.usage(), ScopeStat::default());
    }

    #[test]
    fn drop_releases_span() {
        let root = small_root(4);
        {
            let _span = root
                .reserve(ScopeStat::for_task(50, PriorityBand::Low))
                .expect("reserve");
            assert_eq!(root.usage().memory, 50);
        }
        assert_eq!(root.usage(), ScopeStat::default());
    }

    #[test]
    fn reserve_release_restores_prior_counters() {
        let root = small_root(8);
        let first = root
            .reserve(ScopeStat::for_task(10, PriorityBand::Medium))
            .expect("first");
        let before = root.usage();
        let second = root
            .reserve(ScopeStat::for_task(20, PriorityBand::High))
            .expect("second");
        second.release();
        assert_eq!(root.usage(), before);
        first.release();
        assert_eq!(root.usage(), ScopeStat::default());
    }

    #[test]
    fn per_band_limit_is_enforced() {
        let limit = Limit { tasks_low: 1, ..Limit::default_node() };
        let root = ResourceScope::root("system", limit);
        let _a = root
            .reserve(ScopeStat::for_task(0, PriorityBand::Low))
            .expect("first low");
        let err = root
            .reserve(ScopeStat::for_task(0, PriorityBand::Low))
            .expect_err("second low refused");
        assert!(matches!(err, ReserveError::Exhausted { resource: "tasks_low", .. }));
        // other bands unaffected
        let _b = root
            .reserve(ScopeStat::for_task(0, PriorityBand::High))
            .expect("high still fits");
    }
}
