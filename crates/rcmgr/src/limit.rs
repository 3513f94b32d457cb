//! Limits and reservation deltas.
//!
//! A [`Limit`] is an immutable upper bound on a scope's counters. A
//! [`ScopeStat`] is the delta one reservation requests. Both travel on the
//! wire: tasks declare their footprint as a `ScopeStat` and executors
//! advertise their capability as a `Limit`.

use serde::{Deserialize, Serialize};

const GIB: i64 = 1024 * 1024 * 1024;

/// Default system memory bound: 0.9 of 8 GiB.
pub const DEFAULT_MEMORY_BYTES: i64 = 8 * GIB / 10 * 9;
pub const DEFAULT_TASKS: i32 = 10240;
pub const DEFAULT_TASKS_HIGH: i32 = 128;
pub const DEFAULT_TASKS_MEDIUM: i32 = 1024;
pub const DEFAULT_TASKS_LOW: i32 = 16;

/// Immutable upper bounds for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub memory: i64,
    /// Total concurrent tasks across all bands.
    pub tasks: i32,
    pub tasks_high: i32,
    pub tasks_medium: i32,
    pub tasks_low: i32,
    pub fd: i32,
    /// Total connections (inbound + outbound).
    pub conns: i32,
    pub conns_inbound: i32,
    pub conns_outbound: i32,
}

impl Limit {
    /// The default node limiter used when config supplies nothing.
    pub fn default_node() -> Limit {
        Limit {
            memory: DEFAULT_MEMORY_BYTES,
            tasks: DEFAULT_TASKS,
            tasks_high: DEFAULT_TASKS_HIGH,
            tasks_medium: DEFAULT_TASKS_MEDIUM,
            tasks_low: DEFAULT_TASKS_LOW,
            fd: i32::MAX,
            conns: i32::MAX,
            conns_inbound: i32::MAX,
            conns_outbound: i32::MAX,
        }
    }

    /// No bounds at all. Child scopes default to this so the parent limit
    /// governs.
    pub fn infinite() -> Limit {
        Limit {
            memory: i64::MAX,
            tasks: i32::MAX,
            tasks_high: i32::MAX,
            tasks_medium: i32::MAX,
            tasks_low: i32::MAX,
            fd: i32::MAX,
            conns: i32::MAX,
            conns_inbound: i32::MAX,
            conns_outbound: i32::MAX,
        }
    }

    /// Whether a single reservation of `stat` could ever fit under this
    /// limit. This is the `estimate ⊑ node_limit` relation the manager uses
    /// to match tasks against executor capabilities.
    pub fn not_less_than(&self, stat: &ScopeStat) -> bool {
        self.memory >= stat.memory
            && self.tasks >= stat.num_tasks()
            && self.tasks_high >= stat.num_tasks_high
            && self.tasks_medium >= stat.num_tasks_medium
            && self.tasks_low >= stat.num_tasks_low
            && self.fd >= stat.num_fd
            && self.conns >= stat.num_conns()
            && self.conns_inbound >= stat.num_conns_inbound
            && self.conns_outbound >= stat.num_conns_outbound
    }
}

/// The delta one reservation requests. All fields are non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStat {
    pub memory: i64,
    pub num_tasks_high: i32,
    pub num_tasks_medium: i32,
    pub num_tasks_low: i32,
    pub num_fd: i32,
    pub num_conns_inbound: i32,
    pub num_conns_outbound: i32,
}

impl ScopeStat {
    /// Footprint of one task in the given priority band with a memory
    /// estimate.
    pub fn for_task(memory: i64, band: PriorityBand) -> ScopeStat {
        let mut stat = ScopeStat { memory, ..ScopeStat::default() };
        match band {
            PriorityBand::High => stat.num_tasks_high = 1,
            PriorityBand::Medium => stat.num_tasks_medium = 1,
            PriorityBand::Low => stat.num_tasks_low = 1,
        }
        stat
    }

    pub fn num_tasks(&self) -> i32 {
        self.num_tasks_high + self.num_tasks_medium + self.num_tasks_low
    }

    pub fn num_conns(&self) -> i32 {
        self.num_conns_inbound + self.num_conns_outbound
    }
}

/// Task priority bands used for per-band accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityBand {
    Low,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_node_limit_values() {
        let l = Limit::default_node();
        assert_eq!(l.memory, 8 * 1024 * 1024 * 1024 / 10 * 9);
        assert_eq!(l.tasks, 10240);
        assert_eq!(l.tasks_high, 128);
        assert_eq!(l.tasks_medium, 1024);
        assert_eq!(l.tasks_low, 16);
        assert_eq!(l.fd, i32::MAX);
        assert_eq!(l.conns, i32::MAX);
    }

    #[test]
    fn not_less_than_checks_every_counter() {
        let l = Limit::default_node();
        let fits = ScopeStat::for_task(1024, PriorityBand::High);
        assert!(l.not_less_than(&fits));

        let too_much_memory =
            ScopeStat { memory: i64::MAX, ..ScopeStat::for_task(0, PriorityBand::Low) };
        assert!(!l.not_less_than(&too_much_memory));

        let mut zero_tasks = l;
        zero_tasks.tasks = 0;
        assert!(!zero_tasks.not_less_than(&fits));
    }

    #[test]
    fn stat_band_placement() {
        let s = ScopeStat::for_task(10, PriorityBand::Medium);
        assert_eq!(s.num_tasks(), 1);
        assert_eq!(s.num_tasks_medium, 1);
        assert_eq!(s.num_tasks_high, 0);
    }
}
