//! # OSPN Resource Manager
//!
//! Admission control for the storage provider node. Scopes form a tree
//! (system → service → transaction span); every reservation is accounted at
//! each ancestor, refusals unwind cleanly, and spans release on drop.
//!
//! Exhaustion is a transient, retriable condition — callers map
//! [`ReserveError`] to their service's `ExhaustResource` wire code.

pub mod limit;
pub mod manager;
pub mod scope;

pub use limit::{Limit, PriorityBand, ScopeStat};
pub use manager::ResourceManager;
pub use scope::{ReserveError, ResourceScope, ScopeSpan};
