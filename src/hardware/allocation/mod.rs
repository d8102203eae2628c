//! Allocation Module
//!
//! Provides per-device usage accounting, upper-limit enforcement, and
//! cgroup permission resolution for container grants.

pub mod allocator;
pub mod ledger;
pub mod permissions;

pub use allocator::*;
pub use ledger::*;
pub use permissions::*;
