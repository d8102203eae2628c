//! Hardware Module
//!
//! Provides block device discovery, filtering, caching, and usage-limited
//! allocation for the device plugin.

pub mod discovery;
pub mod allocation;

pub use discovery::*;
pub use allocation::*;
