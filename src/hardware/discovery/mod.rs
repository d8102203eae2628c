//! Hardware Discovery Module
//!
//! Enumerates host block devices, filters them through the configured
//! include/exclude globs, and caches the result under the time strategy.

pub mod scanner;
pub mod filter;
pub mod cache;

pub use scanner::*;
pub use filter::{
    apply_exclude_filters, apply_include_filters, clean_patterns, filter_devices, matches_any,
    scan_devices, DEV_PREFIX,
};
pub use cache::*;
