//! Domain layer - Capability ports
//!
//! This module defines the traits (ports) that host and kubelet adapters
//! implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
