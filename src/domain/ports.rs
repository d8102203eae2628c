//! Domain Ports - Core trait definitions for the device plugin
//!
//! These traits define the boundaries between the device-management engine
//! and the host or kubelet. Adapters implement these traits to provide
//! concrete functionality; tests substitute in-memory doubles.

use crate::config::DevicePluginConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Device Scanner Port
// =============================================================================

/// Port for enumerating host block devices
///
/// Implementations must be cheap enough to call while the discovery cache
/// lock is held.
pub trait DeviceScanner: Send + Sync {
    /// Enumerate raw device paths, e.g. `/dev/sda1`, `/dev/sda`
    fn block_devices(&self) -> Result<Vec<String>>;

    /// Resolve a glob pattern against the host filesystem
    fn find_devices(&self, pattern: &str) -> Result<Vec<String>>;

    /// Check that a path exists on the host
    fn device_exists(&self, path: &str) -> bool;
}

// =============================================================================
// Config Source Port
// =============================================================================

/// Port for loading the configuration snapshot
pub trait ConfigSource: Send + Sync {
    /// Load a fresh snapshot
    fn load(&self) -> Result<DevicePluginConfig>;
}

// =============================================================================
// Registrar Port
// =============================================================================

/// Registration message sent to the kubelet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Device plugin API version
    pub version: String,
    /// Socket file name relative to the device plugin directory
    pub endpoint: String,
    /// Extended resource name served by this plugin
    pub resource_name: String,
}

/// Port for announcing the plugin to the kubelet
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Register the plugin; any error is fatal to startup
    async fn register(&self, registration: Registration) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DeviceScannerRef = Arc<dyn DeviceScanner>;
pub type ConfigSourceRef = Arc<dyn ConfigSource>;
pub type RegistrarRef = Arc<dyn Registrar>;
