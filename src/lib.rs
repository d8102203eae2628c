//! Block Device Plugin
//!
//! A kubelet device plugin that advertises host block devices as an
//! extended resource and hands them to containers, allowing each device to
//! be shared by a bounded number of containers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               kubelet                                │
//! └───────────────┬───────────────────────────────────▲──────────────────┘
//!      Register   │                 ListAndWatch /    │
//!   (kubelet.sock)│                 Allocate (plugin socket)
//! ┌───────────────▼───────────────────────────────────┴──────────────────┐
//! │  PluginServer ── DevicePluginService ── ListAndWatchSession          │
//! │       │                   │                     ▲                    │
//! │  SocketHealthMonitor      │                     │ stop / restart     │
//! │       └───────────────────┼─────────────────────┘                    │
//! ├───────────────────────────▼──────────────────────────────────────────┤
//! │                         DeviceEngine                                 │
//! │  ┌───────────────────────────┐      ┌──────────────────────────────┐ │
//! │  │ DiscoveryCache            │      │ DeviceAllocator              │ │
//! │  │ scanner → filter → cache  │      │ UsageLedger (upper limit)    │ │
//! │  └───────────────────────────┘      └──────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`plugin`]: gRPC service, stream state machine, server lifecycle
//! - [`hardware`]: device discovery, filtering, caching, and allocation
//! - [`config`]: configuration snapshot and its sources
//! - [`domain`]: capability traits injected into the engine
//! - [`metrics`]: Prometheus counters
//! - [`error`]: error types and handling

pub mod config;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod metrics;
pub mod plugin;

/// Generated kubelet device plugin API (`v1beta1`)
pub mod v1beta1 {
    tonic::include_proto!("v1beta1");
}

// Re-export commonly used types
pub use config::{
    DevicePluginConfig, DiscoveryStrategy, FileConfigSource, StaticConfigSource,
    DEFAULT_CONFIG_PATH,
};

pub use domain::ports::{
    ConfigSource, ConfigSourceRef, DeviceScanner, DeviceScannerRef, Registrar, RegistrarRef,
    Registration,
};

pub use error::{Error, ErrorClass, Result};

pub use hardware::{
    ContainerGrant, ContainerRequest, DeviceAllocator, DeviceGrant, DiscoveryCache, ScannerConfig,
    SysfsScanner, UsageLedger,
};

pub use metrics::PluginMetrics;

pub use plugin::{
    DeviceEngine, DevicePluginService, KubeletRegistrar, Lifecycle, PluginServer,
    PluginServerConfig, SessionState, SocketHealthMonitor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
