//! Device Plugin Module
//!
//! The kubelet-facing half of the daemon: the `DevicePlugin` gRPC service,
//! the ListAndWatch state machine, the socket health monitor, kubelet
//! registration, and the server lifecycle tying them together.

pub mod engine;
pub mod health;
pub mod lifecycle;
pub mod registration;
pub mod server;
pub mod service;
pub mod session;

pub use engine::DeviceEngine;
pub use health::{MonitorExit, SocketHealthMonitor};
pub use lifecycle::Lifecycle;
pub use registration::{connect_unix, KubeletRegistrar};
pub use server::{PluginServer, PluginServerConfig};
pub use service::DevicePluginService;
pub use session::{ListAndWatchSession, SessionState};

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Directory where the kubelet expects device plugin sockets
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";

/// Kubelet registration socket, relative to [`DEVICE_PLUGIN_PATH`]
pub const KUBELET_SOCKET: &str = "kubelet.sock";

/// Device plugin API version sent at registration
pub const API_VERSION: &str = "v1beta1";

/// Health value reported for every device
pub const HEALTHY: &str = "Healthy";

pub const DEFAULT_SOCKET_NAME: &str = "power-dev.csi.ibm.com-reg.sock";

pub const DEFAULT_RESOURCE_NAME: &str = "power-dev-plugin/dev";

/// Tick of the socket health monitor
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Advertised device list shared by the server and its sessions
pub type DeviceList = Arc<RwLock<Vec<String>>>;
