//! Plugin Server
//!
//! Binds the plugin's Unix socket, serves the `DevicePlugin` gRPC service
//! on it, runs the socket health monitor, and registers with the kubelet.
//!
//! # Startup sequence
//!
//! 1. Discover devices (a failure aborts startup)
//! 2. Remove any stale socket and bind a fresh listener
//! 3. Spawn the gRPC server and the health monitor
//! 4. Dial the socket until it accepts connections
//! 5. Register with the kubelet; on failure stop again so no socket is left

use super::engine::DeviceEngine;
use super::health::SocketHealthMonitor;
use super::lifecycle::{remove_socket, Lifecycle};
use super::registration::connect_unix;
use super::service::DevicePluginService;
use super::{
    DeviceList, API_VERSION, DEFAULT_RESOURCE_NAME, DEFAULT_SOCKET_NAME, DEVICE_PLUGIN_PATH,
    HEALTH_CHECK_INTERVAL, KUBELET_SOCKET,
};
use crate::domain::ports::{Registrar, RegistrarRef, Registration};
use crate::error::{Error, Result};
use crate::v1beta1::device_plugin_server::DevicePluginServer;
use crate::v1beta1::Device;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};

// =============================================================================
// Server Configuration
// =============================================================================

/// Where and under which name the plugin serves
#[derive(Debug, Clone)]
pub struct PluginServerConfig {
    /// Kubelet device plugin directory
    pub plugin_dir: PathBuf,
    /// Socket file name inside `plugin_dir`
    pub socket_name: String,
    /// Extended resource advertised to the kubelet
    pub resource_name: String,
    /// Tick of the socket health monitor
    pub health_interval: Duration,
    /// How long to wait for the socket to accept connections
    pub ready_timeout: Duration,
    /// How long `stop` waits for the gRPC server to drain
    pub shutdown_timeout: Duration,
}

impl Default for PluginServerConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEVICE_PLUGIN_PATH),
            socket_name: DEFAULT_SOCKET_NAME.to_string(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            health_interval: HEALTH_CHECK_INTERVAL,
            ready_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PluginServerConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.socket_name)
    }

    pub fn kubelet_socket(&self) -> PathBuf {
        self.plugin_dir.join(KUBELET_SOCKET)
    }

    pub fn registration(&self) -> Registration {
        Registration {
            version: API_VERSION.to_string(),
            endpoint: self.socket_name.clone(),
            resource_name: self.resource_name.clone(),
        }
    }
}

// =============================================================================
// Plugin Server
// =============================================================================

/// Handles of one started server instance
struct Running {
    lifecycle: Arc<Lifecycle>,
    service: DevicePluginService,
    server: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

/// Starts, registers, and stops the plugin; restartable
pub struct PluginServer {
    config: PluginServerConfig,
    engine: Arc<DeviceEngine>,
    registrar: RegistrarRef,
    devices: DeviceList,
    running: Mutex<Option<Running>>,
}

impl PluginServer {
    pub fn new(config: PluginServerConfig, engine: Arc<DeviceEngine>, registrar: RegistrarRef) -> Self {
        Self {
            config,
            engine,
            registrar,
            devices: Arc::new(RwLock::new(Vec::new())),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PluginServerConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<DeviceEngine> {
        &self.engine
    }

    /// Devices currently advertised
    pub fn devices(&self) -> Vec<String> {
        self.devices.read().clone()
    }

    /// Lifecycle of the running instance, if started
    pub fn lifecycle(&self) -> Option<Arc<Lifecycle>> {
        self.running.lock().as_ref().map(|r| r.lifecycle.clone())
    }

    /// Start serving on the plugin socket
    pub async fn start(&self) -> Result<Arc<Lifecycle>> {
        if let Some(lifecycle) = self.lifecycle() {
            if !lifecycle.is_stopped() {
                warn!("Plugin server already running, stopping previous instance");
            }
            self.stop().await?;
        }

        let engine = self.engine.clone();
        let devices = tokio::task::spawn_blocking(move || engine.discover())
            .await
            .map_err(|e| Error::Internal(format!("discovery task failed: {}", e)))?
            .map_err(|e| {
                error!("Initial device scan failed: {}", e);
                e
            })?;
        info!("Initializing plugin with {} devices: {:?}", devices.len(), devices);
        *self.devices.write() = devices;

        let socket_path = self.config.socket_path();
        remove_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|source| Error::SocketBind {
            path: socket_path.display().to_string(),
            source,
        })?;

        let lifecycle = Arc::new(Lifecycle::new(&socket_path));
        let service =
            DevicePluginService::new(self.engine.clone(), self.devices.clone(), lifecycle.clone());

        let incoming = UnixListenerStream::new(listener);
        let shutdown = lifecycle.stop_token().cancelled_owned();
        let grpc = Server::builder()
            .add_service(DevicePluginServer::new(service.clone()))
            .serve_with_incoming_shutdown(incoming, shutdown);
        let server = tokio::spawn(async move {
            if let Err(e) = grpc.await {
                error!("Serving incoming requests failed: {}", e);
            }
        });

        let monitor = SocketHealthMonitor::new(self.config.kubelet_socket(), &socket_path)
            .with_interval(self.config.health_interval);
        let monitor_lifecycle = lifecycle.clone();
        let monitor = tokio::spawn(async move {
            monitor.run(monitor_lifecycle).await;
        });

        *self.running.lock() = Some(Running {
            lifecycle: lifecycle.clone(),
            service,
            server,
            monitor,
        });

        if let Err(e) = self.wait_ready().await {
            self.stop().await?;
            return Err(e);
        }

        info!("Plugin server listening on {}", socket_path.display());
        Ok(lifecycle)
    }

    async fn wait_ready(&self) -> Result<()> {
        let socket_path = self.config.socket_path();
        let not_ready = || Error::ServerNotReady {
            path: socket_path.display().to_string(),
        };

        match tokio::time::timeout(self.config.ready_timeout, connect_unix(&socket_path)).await {
            Ok(Ok(_channel)) => Ok(()),
            Ok(Err(e)) => {
                error!("Unable to dial plugin socket: {}", e);
                Err(not_ready())
            }
            Err(_) => Err(not_ready()),
        }
    }

    /// Register the running instance with the kubelet
    pub async fn register(&self) -> Result<()> {
        let registration = self.config.registration();
        info!(
            "Registering {} with kubelet at {}",
            registration.resource_name,
            self.config.kubelet_socket().display()
        );
        self.registrar.register(registration).await
    }

    /// Start, then register; a failed registration stops the server again
    pub async fn serve(&self) -> Result<Arc<Lifecycle>> {
        let lifecycle = self.start().await.map_err(|e| {
            error!("Could not start device plugin: {}", e);
            e
        })?;

        if let Err(e) = self.register().await {
            error!("Could not register device plugin: {}", e);
            if let Err(stop_err) = self.stop().await {
                warn!("Cleanup after failed registration failed: {}", stop_err);
            }
            return Err(e);
        }

        info!("Registered device plugin with kubelet");
        Ok(lifecycle)
    }

    /// Stop the running instance; a no-op when nothing runs
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };

        let result = running.lifecycle.stop();
        running.monitor.abort();

        if tokio::time::timeout(self.config.shutdown_timeout, running.server)
            .await
            .is_err()
        {
            warn!("gRPC server did not drain within {:?}", self.config.shutdown_timeout);
        }

        result
    }

    /// Resolve once the instance stops or asks to be restarted.
    ///
    /// A pending restart is turned into a stop, so callers can always
    /// re-run `serve` afterwards.
    pub async fn stopped(lifecycle: &Lifecycle) {
        let stop = lifecycle.stop_token();
        let restart = lifecycle.restart_token();

        tokio::select! {
            _ = stop.cancelled() => {}
            _ = restart.cancelled() => {
                if let Err(e) = lifecycle.stop() {
                    warn!("Stopping plugin for restart failed: {}", e);
                }
            }
        }
    }

    /// Forward a device health update to every ListAndWatch stream
    pub fn report_health(&self, device: Device) -> usize {
        match self.running.lock().as_ref() {
            Some(running) => running.service.report_health(device),
            None => 0,
        }
    }
}
