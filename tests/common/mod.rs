//! Shared fixtures for the plugin integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use block_device_plugin::v1beta1::device_plugin_client::DevicePluginClient;
use block_device_plugin::{
    plugin::connect_unix, DeviceEngine, DevicePluginConfig, DeviceScanner, Error, PluginMetrics,
    PluginServer, PluginServerConfig, Registrar, Registration, Result, StaticConfigSource,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

/// Scanner returning a fixed device list
#[derive(Default)]
pub struct FixedScanner {
    pub devices: Mutex<Vec<String>>,
    pub fail: Mutex<bool>,
}

impl FixedScanner {
    pub fn new(devices: &[&str]) -> Self {
        Self {
            devices: Mutex::new(devices.iter().map(|d| d.to_string()).collect()),
            fail: Mutex::new(false),
        }
    }
}

impl DeviceScanner for FixedScanner {
    fn block_devices(&self) -> Result<Vec<String>> {
        if *self.fail.lock() {
            return Err(Error::HardwareDiscovery("scan disabled".into()));
        }
        Ok(self.devices.lock().clone())
    }

    fn find_devices(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .filter(|d| d.as_str() == pattern)
            .cloned()
            .collect())
    }

    fn device_exists(&self, path: &str) -> bool {
        self.devices.lock().iter().any(|d| d == path)
    }
}

/// Registrar that records registrations instead of dialling a kubelet
#[derive(Default)]
pub struct RecordingRegistrar {
    pub registrations: Mutex<Vec<Registration>>,
    pub reject: bool,
}

#[async_trait]
impl Registrar for RecordingRegistrar {
    async fn register(&self, registration: Registration) -> Result<()> {
        if self.reject {
            return Err(Error::Registration("rejected by test kubelet".into()));
        }
        self.registrations.lock().push(registration);
        Ok(())
    }
}

/// A plugin server rooted in a temporary plugin directory
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub server: PluginServer,
    pub scanner: Arc<FixedScanner>,
    pub registrar: Arc<RecordingRegistrar>,
}

impl Fixture {
    pub fn socket_path(&self) -> PathBuf {
        self.server.config().socket_path()
    }

    pub async fn client(&self) -> DevicePluginClient<Channel> {
        DevicePluginClient::new(connect_unix(self.socket_path()).await.unwrap())
    }
}

pub struct FixtureBuilder {
    devices: Vec<&'static str>,
    config: DevicePluginConfig,
    reject_registration: bool,
    health_interval: Duration,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            devices: vec!["/dev/sda", "/dev/sdb"],
            config: DevicePluginConfig::default(),
            reject_registration: false,
            health_interval: Duration::from_secs(3600),
        }
    }
}

impl FixtureBuilder {
    pub fn devices(mut self, devices: &[&'static str]) -> Self {
        self.devices = devices.to_vec();
        self
    }

    pub fn config(mut self, config: DevicePluginConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reject_registration(mut self) -> Self {
        self.reject_registration = true;
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn build(self) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        // Stand-in for the kubelet registration socket watched by the monitor
        std::fs::write(dir.path().join("kubelet.sock"), b"").unwrap();

        let scanner = Arc::new(FixedScanner::new(&self.devices));
        let registrar = Arc::new(RecordingRegistrar {
            reject: self.reject_registration,
            ..Default::default()
        });
        let engine = Arc::new(DeviceEngine::new(
            scanner.clone(),
            Arc::new(StaticConfigSource::new(self.config)),
            Arc::new(PluginMetrics::new().unwrap()),
        ));

        let server = PluginServer::new(
            PluginServerConfig {
                plugin_dir: dir.path().to_path_buf(),
                socket_name: "test-plugin.sock".into(),
                resource_name: "example.com/block".into(),
                health_interval: self.health_interval,
                ..Default::default()
            },
            engine,
            registrar.clone(),
        );

        Fixture {
            dir,
            server,
            scanner,
            registrar,
        }
    }
}
