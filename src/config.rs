//! Device Plugin Configuration
//!
//! The configuration snapshot is a JSON document mounted from a ConfigMap.
//! It is re-read before every discovery and allocation decision, so edits
//! to the ConfigMap take effect without restarting the daemon.

use crate::domain::ports::ConfigSource;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default location of the mounted configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/power-device-plugin/config.json";

/// Cache window used when `scan-interval` is missing or malformed
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Synthetic device injected when the NX GZIP accelerator is enabled
pub const NX_GZIP_DEVICE: &str = "/dev/crypto/nx-gzip";

// =============================================================================
// Discovery Strategy
// =============================================================================

/// Policy deciding whether discovery rescans on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStrategy {
    /// Rescan on every call, never cache
    #[default]
    Default,
    /// Cache the last scan for `scan-interval`, fall back to it on failure
    #[serde(rename = "time")]
    TimeWindowed,
}

impl DiscoveryStrategy {
    /// Parse the strategy string; anything unrecognised is `Default`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "time" => DiscoveryStrategy::TimeWindowed,
            _ => DiscoveryStrategy::Default,
        }
    }
}

impl std::fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryStrategy::Default => write!(f, "default"),
            DiscoveryStrategy::TimeWindowed => write!(f, "time"),
        }
    }
}

fn deserialize_strategy<'de, D>(deserializer: D) -> std::result::Result<DiscoveryStrategy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(DiscoveryStrategy::parse).unwrap_or_default())
}

// =============================================================================
// Configuration Snapshot
// =============================================================================

/// Configuration parsed from the device plugin ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePluginConfig {
    /// Inject the NX GZIP accelerator device
    #[serde(rename = "nx-gzip")]
    pub nx_gzip: bool,
    /// Cgroup permissions: r, w, m, rw, rm, wm, rwm (case-insensitive)
    pub permissions: String,
    /// Include globs, e.g. "/dev/dm-*"; when set they replace the scan result
    #[serde(rename = "include-devices")]
    pub include_devices: Vec<String>,
    /// Exclude globs applied to the raw scan result
    #[serde(rename = "exclude-devices")]
    pub exclude_devices: Vec<String>,
    /// "default" or "time"
    #[serde(rename = "discovery-strategy", deserialize_with = "deserialize_strategy")]
    pub discovery_strategy: DiscoveryStrategy,
    /// Cache window for the time strategy, e.g. "60m"
    #[serde(rename = "scan-interval")]
    pub scan_interval: String,
    /// Maximum concurrent containers per device; zero or negative means 1
    #[serde(rename = "upper-limit")]
    pub upper_limit: i64,
}

impl DevicePluginConfig {
    /// Parse a configuration document
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Effective per-device concurrency limit
    pub fn upper_limit_per_device(&self) -> u32 {
        if self.upper_limit <= 0 {
            1
        } else {
            u32::try_from(self.upper_limit).unwrap_or(u32::MAX)
        }
    }

    /// Parse `scan-interval` as a Go-style duration ("90s", "60m", "1h30m")
    pub fn parse_scan_interval(&self) -> Result<Duration> {
        let raw = self.scan_interval.trim();
        if raw.is_empty() {
            return Err(Error::DurationParse("scan-interval is empty".into()));
        }
        humantime::parse_duration(raw)
            .map_err(|e| Error::DurationParse(format!("'{}': {}", raw, e)))
    }

    /// Effective cache window; malformed values fall back to 60 minutes
    pub fn scan_interval(&self) -> Duration {
        match self.parse_scan_interval() {
            Ok(interval) => interval,
            Err(e) => {
                if self.scan_interval.trim().is_empty() {
                    debug!("No scan-interval configured, using {:?}", DEFAULT_SCAN_INTERVAL);
                } else {
                    warn!("Invalid scan-interval ({}), using {:?}", e, DEFAULT_SCAN_INTERVAL);
                }
                DEFAULT_SCAN_INTERVAL
            }
        }
    }
}

// =============================================================================
// Config Sources
// =============================================================================

/// Reads the configuration file from disk on every call
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigSource {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<DevicePluginConfig> {
        debug!("Reading config file from {}", self.path.display());

        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config file not found at {}, using default configuration",
                    self.path.display()
                );
                return Ok(DevicePluginConfig::default());
            }
            Err(e) => {
                warn!("Unable to stat config file {}: {}", self.path.display(), e);
                return Err(e.into());
            }
        };

        if metadata.is_dir() {
            warn!(
                "Config path {} is a directory, using default configuration",
                self.path.display()
            );
            return Ok(DevicePluginConfig::default());
        }

        let data = fs::read(&self.path)?;
        let config = DevicePluginConfig::from_json(&data)?;
        debug!("Config loaded: {:?}", config);
        Ok(config)
    }
}

/// Fixed configuration snapshot
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: DevicePluginConfig,
}

impl StaticConfigSource {
    pub fn new(config: DevicePluginConfig) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<DevicePluginConfig> {
        Ok(self.config.clone())
    }
}

/// Load the configuration, downgrading any failure to the default snapshot
pub fn load_or_default(source: &dyn ConfigSource) -> DevicePluginConfig {
    match source.load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, proceeding with defaults: {}", e);
            DevicePluginConfig::default()
        }
    }
}

/// Log the settings that shape discovery and allocation
pub fn log_summary(config: &DevicePluginConfig) {
    info!(
        nx_gzip = config.nx_gzip,
        strategy = %config.discovery_strategy,
        upper_limit = config.upper_limit_per_device(),
        includes = config.include_devices.len(),
        excludes = config.exclude_devices.len(),
        "Device plugin configuration"
    );
}
