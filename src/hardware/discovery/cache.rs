//! Discovery Cache
//!
//! Chooses between a fresh scan and the cached device list according to the
//! configured discovery strategy. Under the time strategy the whole
//! read-decide-write sequence runs under one lock, so concurrent callers
//! never scan twice for the same window and never observe a device list
//! paired with the wrong scan time.

use super::filter::scan_devices;
use crate::config::{DevicePluginConfig, DiscoveryStrategy};
use crate::domain::ports::DeviceScanner;
use crate::error::Result;
use crate::metrics::PluginMetrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cached result of the last successful scan
#[derive(Debug, Clone, Default)]
struct CacheState {
    devices: Vec<String>,
    /// `None` until the first successful scan
    last_scan: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub devices: Vec<String>,
    pub last_scan: Option<DateTime<Utc>>,
}

/// Device discovery with an optional time-windowed cache
pub struct DiscoveryCache {
    state: Mutex<CacheState>,
    metrics: Option<Arc<PluginMetrics>>,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<PluginMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the cached list and its scan time together
    pub fn seed(&self, devices: Vec<String>, last_scan: Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        state.devices = devices;
        state.last_scan = last_scan;
    }

    /// Copy the cached list and scan time
    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.lock();
        CacheSnapshot {
            devices: state.devices.clone(),
            last_scan: state.last_scan,
        }
    }

    /// Discover devices according to the configured strategy
    pub fn discover(
        &self,
        config: &DevicePluginConfig,
        scanner: &dyn DeviceScanner,
    ) -> Result<Vec<String>> {
        self.discover_at(config, scanner, Utc::now())
    }

    /// Discover devices as of `now`
    pub fn discover_at(
        &self,
        config: &DevicePluginConfig,
        scanner: &dyn DeviceScanner,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        match config.discovery_strategy {
            DiscoveryStrategy::Default => {
                let devices = scan_devices(scanner, config)?;
                self.record_scan(devices.len());
                Ok(devices)
            }
            DiscoveryStrategy::TimeWindowed => self.discover_windowed(config, scanner, now),
        }
    }

    fn discover_windowed(
        &self,
        config: &DevicePluginConfig,
        scanner: &dyn DeviceScanner,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let interval = config.scan_interval();
        let mut state = self.state.lock();

        let within_window = match state.last_scan {
            Some(last_scan) => now
                .signed_duration_since(last_scan)
                .to_std()
                .map(|elapsed| elapsed < interval)
                // A scan time in the future counts as fresh
                .unwrap_or(true),
            None => false,
        };

        if !state.devices.is_empty() && within_window {
            debug!(
                "Using cached device list ({} devices, window {:?})",
                state.devices.len(),
                interval
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_hit();
            }
            return Ok(state.devices.clone());
        }

        match scan_devices(scanner, config) {
            Ok(devices) => {
                info!("Refreshed device cache with {} devices", devices.len());
                state.devices = devices.clone();
                state.last_scan = Some(now);
                self.record_scan(devices.len());
                Ok(devices)
            }
            Err(e) if !state.devices.is_empty() => {
                warn!(
                    "Device scan failed, falling back to {} cached devices: {}",
                    state.devices.len(),
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_scan_fallback();
                }
                Ok(state.devices.clone())
            }
            Err(e) => Err(e),
        }
    }

    fn record_scan(&self, device_count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_scan(device_count);
        }
    }
}
