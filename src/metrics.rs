//! Plugin Metrics
//!
//! Prometheus counters and gauges for discovery and allocation. Metrics are
//! registered into an explicit registry so tests can build isolated
//! instances; the binary serves the same registry on `/metrics`.

use crate::error::Result;
use prometheus::{IntCounter, IntGauge, Registry};

/// Discovery and allocation metrics
#[derive(Clone)]
pub struct PluginMetrics {
    registry: Registry,
    scans_total: IntCounter,
    cache_hits_total: IntCounter,
    scan_fallbacks_total: IntCounter,
    devices_discovered: IntGauge,
    allocations_total: IntCounter,
    allocation_failures_total: IntCounter,
}

impl PluginMetrics {
    /// Create metrics registered into a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered into `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let scans_total = IntCounter::new(
            "block_device_plugin_scans_total",
            "Fresh device scans performed",
        )?;
        let cache_hits_total = IntCounter::new(
            "block_device_plugin_cache_hits_total",
            "Discovery calls answered from the cache",
        )?;
        let scan_fallbacks_total = IntCounter::new(
            "block_device_plugin_scan_fallbacks_total",
            "Failed scans answered with the stale cache",
        )?;
        let devices_discovered = IntGauge::new(
            "block_device_plugin_devices_discovered",
            "Devices returned by the most recent scan",
        )?;
        let allocations_total = IntCounter::new(
            "block_device_plugin_allocations_total",
            "Container device grants",
        )?;
        let allocation_failures_total = IntCounter::new(
            "block_device_plugin_allocation_failures_total",
            "Allocate calls rejected for lack of capacity",
        )?;

        registry.register(Box::new(scans_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(scan_fallbacks_total.clone()))?;
        registry.register(Box::new(devices_discovered.clone()))?;
        registry.register(Box::new(allocations_total.clone()))?;
        registry.register(Box::new(allocation_failures_total.clone()))?;

        Ok(Self {
            registry,
            scans_total,
            cache_hits_total,
            scan_fallbacks_total,
            devices_discovered,
            allocations_total,
            allocation_failures_total,
        })
    }

    /// Registry holding every metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn record_scan(&self, device_count: usize) {
        self.scans_total.inc();
        self.devices_discovered.set(device_count as i64);
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    #[inline]
    pub fn record_scan_fallback(&self) {
        self.scan_fallbacks_total.inc();
    }

    #[inline]
    pub fn record_allocations(&self, grants: usize) {
        self.allocations_total.inc_by(grants as u64);
    }

    #[inline]
    pub fn record_allocation_failure(&self) {
        self.allocation_failures_total.inc();
    }

    pub fn scans(&self) -> u64 {
        self.scans_total.get()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits_total.get()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations_total.get()
    }

    pub fn allocation_failures(&self) -> u64 {
        self.allocation_failures_total.get()
    }
}
