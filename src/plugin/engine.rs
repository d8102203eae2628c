//! Device Engine
//!
//! Owns the process-lifetime state behind the gRPC surface: the discovery
//! cache and the usage ledger. Both survive plugin restarts.

use crate::config::{load_or_default, log_summary, DevicePluginConfig};
use crate::domain::ports::{ConfigSourceRef, DeviceScannerRef};
use crate::error::Result;
use crate::hardware::{ContainerGrant, ContainerRequest, DeviceAllocator, DiscoveryCache, UsageLedger};
use crate::metrics::PluginMetrics;
use std::sync::Arc;
use tracing::debug;

/// Discovery and allocation behind one config source and scanner
pub struct DeviceEngine {
    scanner: DeviceScannerRef,
    config_source: ConfigSourceRef,
    cache: DiscoveryCache,
    allocator: DeviceAllocator,
    metrics: Arc<PluginMetrics>,
}

impl DeviceEngine {
    pub fn new(
        scanner: DeviceScannerRef,
        config_source: ConfigSourceRef,
        metrics: Arc<PluginMetrics>,
    ) -> Self {
        Self {
            scanner,
            config_source,
            cache: DiscoveryCache::new().with_metrics(metrics.clone()),
            allocator: DeviceAllocator::new(Arc::new(UsageLedger::new()))
                .with_metrics(metrics.clone()),
            metrics,
        }
    }

    /// Fresh configuration snapshot; load failures fall back to defaults
    pub fn config(&self) -> DevicePluginConfig {
        load_or_default(self.config_source.as_ref())
    }

    /// Discover devices under the current configuration
    pub fn discover(&self) -> Result<Vec<String>> {
        let config = self.config();
        log_summary(&config);
        self.cache.discover(&config, self.scanner.as_ref())
    }

    /// Grant one device to each container request
    pub fn allocate(&self, requests: &[ContainerRequest]) -> Result<Vec<ContainerGrant>> {
        let config = self.config();
        let available = self.cache.discover(&config, self.scanner.as_ref())?;
        debug!(
            "Allocating {} containers over {:?}",
            requests.len(),
            available
        );
        self.allocator.allocate(requests, &available, &config)
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        self.allocator.ledger()
    }

    pub fn metrics(&self) -> &Arc<PluginMetrics> {
        &self.metrics
    }
}
