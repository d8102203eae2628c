//! Device Allocator
//!
//! Arbitrates kubelet Allocate calls against the usage ledger. Each
//! container in a request receives exactly one device; the device IDs the
//! kubelet asked for are accepted but do not influence selection.

use super::ledger::UsageLedger;
use super::permissions::validated_permission;
use crate::config::DevicePluginConfig;
use crate::error::Result;
use crate::metrics::PluginMetrics;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

// =============================================================================
// Allocation Types
// =============================================================================

/// One container's share of an Allocate call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Device IDs chosen by the kubelet
    pub device_ids: Vec<String>,
}

/// A device node made visible inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGrant {
    pub host_path: String,
    pub container_path: String,
    pub permissions: String,
}

/// Devices granted to one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerGrant {
    pub devices: Vec<DeviceGrant>,
}

/// Host path of an advertised device; bare names live under /dev
pub fn resolve_host_path(device: &str) -> String {
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("/dev/{}", device)
    }
}

// =============================================================================
// Device Allocator
// =============================================================================

/// Grants devices to containers under the per-device upper limit
pub struct DeviceAllocator {
    ledger: Arc<UsageLedger>,
    metrics: Option<Arc<PluginMetrics>>,
}

impl DeviceAllocator {
    /// Create an allocator over a shared ledger
    pub fn new(ledger: Arc<UsageLedger>) -> Self {
        Self {
            ledger,
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<PluginMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The ledger backing this allocator
    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Grant one device to every container request.
    ///
    /// Fails as a whole when any container cannot be satisfied; in that case
    /// the ledger is left untouched.
    pub fn allocate(
        &self,
        requests: &[ContainerRequest],
        available: &[String],
        config: &DevicePluginConfig,
    ) -> Result<Vec<ContainerGrant>> {
        let upper_limit = config.upper_limit_per_device();
        let permissions = validated_permission(Some(config));

        // One ledger key per host device, whatever form discovery used
        let host_paths: Vec<String> = available
            .iter()
            .map(|device| resolve_host_path(device))
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        let devices = match self.ledger.reserve(requests.len(), &host_paths, upper_limit) {
            Ok(devices) => devices,
            Err(e) => {
                warn!(
                    "Allocation of {} containers over {} devices failed: {}",
                    requests.len(),
                    available.len(),
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_allocation_failure();
                }
                return Err(e);
            }
        };

        let grants: Vec<ContainerGrant> = devices
            .iter()
            .map(|path| ContainerGrant {
                devices: vec![DeviceGrant {
                    host_path: path.clone(),
                    container_path: path.clone(),
                    permissions: permissions.clone(),
                }],
            })
            .collect();

        info!(
            "Allocated {:?} to {} containers (upper limit {})",
            devices,
            grants.len(),
            upper_limit
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_allocations(grants.len());
        }

        Ok(grants)
    }
}
