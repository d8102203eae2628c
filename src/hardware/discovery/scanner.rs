//! Block Device Scanner
//!
//! Enumerates block devices from sysfs. Every whole disk and each of its
//! partitions is reported as a `/dev/<name>` path, partitions ahead of
//! their parent disk.

use crate::domain::ports::DeviceScanner;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for the sysfs scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Include loopback devices
    pub include_loopback: bool,
    /// Include RAM disks
    pub include_ram: bool,
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_loopback: false,
            include_ram: false,
            sysfs_path: PathBuf::from("/sys"),
        }
    }
}

// =============================================================================
// Sysfs Scanner
// =============================================================================

/// Scans the host for block devices
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    config: ScannerConfig,
}

impl SysfsScanner {
    /// Create a new scanner
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Create a scanner with default configuration
    pub fn default_scanner() -> Self {
        Self::new(ScannerConfig::default())
    }

    fn block_class_path(&self) -> PathBuf {
        self.config.sysfs_path.join("class/block")
    }

    /// List whole disks, sorted by name
    fn disks(&self) -> Result<Vec<(String, PathBuf)>> {
        let block_path = self.block_class_path();
        if !block_path.exists() {
            return Err(Error::HardwareDiscovery(format!(
                "Block device sysfs not found at {}",
                block_path.display()
            )));
        }

        let entries = fs::read_dir(&block_path).map_err(|e| {
            Error::HardwareDiscovery(format!("Failed to read {}: {}", block_path.display(), e))
        })?;

        let mut disks = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if !self.should_include_device(&name) {
                debug!("Skipping virtual device {}", name);
                continue;
            }

            // Partitions are picked up under their parent disk
            if is_partition(&entry.path()) {
                continue;
            }

            disks.push((name, entry.path()));
        }

        disks.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(disks)
    }

    /// List the partitions of a disk, sorted by name
    fn partitions(&self, disk_name: &str, disk_path: &Path) -> Vec<String> {
        let entries = match fs::read_dir(disk_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Unable to read partitions of {}: {}", disk_name, e);
                return Vec::new();
            }
        };

        let mut parts: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_partition(&entry.path()))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(disk_name))
            .collect();

        parts.sort();
        parts
    }

    /// Check if a device should be included
    fn should_include_device(&self, name: &str) -> bool {
        // Skip loopback devices
        if !self.config.include_loopback && name.starts_with("loop") {
            return false;
        }

        // Skip RAM disks
        if !self.config.include_ram && name.starts_with("ram") {
            return false;
        }

        // Skip zram
        if name.starts_with("zram") {
            return false;
        }

        true
    }
}

/// Partitions have a "partition" attribute
fn is_partition(sysfs_path: &Path) -> bool {
    sysfs_path.join("partition").exists()
}

impl DeviceScanner for SysfsScanner {
    fn block_devices(&self) -> Result<Vec<String>> {
        let mut devices = Vec::new();

        for (disk_name, disk_path) in self.disks()? {
            for part in self.partitions(&disk_name, &disk_path) {
                debug!("Found partition {} on {}", part, disk_name);
                devices.push(format!("/dev/{}", part));
            }
            devices.push(format!("/dev/{}", disk_name));
        }

        debug!("Scanned {} block devices", devices.len());
        Ok(devices)
    }

    fn find_devices(&self, pattern: &str) -> Result<Vec<String>> {
        let paths = glob::glob(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut matches = Vec::new();
        for path in paths {
            match path {
                Ok(path) => matches.push(path.to_string_lossy().to_string()),
                Err(e) => debug!("Skipping unreadable path while matching {}: {}", pattern, e),
            }
        }
        Ok(matches)
    }

    fn device_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}
