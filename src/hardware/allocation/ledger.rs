//! Device Usage Ledger
//!
//! Counts how many containers currently hold each device, keyed by host
//! path. The count for a device never exceeds the configured upper limit: a
//! whole allocation batch is decided under one lock, and the increments of a
//! batch are committed only when every container in it was satisfied.
//!
//! The kubelet never tells a device plugin when a container goes away, so
//! counts only grow. A device missing from one scan keeps its count.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

/// Per-device usage counts
#[derive(Debug, Default)]
pub struct UsageLedger {
    usage: Mutex<IndexMap<String, u32>>,
}

impl UsageLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for a device
    pub fn usage(&self, device: &str) -> u32 {
        self.usage.lock().get(device).copied().unwrap_or(0)
    }

    /// Copy of every count, in first-use order
    pub fn snapshot(&self) -> Vec<(String, u32)> {
        self.usage
            .lock()
            .iter()
            .map(|(device, count)| (device.clone(), *count))
            .collect()
    }

    /// Set the count for a device, e.g. when restoring state in tests
    pub fn set_usage(&self, device: impl Into<String>, count: u32) {
        self.usage.lock().insert(device.into(), count);
    }

    /// Reserve one unit on a device for each of `containers` requests.
    ///
    /// Devices are tried in `available` order; each container takes the
    /// first device still under `upper_limit`. Either every container gets
    /// a device and all increments are committed, or nothing changes.
    pub fn reserve(
        &self,
        containers: usize,
        available: &[String],
        upper_limit: u32,
    ) -> Result<Vec<String>> {
        let mut usage = self.usage.lock();

        // Staged counts; committed only on success
        let mut staged: IndexMap<&str, u32> = IndexMap::new();
        let mut granted = Vec::with_capacity(containers);

        for container_index in 0..containers {
            let candidate = available.iter().find(|device| {
                let current = staged
                    .get(device.as_str())
                    .copied()
                    .unwrap_or_else(|| usage.get(device.as_str()).copied().unwrap_or(0));
                current < upper_limit
            });

            let Some(device) = candidate else {
                if available.is_empty() {
                    return Err(Error::InsufficientDevices {
                        requested: containers,
                        available: 0,
                    });
                }
                return Err(Error::NoCapacity {
                    container_index,
                    upper_limit,
                });
            };

            let current = staged
                .get(device.as_str())
                .copied()
                .unwrap_or_else(|| usage.get(device.as_str()).copied().unwrap_or(0));
            staged.insert(device.as_str(), current + 1);

            debug!(
                "Container {} -> {} ({}/{})",
                container_index,
                device,
                current + 1,
                upper_limit
            );
            granted.push(device.clone());
        }

        for (device, count) in staged {
            usage.insert(device.to_string(), count);
        }

        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn devices(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reserve_first_device_under_limit() {
        let ledger = UsageLedger::new();
        let available = devices(&["/dev/sda", "/dev/sdb"]);

        assert_eq!(ledger.reserve(1, &available, 2).unwrap(), vec!["/dev/sda"]);
        assert_eq!(ledger.reserve(1, &available, 2).unwrap(), vec!["/dev/sda"]);
        assert_eq!(ledger.reserve(1, &available, 2).unwrap(), vec!["/dev/sdb"]);
        assert_eq!(ledger.usage("/dev/sda"), 2);
        assert_eq!(ledger.usage("/dev/sdb"), 1);
    }

    #[test]
    fn test_reserve_batch_sees_its_own_increments() {
        let ledger = UsageLedger::new();
        let available = devices(&["/dev/sda", "/dev/sdb"]);

        let granted = ledger.reserve(2, &available, 1).unwrap();
        assert_eq!(granted, vec!["/dev/sda", "/dev/sdb"]);
    }

    #[test]
    fn test_failed_batch_commits_nothing() {
        let ledger = UsageLedger::new();
        let available = devices(&["/dev/sda", "/dev/sdb"]);

        let err = ledger.reserve(3, &available, 1).unwrap_err();
        assert_matches!(err, Error::NoCapacity { container_index: 2, upper_limit: 1 });
        assert_eq!(ledger.usage("/dev/sda"), 0);
        assert_eq!(ledger.usage("/dev/sdb"), 0);
    }

    #[test]
    fn test_no_devices_is_insufficient() {
        let ledger = UsageLedger::new();
        assert_matches!(
            ledger.reserve(1, &[], 1),
            Err(Error::InsufficientDevices { requested: 1, available: 0 })
        );
    }

    #[test]
    fn test_counts_survive_a_shorter_available_list() {
        let ledger = UsageLedger::new();
        ledger.reserve(1, &devices(&["/dev/sda", "/dev/sdb"]), 1).unwrap();

        // sda missing from one scan still holds its container
        ledger.reserve(1, &devices(&["/dev/sdb"]), 1).unwrap();
        assert_matches!(
            ledger.reserve(1, &devices(&["/dev/sda", "/dev/sdb"]), 1),
            Err(Error::NoCapacity { .. })
        );
        assert_eq!(
            ledger.snapshot(),
            vec![("/dev/sda".to_string(), 1), ("/dev/sdb".to_string(), 1)]
        );
    }

    #[test]
    fn test_concurrent_reservations_respect_limit() {
        let ledger = Arc::new(UsageLedger::new());
        let available = Arc::new(devices(&["/dev/sda", "/dev/sdb", "/dev/sdc"]));
        let upper_limit = 2;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = ledger.clone();
                let available = available.clone();
                std::thread::spawn(move || {
                    ledger
                        .reserve(1 + i % 2, &available, upper_limit)
                        .map(|granted| granted.len() as u32)
                        .unwrap_or(0)
                })
            })
            .collect();

        let granted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let snapshot = ledger.snapshot();
        assert!(snapshot.iter().all(|(_, count)| *count <= upper_limit));
        let total: u32 = snapshot.iter().map(|(_, count)| count).sum();
        assert_eq!(total, granted);
        assert!(total <= 6);
        assert!(total >= 5);
    }
}
