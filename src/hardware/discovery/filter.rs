//! Device Filter Pipeline
//!
//! Turns a raw scan into the advertised device list:
//!
//! 1. discover: raw block devices from the scanner (plus the NX GZIP device
//!    when enabled)
//! 2. exclude: drop every device matching any exclude glob
//! 3. include: when include globs are configured, they replace the list;
//!    each glob is resolved on the host and only existing paths are kept

use crate::config::{DevicePluginConfig, NX_GZIP_DEVICE};
use crate::domain::ports::DeviceScanner;
use crate::error::Result;
use glob::{MatchOptions, Pattern};
use tracing::{debug, info, warn};

/// Prefix stripped from included device paths
pub const DEV_PREFIX: &str = "/dev/";

/// `*` and `?` never cross a path separator
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Check whether a device path matches any of the patterns.
///
/// Malformed patterns never match.
pub fn matches_any(device: &str, patterns: &[String]) -> bool {
    for raw in patterns {
        let pattern = match Pattern::new(raw) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("Invalid pattern '{}' ({}), skipping", raw, e);
                continue;
            }
        };
        if pattern.matches_with(device, MATCH_OPTIONS) {
            return true;
        }
    }
    false
}

/// Drop devices that match any exclude pattern
pub fn apply_exclude_filters(devices: Vec<String>, excludes: &[String]) -> Vec<String> {
    devices
        .into_iter()
        .filter(|device| {
            if matches_any(device, excludes) {
                debug!("Excluding device {}", device);
                false
            } else {
                true
            }
        })
        .collect()
}

/// Trim include patterns and drop blank entries
pub fn clean_patterns(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .filter_map(|raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                warn!("include-devices contains an empty entry, dropping it");
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// Apply include patterns.
///
/// Without include patterns every device is kept with `/dev/` stripped. With
/// include patterns the input list is discarded: each pattern is resolved by
/// the scanner and every existing match is kept, `/dev/` stripped. Matches
/// are not deduplicated across patterns.
pub fn apply_include_filters(
    scanner: &dyn DeviceScanner,
    devices: Vec<String>,
    includes: &[String],
) -> Vec<String> {
    let cleaned = clean_patterns(includes);

    if cleaned.is_empty() {
        return devices
            .iter()
            .map(|device| strip_dev_prefix(device).to_string())
            .collect();
    }

    info!("include-devices specified, overriding scan with {:?}", cleaned);
    let mut included = Vec::new();

    for pattern in &cleaned {
        let matches = match scanner.find_devices(pattern) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Invalid include pattern '{}', skipping: {}", pattern, e);
                continue;
            }
        };

        for device in matches {
            if scanner.device_exists(&device) {
                debug!("Including device {}", device);
                included.push(strip_dev_prefix(&device).to_string());
            } else {
                warn!("Device does not exist or is inaccessible: {}", device);
            }
        }
    }

    included
}

/// Exclude then include.
///
/// When no include pattern is configured the surviving paths are returned
/// as scanned, so the result is a fixed point of this function.
pub fn filter_devices(
    scanner: &dyn DeviceScanner,
    devices: Vec<String>,
    config: &DevicePluginConfig,
) -> Vec<String> {
    let filtered = apply_exclude_filters(devices, &config.exclude_devices);

    if clean_patterns(&config.include_devices).is_empty() {
        return filtered;
    }

    apply_include_filters(scanner, filtered, &config.include_devices)
}

/// Scan the host and run the full filter pipeline
pub fn scan_devices(
    scanner: &dyn DeviceScanner,
    config: &DevicePluginConfig,
) -> Result<Vec<String>> {
    let mut devices = scanner.block_devices()?;

    if config.nx_gzip {
        devices.push(NX_GZIP_DEVICE.to_string());
        debug!("nx-gzip enabled, appended {}", NX_GZIP_DEVICE);
    }

    let devices = filter_devices(scanner, devices, config);
    info!("Final filtered device list: {:?}", devices);
    Ok(devices)
}

fn strip_dev_prefix(device: &str) -> &str {
    device.strip_prefix(DEV_PREFIX).unwrap_or(device)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;

    /// In-memory scanner; every path returned by `find_results` exists
    #[derive(Default, Clone)]
    pub(crate) struct MockScanner {
        pub devices: Vec<String>,
        pub find_results: HashMap<String, Vec<String>>,
        pub fail_scan: bool,
    }

    impl MockScanner {
        pub fn with_devices(devices: &[&str]) -> Self {
            Self {
                devices: devices.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn find(mut self, pattern: &str, paths: &[&str]) -> Self {
            self.find_results.insert(
                pattern.to_string(),
                paths.iter().map(|p| p.to_string()).collect(),
            );
            self
        }
    }

    impl DeviceScanner for MockScanner {
        fn block_devices(&self) -> Result<Vec<String>> {
            if self.fail_scan {
                return Err(Error::HardwareDiscovery("mock scan failure".into()));
            }
            Ok(self.devices.clone())
        }

        fn find_devices(&self, pattern: &str) -> Result<Vec<String>> {
            self.find_results
                .get(pattern)
                .cloned()
                .ok_or_else(|| Error::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "no match".into(),
                })
        }

        fn device_exists(&self, path: &str) -> bool {
            self.find_results
                .values()
                .any(|paths| paths.iter().any(|p| p == path))
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_any() {
        let cases = [
            ("/dev/sda", vec!["/dev/sda"], true),
            ("/dev/sda1", vec!["/dev/sda*"], true),
            ("/dev/sdb", vec!["/dev/sda"], false),
            ("/dev/sda", vec!["[invalid"], false),
            ("/dev/sda", vec![], false),
            ("/dev/mapper/x", vec!["/dev/*"], false),
            ("/dev/sdb", vec!["/dev/sd[ab]"], true),
        ];

        for (device, patterns, expected) in cases {
            let patterns = strings(&patterns);
            assert_eq!(matches_any(device, &patterns), expected, "{} {:?}", device, patterns);
        }
    }

    #[test]
    fn test_apply_exclude_filters() {
        let devices = strings(&["/dev/sda", "/dev/sdb", "/dev/nvme0n1"]);
        let excludes = strings(&["/dev/sdb", "/dev/nvme0n1"]);
        assert_eq!(apply_exclude_filters(devices, &excludes), vec!["/dev/sda"]);
    }

    #[test]
    fn test_apply_include_filters_empty_strips_prefix() {
        let scanner = MockScanner::default();
        let devices = strings(&["/dev/sda", "/dev/sdb"]);
        assert_eq!(
            apply_include_filters(&scanner, devices, &[]),
            vec!["sda", "sdb"]
        );
    }

    #[test]
    fn test_apply_include_filters_valid_pattern() {
        let scanner = MockScanner::default().find("/dev/sda", &["/dev/sda"]);
        let devices = strings(&["/dev/sda", "/dev/sdb"]);
        let includes = strings(&["/dev/sda"]);
        assert_eq!(apply_include_filters(&scanner, devices, &includes), vec!["sda"]);
    }

    #[test]
    fn test_apply_include_filters_invalid_pattern() {
        let scanner = MockScanner::default();
        let devices = strings(&["/dev/sda"]);
        let includes = strings(&["["]);
        assert!(apply_include_filters(&scanner, devices, &includes).is_empty());
    }

    #[test]
    fn test_apply_include_filters_keeps_duplicates() {
        let scanner = MockScanner::default()
            .find("/dev/dm-*", &["/dev/dm-0", "/dev/dm-1"])
            .find("/dev/dm-0", &["/dev/dm-0"]);
        let includes = strings(&["/dev/dm-*", "  /dev/dm-0  ", "   "]);
        assert_eq!(
            apply_include_filters(&scanner, vec![], &includes),
            vec!["dm-0", "dm-1", "dm-0"]
        );
    }

    #[test]
    fn test_scan_devices_scenarios() {
        struct Case {
            name: &'static str,
            scanner: MockScanner,
            config: DevicePluginConfig,
            want: Vec<&'static str>,
        }

        let cases = vec![
            Case {
                name: "include match and exclude match",
                scanner: MockScanner::with_devices(&["/dev/dm-1", "/dev/dm-9", "/dev/sda"])
                    .find("/dev/dm-1", &["/dev/dm-1"]),
                config: DevicePluginConfig {
                    include_devices: strings(&["/dev/dm-1"]),
                    exclude_devices: strings(&["/dev/dm-9"]),
                    ..Default::default()
                },
                want: vec!["dm-1"],
            },
            Case {
                name: "empty include and exclude with nx-gzip",
                scanner: MockScanner::with_devices(&["/dev/sda", "/dev/dm-0"]),
                config: DevicePluginConfig {
                    nx_gzip: true,
                    ..Default::default()
                },
                want: vec!["/dev/sda", "/dev/dm-0", "/dev/crypto/nx-gzip"],
            },
            Case {
                name: "invalid include pattern",
                scanner: MockScanner::with_devices(&["/dev/sda", "/dev/sdb"]).find("abc", &[]),
                config: DevicePluginConfig {
                    nx_gzip: true,
                    include_devices: strings(&["abc", ""]),
                    exclude_devices: strings(&["", "sda"]),
                    ..Default::default()
                },
                want: vec![],
            },
            Case {
                name: "include pattern matches nothing",
                scanner: MockScanner::with_devices(&["/dev/sda", "/dev/sdb"])
                    .find("/dev/notexist", &[]),
                config: DevicePluginConfig {
                    include_devices: strings(&["/dev/notexist"]),
                    ..Default::default()
                },
                want: vec![],
            },
            Case {
                name: "exclude all",
                scanner: MockScanner::with_devices(&["/dev/sda", "/dev/sdb"]),
                config: DevicePluginConfig {
                    exclude_devices: strings(&["/dev/sda", "/dev/sdb"]),
                    ..Default::default()
                },
                want: vec![],
            },
            Case {
                name: "excluded offload device",
                scanner: MockScanner::with_devices(&["/dev/sda"]),
                config: DevicePluginConfig {
                    nx_gzip: true,
                    exclude_devices: strings(&["/dev/crypto/*"]),
                    ..Default::default()
                },
                want: vec!["/dev/sda"],
            },
        ];

        for case in cases {
            let got = scan_devices(&case.scanner, &case.config).unwrap();
            assert_eq!(got, case.want, "{}", case.name);
        }
    }

    #[test]
    fn test_scan_devices_propagates_scan_error() {
        let scanner = MockScanner {
            fail_scan: true,
            ..Default::default()
        };
        assert!(scan_devices(&scanner, &DevicePluginConfig::default()).is_err());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let scanner = MockScanner::default().find("/dev/dm-*", &["/dev/dm-0", "/dev/dm-1"]);
        let raw = strings(&["/dev/sda", "/dev/sdb1", "/dev/dm-0", "/dev/dm-1"]);

        let configs = [
            DevicePluginConfig {
                exclude_devices: strings(&["/dev/sdb*"]),
                ..Default::default()
            },
            DevicePluginConfig {
                exclude_devices: strings(&["/dev/sd*"]),
                include_devices: strings(&["/dev/dm-*"]),
                ..Default::default()
            },
            DevicePluginConfig::default(),
        ];

        for config in &configs {
            let once = filter_devices(&scanner, raw.clone(), config);
            let twice = filter_devices(&scanner, once.clone(), config);
            assert_eq!(once, twice, "{:?}", config);
        }
    }
}
