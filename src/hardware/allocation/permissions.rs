//! Device cgroup permission resolution

use crate::config::DevicePluginConfig;
use tracing::{debug, warn};

/// Permission granted when no configuration is available at all
pub const NO_CONFIG_PERMISSION: &str = "rwm";

/// Permission granted when the configured value is missing or invalid
pub const FALLBACK_PERMISSION: &str = "rw";

const VALID_PERMISSIONS: [&str; 7] = ["r", "w", "m", "rw", "rm", "wm", "rwm"];

/// Resolve the cgroup permission string granted to containers.
///
/// * r - read from the device
/// * w - write to the device
/// * m - create device files that do not yet exist
pub fn validated_permission(config: Option<&DevicePluginConfig>) -> String {
    let Some(config) = config else {
        debug!("No config provided, using device permission '{}'", NO_CONFIG_PERMISSION);
        return NO_CONFIG_PERMISSION.to_string();
    };

    let perm = config.permissions.to_lowercase();
    if VALID_PERMISSIONS.contains(&perm.as_str()) {
        return perm;
    }

    if perm.is_empty() {
        debug!("No permission set in config, using '{}'", FALLBACK_PERMISSION);
    } else {
        warn!(
            "Invalid device permission '{}' in config, using '{}'",
            perm, FALLBACK_PERMISSION
        );
    }
    FALLBACK_PERMISSION.to_string()
}
