//! Version constants and build information.

use serde::Serialize;

use memlayer_policy::{ConfigDescriptor, DEBUG_BUILD};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;
pub const VERSION_PATCH: u32 = 0;

/// True when this build is at least `major.minor.patch`.
#[must_use]
pub const fn version_check(major: u32, minor: u32, patch: u32) -> bool {
    if VERSION_MAJOR != major {
        return VERSION_MAJOR > major;
    }
    if VERSION_MINOR != minor {
        return VERSION_MINOR > minor;
    }
    VERSION_PATCH >= patch
}

/// Build and platform summary.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub version: &'static str,
    pub os: &'static str,
    pub arch: &'static str,
    pub pointer_width: u32,
    pub debug_build: bool,
    pub default_config: ConfigDescriptor,
}

#[must_use]
pub fn module_info() -> ModuleInfo {
    ModuleInfo {
        version: VERSION,
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        pointer_width: usize::BITS,
        debug_build: DEBUG_BUILD,
        default_config: ConfigDescriptor::DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_constants_match_package() {
        assert_eq!(
            VERSION,
            format!("{VERSION_MAJOR}.{VERSION_MINOR}.{VERSION_PATCH}")
        );
    }

    #[test]
    fn version_check_orders_components() {
        assert!(version_check(1, 0, 0));
        assert!(version_check(0, 9, 9));
        assert!(!version_check(1, 0, 1));
        assert!(!version_check(1, 1, 0));
        assert!(!version_check(2, 0, 0));
    }

    #[test]
    fn module_info_serializes() {
        let value = serde_json::to_value(module_info()).expect("module info should serialize");
        assert_eq!(value["version"], VERSION);
        assert_eq!(value["debug_build"], DEBUG_BUILD);
        assert_eq!(value["default_config"]["name"], "default");
    }
}
