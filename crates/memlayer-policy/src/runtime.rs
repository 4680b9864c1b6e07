//! Process-wide runtime settings.
//!
//! Unlike [`MemoryConfig`](crate::MemoryConfig), these settings can change
//! while the program runs. The global instance is built on first access from
//! the environment:
//!
//! - `MEMLAYER_MAX_MEMORY`: tracked-usage ceiling in bytes (0 = unlimited)
//! - `MEMLAYER_WARNING_THRESHOLD`: usage that triggers one warning (0 = off)
//! - `MEMLAYER_LEAK_DETECTION`, `MEMLAYER_DOUBLE_FREE_DETECTION`,
//!   `MEMLAYER_BOUNDS_CHECKING`: `1`/`true`/`on`/`yes` to enable
//!
//! There is no teardown; the instance lives until process exit.

use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::MemoryError;
use crate::sync::{AtomicCounter, AtomicFlag, Counter, Flag};

/// Called after a successful allocation: `(ptr, size, context)`.
pub type AllocationHook = fn(*mut u8, u64, &str);
/// Called before a block is released: `(ptr, size, context)`.
pub type DeallocationHook = fn(*mut u8, u64, &str);
/// Called after a successful resize: `(old_ptr, new_ptr, old_size, new_size, context)`.
pub type ReallocHook = fn(*mut u8, *mut u8, u64, u64, &str);

pub const DEFAULT_SMALL_ALLOCATION_THRESHOLD: u64 = 256;
pub const DEFAULT_LARGE_ALLOCATION_THRESHOLD: u64 = 1024 * 1024;

/// Size bucket relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

/// Mutable process-wide settings.
pub struct RuntimeConfig {
    enable_hooks: AtomicFlag,
    allocation_hook: RwLock<Option<AllocationHook>>,
    deallocation_hook: RwLock<Option<DeallocationHook>>,
    realloc_hook: RwLock<Option<ReallocHook>>,

    max_memory_usage: AtomicCounter,
    warning_threshold: AtomicCounter,
    warning_latched: AtomicFlag,

    leak_detection: AtomicFlag,
    double_free_detection: AtomicFlag,
    bounds_checking: AtomicFlag,

    small_allocation_threshold: AtomicCounter,
    large_allocation_threshold: AtomicCounter,
}

/// Serializable view of a [`RuntimeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    pub hooks_enabled: bool,
    pub max_memory_usage: u64,
    pub warning_threshold: u64,
    pub leak_detection: bool,
    pub double_free_detection: bool,
    pub bounds_checking: bool,
    pub small_allocation_threshold: u64,
    pub large_allocation_threshold: u64,
}

impl RuntimeConfig {
    /// All features off, default thresholds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enable_hooks: AtomicFlag::const_new(false),
            allocation_hook: parking_lot::const_rwlock(None),
            deallocation_hook: parking_lot::const_rwlock(None),
            realloc_hook: parking_lot::const_rwlock(None),
            max_memory_usage: AtomicCounter::const_new(0),
            warning_threshold: AtomicCounter::const_new(0),
            warning_latched: AtomicFlag::const_new(false),
            leak_detection: AtomicFlag::const_new(false),
            double_free_detection: AtomicFlag::const_new(false),
            bounds_checking: AtomicFlag::const_new(false),
            small_allocation_threshold: AtomicCounter::const_new(DEFAULT_SMALL_ALLOCATION_THRESHOLD),
            large_allocation_threshold: AtomicCounter::const_new(DEFAULT_LARGE_ALLOCATION_THRESHOLD),
        }
    }

    /// Defaults overridden by `MEMLAYER_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let config = Self::new();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |key: &str| {
            lookup(key).is_some_and(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "on" | "yes"
                )
            })
        };
        if let Some(limit) = number("MEMLAYER_MAX_MEMORY") {
            config.set_max_memory_usage(limit);
        }
        if let Some(threshold) = number("MEMLAYER_WARNING_THRESHOLD") {
            config.set_warning_threshold(threshold);
        }
        config.set_leak_detection(flag("MEMLAYER_LEAK_DETECTION"));
        config.set_double_free_detection(flag("MEMLAYER_DOUBLE_FREE_DETECTION"));
        config.set_bounds_checking(flag("MEMLAYER_BOUNDS_CHECKING"));
        config
    }

    // -- hooks --------------------------------------------------------------

    #[must_use]
    pub fn hooks_enabled(&self) -> bool {
        self.enable_hooks.is_set()
    }

    pub fn set_hooks_enabled(&self, enabled: bool) {
        set_flag(&self.enable_hooks, enabled);
    }

    pub fn set_allocation_hook(&self, hook: Option<AllocationHook>) {
        *self.allocation_hook.write() = hook;
    }

    pub fn set_deallocation_hook(&self, hook: Option<DeallocationHook>) {
        *self.deallocation_hook.write() = hook;
    }

    pub fn set_realloc_hook(&self, hook: Option<ReallocHook>) {
        *self.realloc_hook.write() = hook;
    }

    /// Invoke the allocation hook if hooks are enabled and one is installed.
    pub fn notify_allocation(&self, ptr: *mut u8, size: u64, context: &str) {
        if !self.hooks_enabled() {
            return;
        }
        let hook = *self.allocation_hook.read();
        if let Some(hook) = hook {
            hook(ptr, size, context);
        }
    }

    pub fn notify_deallocation(&self, ptr: *mut u8, size: u64, context: &str) {
        if !self.hooks_enabled() {
            return;
        }
        let hook = *self.deallocation_hook.read();
        if let Some(hook) = hook {
            hook(ptr, size, context);
        }
    }

    pub fn notify_reallocation(
        &self,
        old_ptr: *mut u8,
        new_ptr: *mut u8,
        old_size: u64,
        new_size: u64,
        context: &str,
    ) {
        if !self.hooks_enabled() {
            return;
        }
        let hook = *self.realloc_hook.read();
        if let Some(hook) = hook {
            hook(old_ptr, new_ptr, old_size, new_size, context);
        }
    }

    // -- limits -------------------------------------------------------------

    #[must_use]
    pub fn max_memory_usage(&self) -> u64 {
        self.max_memory_usage.get()
    }

    /// Ceiling on tracked usage; 0 disables the check.
    pub fn set_max_memory_usage(&self, limit: u64) {
        self.max_memory_usage.set(limit);
    }

    #[must_use]
    pub fn warning_threshold(&self) -> u64 {
        self.warning_threshold.get()
    }

    /// Usage at which one warning is issued; 0 disables it.
    pub fn set_warning_threshold(&self, threshold: u64) {
        self.warning_threshold.set(threshold);
        self.warning_latched.clear();
    }

    /// Fails when `usage + requested` would exceed the configured ceiling.
    pub fn check_limit(&self, usage: u64, requested: u64) -> Result<(), MemoryError> {
        let limit = self.max_memory_usage();
        if limit != 0 && usage.saturating_add(requested) > limit {
            return Err(MemoryError::LimitExceeded {
                requested,
                usage,
                limit,
            });
        }
        Ok(())
    }

    /// Returns true exactly once each time usage climbs to the warning threshold.
    /// Dropping back below the threshold re-arms the warning.
    pub fn crossed_warning_threshold(&self, usage: u64) -> bool {
        let threshold = self.warning_threshold();
        if threshold == 0 {
            return false;
        }
        if usage < threshold {
            self.warning_latched.clear();
            return false;
        }
        !self.warning_latched.test_and_set()
    }

    // -- debug toggles ------------------------------------------------------

    #[must_use]
    pub fn leak_detection(&self) -> bool {
        self.leak_detection.is_set()
    }

    pub fn set_leak_detection(&self, enabled: bool) {
        set_flag(&self.leak_detection, enabled);
    }

    #[must_use]
    pub fn double_free_detection(&self) -> bool {
        self.double_free_detection.is_set()
    }

    pub fn set_double_free_detection(&self, enabled: bool) {
        set_flag(&self.double_free_detection, enabled);
    }

    #[must_use]
    pub fn bounds_checking(&self) -> bool {
        self.bounds_checking.is_set()
    }

    pub fn set_bounds_checking(&self, enabled: bool) {
        set_flag(&self.bounds_checking, enabled);
    }

    // -- size classes -------------------------------------------------------

    pub fn set_size_thresholds(&self, small: u64, large: u64) {
        self.small_allocation_threshold.set(small);
        self.large_allocation_threshold.set(large.max(small));
    }

    /// Sizes up to the small threshold are small; sizes from the large threshold on are large.
    #[must_use]
    pub fn classify(&self, size: u64) -> SizeClass {
        if size <= self.small_allocation_threshold.get() {
            SizeClass::Small
        } else if size < self.large_allocation_threshold.get() {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            hooks_enabled: self.hooks_enabled(),
            max_memory_usage: self.max_memory_usage(),
            warning_threshold: self.warning_threshold(),
            leak_detection: self.leak_detection(),
            double_free_detection: self.double_free_detection(),
            bounds_checking: self.bounds_checking(),
            small_allocation_threshold: self.small_allocation_threshold.get(),
            large_allocation_threshold: self.large_allocation_threshold.get(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.snapshot(), f)
    }
}

fn set_flag(flag: &AtomicFlag, enabled: bool) {
    if enabled {
        flag.set();
    } else {
        flag.clear();
    }
}

static GLOBAL_RUNTIME: OnceLock<RuntimeConfig> = OnceLock::new();

/// The process-wide runtime configuration (initialized from the environment on first call).
#[must_use]
pub fn runtime_config() -> &'static RuntimeConfig {
    GLOBAL_RUNTIME.get_or_init(RuntimeConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn defaults() {
        let rc = RuntimeConfig::new();
        let snap = rc.snapshot();
        assert!(!snap.hooks_enabled);
        assert_eq!(snap.max_memory_usage, 0);
        assert_eq!(snap.small_allocation_threshold, 256);
        assert_eq!(snap.large_allocation_threshold, 1024 * 1024);
    }

    #[test]
    fn env_lookup_parses_numbers_and_flags() {
        let rc = RuntimeConfig::from_lookup(|key| match key {
            "MEMLAYER_MAX_MEMORY" => Some("4096".into()),
            "MEMLAYER_WARNING_THRESHOLD" => Some(" 1024 ".into()),
            "MEMLAYER_LEAK_DETECTION" => Some("ON".into()),
            "MEMLAYER_DOUBLE_FREE_DETECTION" => Some("0".into()),
            "MEMLAYER_BOUNDS_CHECKING" => Some("bogus".into()),
            _ => None,
        });
        assert_eq!(rc.max_memory_usage(), 4096);
        assert_eq!(rc.warning_threshold(), 1024);
        assert!(rc.leak_detection());
        assert!(!rc.double_free_detection());
        assert!(!rc.bounds_checking());
    }

    #[test]
    fn limit_check() {
        let rc = RuntimeConfig::new();
        assert!(rc.check_limit(u64::MAX, 1).is_ok());
        rc.set_max_memory_usage(100);
        assert!(rc.check_limit(60, 40).is_ok());
        assert_eq!(
            rc.check_limit(60, 41),
            Err(MemoryError::LimitExceeded {
                requested: 41,
                usage: 60,
                limit: 100
            })
        );
    }

    #[test]
    fn warning_threshold_latches_and_rearms() {
        let rc = RuntimeConfig::new();
        assert!(!rc.crossed_warning_threshold(10_000));
        rc.set_warning_threshold(100);
        assert!(!rc.crossed_warning_threshold(99));
        assert!(rc.crossed_warning_threshold(100));
        assert!(!rc.crossed_warning_threshold(150));
        assert!(!rc.crossed_warning_threshold(20));
        assert!(rc.crossed_warning_threshold(120));
    }

    static HOOK_BYTES: AtomicU64 = AtomicU64::new(0);

    fn count_hook(_ptr: *mut u8, size: u64, _ctx: &str) {
        HOOK_BYTES.fetch_add(size, Ordering::Relaxed);
    }

    #[test]
    fn hooks_fire_only_when_enabled() {
        let rc = RuntimeConfig::new();
        rc.set_allocation_hook(Some(count_hook));
        rc.notify_allocation(std::ptr::null_mut(), 10, "alloc");
        assert_eq!(HOOK_BYTES.load(Ordering::Relaxed), 0);
        rc.set_hooks_enabled(true);
        rc.notify_allocation(std::ptr::null_mut(), 10, "alloc");
        assert_eq!(HOOK_BYTES.load(Ordering::Relaxed), 10);
        rc.set_allocation_hook(None);
        rc.notify_allocation(std::ptr::null_mut(), 10, "alloc");
        assert_eq!(HOOK_BYTES.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn classify_sizes() {
        let rc = RuntimeConfig::new();
        assert_eq!(rc.classify(16), SizeClass::Small);
        assert_eq!(rc.classify(256), SizeClass::Small);
        assert_eq!(rc.classify(4096), SizeClass::Medium);
        assert_eq!(rc.classify(2 * 1024 * 1024), SizeClass::Large);
        rc.set_size_thresholds(8, 4);
        assert_eq!(rc.classify(9), SizeClass::Large);
    }
}
