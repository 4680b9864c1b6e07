//! Compile-time configuration of an allocation engine.
//!
//! A configuration is a zero-sized type implementing [`MemoryConfig`]. It
//! carries a [`ConfigDescriptor`] (flags and policy tags) and selects the
//! concrete tracker and thread policy as associated types. An inconsistent
//! configuration fails to compile as soon as an engine is instantiated with
//! it, through the [`MemoryConfig::CHECK`] constant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorPolicy;
use crate::sync::{NoSync, StdAtomic, ThreadPolicy, ThreadSafetyPolicy};
use crate::tracker::{AggregateTracker, DetailedTracker, DisabledTracker, MemoryTracker};

/// True when the crate is built with debug assertions.
pub const DEBUG_BUILD: bool = cfg!(debug_assertions);

/// Common cache line size.
pub const CACHE_LINE_SIZE: usize = 64;
/// Common page size.
pub const PAGE_SIZE: usize = 4096;

/// Offsets of the hidden allocation header.
///
/// ```text
/// base                                            base + DATA_OFFSET
/// | size: u64 | element_count: u64 | pad to MAX_ALIGN | user data ...
/// ```
pub mod layout {
    /// Largest fundamental alignment the system allocator guarantees.
    pub const MAX_ALIGN: usize = 2 * core::mem::size_of::<usize>();
    const FIELD: usize = core::mem::size_of::<u64>();

    const fn align_up(offset: usize, align: usize) -> usize {
        (offset + align - 1) & !(align - 1)
    }

    pub const SIZE_OFFSET: usize = 0;
    pub const ELEMENT_OFFSET: usize = align_up(SIZE_OFFSET + FIELD, core::mem::align_of::<u64>());
    pub const DATA_OFFSET: usize = align_up(ELEMENT_OFFSET + FIELD, MAX_ALIGN);

    const _: () = assert!(ELEMENT_OFFSET >= SIZE_OFFSET + FIELD);
    const _: () = assert!(DATA_OFFSET >= ELEMENT_OFFSET + FIELD);
    const _: () = assert!(DATA_OFFSET % MAX_ALIGN == 0);
}

/// Bookkeeping fidelity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingLevel {
    #[default]
    Disabled,
    /// Usage and count counters only.
    Aggregate,
    /// Counters plus a per-pointer table for leak detection.
    Detailed,
}

/// Alignment guarantee requested by the configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    None,
    /// The platform's maximum fundamental alignment.
    #[default]
    Standard,
    /// `ConfigDescriptor::custom_alignment`.
    Custom,
    /// Cache-line alignment.
    PlatformOptimal,
}

/// When the hidden size header is written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingPolicy {
    #[default]
    None,
    DebugOnly,
    Always,
    /// Caller decides per call through the `pad_align` argument.
    Configurable,
}

/// Allocation strategy tag. Every strategy delegates to the system allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    #[default]
    SystemDefault,
    Pooled,
    Custom,
    Hybrid,
}

macro_rules! loose_enum {
    ($ty:ident { $($variant:ident => $name:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            /// Parse from string (case-insensitive), falling back to the default.
            #[must_use]
            pub fn from_str_loose(s: &str) -> Self {
                match s.to_ascii_lowercase().replace('-', "_").as_str() {
                    $($name $(| $alias)* => Self::$variant,)+
                    _ => Self::default(),
                }
            }

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

loose_enum!(TrackingLevel {
    Disabled => "disabled" | "none" | "off",
    Aggregate => "aggregate" | "basic",
    Detailed => "detailed" | "full",
});

loose_enum!(AlignmentPolicy {
    None => "none",
    Standard => "standard",
    Custom => "custom",
    PlatformOptimal => "platform_optimal" | "cache_line",
});

loose_enum!(PaddingPolicy {
    None => "none" | "never",
    DebugOnly => "debug_only" | "debug",
    Always => "always",
    Configurable => "configurable" | "caller",
});

loose_enum!(AllocationStrategy {
    SystemDefault => "system_default" | "system",
    Pooled => "pooled" | "pool",
    Custom => "custom",
    Hybrid => "hybrid",
});

/// Inconsistent configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tracking is enabled but the tracking level is disabled")]
    TrackingWithoutLevel,
    #[error("a tracking level is set but tracking is disabled")]
    LevelWithoutTracking,
    #[error("alignment is enabled but the alignment policy is none")]
    AlignmentWithoutPolicy,
    #[error("an alignment policy is set but alignment is disabled")]
    PolicyWithoutAlignment,
    #[error("padding is enabled but the padding policy is none")]
    PaddingWithoutPolicy,
    #[error("a padding policy is set but padding is disabled")]
    PolicyWithoutPadding,
    #[error("custom alignment must be a power of two")]
    InvalidCustomAlignment,
    #[error("tracking requires a padding policy that always writes the size header")]
    TrackingWithoutHeader,
    #[error("tracker type does not match the configured tracking level")]
    TrackerMismatch,
    #[error("thread policy type does not match the configured thread-safety policy")]
    ThreadPolicyMismatch,
}

impl ConfigError {
    /// Same text as `Display`, available in const context.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrackingWithoutLevel => "tracking is enabled but the tracking level is disabled",
            Self::LevelWithoutTracking => "a tracking level is set but tracking is disabled",
            Self::AlignmentWithoutPolicy => "alignment is enabled but the alignment policy is none",
            Self::PolicyWithoutAlignment => "an alignment policy is set but alignment is disabled",
            Self::PaddingWithoutPolicy => "padding is enabled but the padding policy is none",
            Self::PolicyWithoutPadding => "a padding policy is set but padding is disabled",
            Self::InvalidCustomAlignment => "custom alignment must be a power of two",
            Self::TrackingWithoutHeader => {
                "tracking requires a padding policy that always writes the size header"
            }
            Self::TrackerMismatch => "tracker type does not match the configured tracking level",
            Self::ThreadPolicyMismatch => {
                "thread policy type does not match the configured thread-safety policy"
            }
        }
    }
}

/// Flags and policy tags of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigDescriptor {
    pub name: &'static str,
    pub enable_tracking: bool,
    pub enable_alignment: bool,
    pub enable_padding: bool,
    pub thread_safety: ThreadSafetyPolicy,
    pub tracking_level: TrackingLevel,
    pub alignment_policy: AlignmentPolicy,
    /// Used only with [`AlignmentPolicy::Custom`].
    pub custom_alignment: usize,
    pub padding_policy: PaddingPolicy,
    pub allocation_strategy: AllocationStrategy,
    pub error_policy: ErrorPolicy,
}

impl ConfigDescriptor {
    /// Tracking and padding in debug builds, atomic counters, standard alignment.
    pub const DEFAULT: Self = Self {
        name: "default",
        enable_tracking: DEBUG_BUILD,
        enable_alignment: true,
        enable_padding: DEBUG_BUILD,
        thread_safety: ThreadSafetyPolicy::Atomic,
        tracking_level: if DEBUG_BUILD {
            TrackingLevel::Aggregate
        } else {
            TrackingLevel::Disabled
        },
        alignment_policy: AlignmentPolicy::Standard,
        custom_alignment: layout::MAX_ALIGN,
        padding_policy: if DEBUG_BUILD {
            PaddingPolicy::DebugOnly
        } else {
            PaddingPolicy::None
        },
        allocation_strategy: AllocationStrategy::SystemDefault,
        error_policy: if DEBUG_BUILD {
            ErrorPolicy::AssertDebug
        } else {
            ErrorPolicy::LogOnly
        },
    };

    /// Everything off, no thread safety.
    pub const HIGH_PERFORMANCE: Self = Self {
        name: "high_performance",
        enable_tracking: false,
        enable_alignment: false,
        enable_padding: false,
        thread_safety: ThreadSafetyPolicy::None,
        tracking_level: TrackingLevel::Disabled,
        alignment_policy: AlignmentPolicy::None,
        custom_alignment: layout::MAX_ALIGN,
        padding_policy: PaddingPolicy::None,
        allocation_strategy: AllocationStrategy::SystemDefault,
        error_policy: ErrorPolicy::Silent,
    };

    /// Detailed tracking, always pad, every error asserts.
    pub const DEBUG: Self = Self {
        name: "debug",
        enable_tracking: true,
        enable_alignment: true,
        enable_padding: true,
        thread_safety: ThreadSafetyPolicy::Atomic,
        tracking_level: TrackingLevel::Detailed,
        alignment_policy: AlignmentPolicy::Standard,
        custom_alignment: layout::MAX_ALIGN,
        padding_policy: PaddingPolicy::Always,
        allocation_strategy: AllocationStrategy::SystemDefault,
        error_policy: ErrorPolicy::AssertAlways,
    };

    /// All bookkeeping off, pooled strategy tag, silent errors.
    pub const EMBEDDED: Self = Self {
        name: "embedded",
        enable_tracking: false,
        enable_alignment: false,
        enable_padding: false,
        thread_safety: ThreadSafetyPolicy::None,
        tracking_level: TrackingLevel::Disabled,
        alignment_policy: AlignmentPolicy::None,
        custom_alignment: layout::MAX_ALIGN,
        padding_policy: PaddingPolicy::None,
        allocation_strategy: AllocationStrategy::Pooled,
        error_policy: ErrorPolicy::Silent,
    };

    /// Aggregate tracking with atomic counters, asserting in debug builds.
    pub const THREAD_SAFE: Self = Self {
        name: "thread_safe",
        enable_tracking: true,
        enable_alignment: true,
        enable_padding: true,
        thread_safety: ThreadSafetyPolicy::Atomic,
        tracking_level: TrackingLevel::Aggregate,
        alignment_policy: AlignmentPolicy::Standard,
        custom_alignment: layout::MAX_ALIGN,
        padding_policy: PaddingPolicy::Always,
        allocation_strategy: AllocationStrategy::SystemDefault,
        error_policy: ErrorPolicy::AssertDebug,
    };

    /// All named presets.
    pub const PRESETS: [Self; 5] = [
        Self::DEFAULT,
        Self::HIGH_PERFORMANCE,
        Self::DEBUG,
        Self::EMBEDDED,
        Self::THREAD_SAFE,
    ];

    /// Look up a preset by name (case-insensitive, `-` and `_` equivalent).
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        let wanted = name.to_ascii_lowercase().replace('-', "_");
        Self::PRESETS.into_iter().find(|p| p.name == wanted)
    }

    /// Check internal consistency of flags and policies.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let tracking = !matches!(self.tracking_level, TrackingLevel::Disabled);
        let alignment = !matches!(self.alignment_policy, AlignmentPolicy::None);
        let padding = !matches!(self.padding_policy, PaddingPolicy::None);

        if self.enable_tracking && !tracking {
            return Err(ConfigError::TrackingWithoutLevel);
        }
        if !self.enable_tracking && tracking {
            return Err(ConfigError::LevelWithoutTracking);
        }
        if self.enable_alignment && !alignment {
            return Err(ConfigError::AlignmentWithoutPolicy);
        }
        if !self.enable_alignment && alignment {
            return Err(ConfigError::PolicyWithoutAlignment);
        }
        if self.enable_padding && !padding {
            return Err(ConfigError::PaddingWithoutPolicy);
        }
        if !self.enable_padding && padding {
            return Err(ConfigError::PolicyWithoutPadding);
        }
        if matches!(self.alignment_policy, AlignmentPolicy::Custom)
            && !self.custom_alignment.is_power_of_two()
        {
            return Err(ConfigError::InvalidCustomAlignment);
        }
        if tracking && !self.always_pads() {
            return Err(ConfigError::TrackingWithoutHeader);
        }
        Ok(())
    }

    /// [`validate`](Self::validate), plus agreement with the selected types.
    pub const fn validate_with(
        &self,
        tracker_level: TrackingLevel,
        threading: ThreadSafetyPolicy,
    ) -> Result<(), ConfigError> {
        if let Err(e) = self.validate() {
            return Err(e);
        }
        if tracker_level as u8 != self.tracking_level as u8 {
            return Err(ConfigError::TrackerMismatch);
        }
        if threading as u8 != self.thread_safety as u8 {
            return Err(ConfigError::ThreadPolicyMismatch);
        }
        Ok(())
    }

    /// Effective padding decision for one call.
    #[must_use]
    pub const fn pads(&self, pad_align: bool) -> bool {
        match self.padding_policy {
            PaddingPolicy::None => false,
            PaddingPolicy::DebugOnly => DEBUG_BUILD,
            PaddingPolicy::Always => true,
            PaddingPolicy::Configurable => pad_align,
        }
    }

    /// True when every call in this build writes the size header.
    #[must_use]
    pub const fn always_pads(&self) -> bool {
        match self.padding_policy {
            PaddingPolicy::Always => true,
            PaddingPolicy::DebugOnly => DEBUG_BUILD,
            PaddingPolicy::None | PaddingPolicy::Configurable => false,
        }
    }

    /// Bytes reserved in front of the user pointer.
    #[must_use]
    pub const fn header_size(&self, pad_align: bool) -> usize {
        if self.pads(pad_align) {
            layout::DATA_OFFSET
        } else {
            0
        }
    }

    /// Alignment implied by the alignment policy.
    #[must_use]
    pub const fn preferred_alignment(&self) -> usize {
        match self.alignment_policy {
            AlignmentPolicy::None => 1,
            AlignmentPolicy::Standard => layout::MAX_ALIGN,
            AlignmentPolicy::Custom => self.custom_alignment,
            AlignmentPolicy::PlatformOptimal => CACHE_LINE_SIZE,
        }
    }
}

impl Default for ConfigDescriptor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Builder for a custom descriptor. All setters are `const` so the result can
/// seed a `MemoryConfig::DESCRIPTOR`.
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder {
    descriptor: ConfigDescriptor,
}

impl ConfigBuilder {
    /// Start from the default preset.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self::from_preset(name, ConfigDescriptor::DEFAULT)
    }

    /// Start from an existing descriptor.
    #[must_use]
    pub const fn from_preset(name: &'static str, base: ConfigDescriptor) -> Self {
        let mut descriptor = base;
        descriptor.name = name;
        Self { descriptor }
    }

    /// Set tracking level; also toggles the tracking flag.
    #[must_use]
    pub const fn tracking(mut self, level: TrackingLevel) -> Self {
        self.descriptor.tracking_level = level;
        self.descriptor.enable_tracking = !matches!(level, TrackingLevel::Disabled);
        self
    }

    /// Set padding policy; also toggles the padding flag.
    #[must_use]
    pub const fn padding(mut self, policy: PaddingPolicy) -> Self {
        self.descriptor.padding_policy = policy;
        self.descriptor.enable_padding = !matches!(policy, PaddingPolicy::None);
        self
    }

    /// Set alignment policy; also toggles the alignment flag.
    #[must_use]
    pub const fn alignment(mut self, policy: AlignmentPolicy) -> Self {
        self.descriptor.alignment_policy = policy;
        self.descriptor.enable_alignment = !matches!(policy, AlignmentPolicy::None);
        self
    }

    #[must_use]
    pub const fn custom_alignment(mut self, alignment: usize) -> Self {
        self.descriptor.custom_alignment = alignment;
        self
    }

    #[must_use]
    pub const fn thread_safety(mut self, policy: ThreadSafetyPolicy) -> Self {
        self.descriptor.thread_safety = policy;
        self
    }

    #[must_use]
    pub const fn strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.descriptor.allocation_strategy = strategy;
        self
    }

    #[must_use]
    pub const fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.descriptor.error_policy = policy;
        self
    }

    /// Raw flag override, for building deliberately inconsistent descriptors.
    #[must_use]
    pub const fn flags(mut self, tracking: bool, alignment: bool, padding: bool) -> Self {
        self.descriptor.enable_tracking = tracking;
        self.descriptor.enable_alignment = alignment;
        self.descriptor.enable_padding = padding;
        self
    }

    /// Descriptor without validation. Validation then happens through
    /// [`MemoryConfig::CHECK`] when an engine is instantiated.
    #[must_use]
    pub const fn descriptor(self) -> ConfigDescriptor {
        self.descriptor
    }

    /// Validated descriptor.
    pub const fn build(self) -> Result<ConfigDescriptor, ConfigError> {
        match self.descriptor.validate() {
            Ok(()) => Ok(self.descriptor),
            Err(e) => Err(e),
        }
    }
}

/// A complete engine configuration.
pub trait MemoryConfig: 'static {
    const DESCRIPTOR: ConfigDescriptor;
    type Threading: ThreadPolicy;
    type Tracker: MemoryTracker;

    /// Evaluating this constant fails compilation for inconsistent configurations.
    const CHECK: () = {
        if let Err(e) = Self::DESCRIPTOR.validate_with(
            <Self::Tracker as MemoryTracker>::LEVEL,
            <Self::Threading as ThreadPolicy>::POLICY,
        ) {
            panic!("{}", e.as_str());
        }
    };
}

/// Declare a zero-sized [`MemoryConfig`] type.
///
/// ```
/// use memlayer_policy::{define_config, ConfigBuilder, PaddingPolicy, TrackingLevel};
/// use memlayer_policy::{AggregateTracker, StdAtomic};
///
/// define_config! {
///     /// Aggregate tracking with cache-line alignment.
///     pub struct CountingConfig {
///         descriptor: ConfigBuilder::new("counting")
///             .tracking(TrackingLevel::Aggregate)
///             .padding(PaddingPolicy::Always)
///             .descriptor(),
///         threading: StdAtomic,
///         tracker: AggregateTracker<StdAtomic>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_config {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            descriptor: $descriptor:expr,
            threading: $threading:ty,
            tracker: $tracker:ty $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::MemoryConfig for $name {
            const DESCRIPTOR: $crate::ConfigDescriptor = $descriptor;
            type Threading = $threading;
            type Tracker = $tracker;
        }
    };
}

#[cfg(debug_assertions)]
type DefaultTracker = AggregateTracker<StdAtomic>;
#[cfg(not(debug_assertions))]
type DefaultTracker = DisabledTracker;

define_config! {
    /// Tracking and padding in debug builds, plain pass-through in release.
    pub struct DefaultConfig {
        descriptor: ConfigDescriptor::DEFAULT,
        threading: StdAtomic,
        tracker: DefaultTracker,
    }
}

define_config! {
    /// No header, no tracking, no thread safety.
    pub struct HighPerformanceConfig {
        descriptor: ConfigDescriptor::HIGH_PERFORMANCE,
        threading: NoSync,
        tracker: DisabledTracker,
    }
}

define_config! {
    /// Per-allocation tracking with leak detection.
    pub struct DebugConfig {
        descriptor: ConfigDescriptor::DEBUG,
        threading: StdAtomic,
        tracker: DetailedTracker<StdAtomic>,
    }
}

define_config! {
    /// All bookkeeping off.
    pub struct EmbeddedConfig {
        descriptor: ConfigDescriptor::EMBEDDED,
        threading: NoSync,
        tracker: DisabledTracker,
    }
}

define_config! {
    /// Aggregate counters safe to share across threads.
    pub struct ThreadSafeConfig {
        descriptor: ConfigDescriptor::THREAD_SAFE,
        threading: StdAtomic,
        tracker: AggregateTracker<StdAtomic>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets() {
        assert_eq!(layout::SIZE_OFFSET, 0);
        assert_eq!(layout::ELEMENT_OFFSET, 8);
        assert!(layout::DATA_OFFSET >= 16);
        assert_eq!(layout::DATA_OFFSET % layout::MAX_ALIGN, 0);
    }

    #[test]
    fn all_presets_validate() {
        for preset in ConfigDescriptor::PRESETS {
            assert_eq!(preset.validate(), Ok(()), "preset {}", preset.name);
        }
        let () = DefaultConfig::CHECK;
        let () = HighPerformanceConfig::CHECK;
        let () = DebugConfig::CHECK;
        let () = EmbeddedConfig::CHECK;
        let () = ThreadSafeConfig::CHECK;
    }

    #[test]
    fn enable_flag_with_none_policy_is_rejected() {
        let base = ConfigBuilder::from_preset("x", ConfigDescriptor::HIGH_PERFORMANCE);
        assert_eq!(
            base.flags(true, false, false).build(),
            Err(ConfigError::TrackingWithoutLevel)
        );
        assert_eq!(
            base.flags(false, true, false).build(),
            Err(ConfigError::AlignmentWithoutPolicy)
        );
        assert_eq!(
            base.flags(false, false, true).build(),
            Err(ConfigError::PaddingWithoutPolicy)
        );
    }

    #[test]
    fn tracking_requires_guaranteed_header() {
        let builder = ConfigBuilder::from_preset("t", ConfigDescriptor::THREAD_SAFE);
        assert_eq!(
            builder.padding(PaddingPolicy::Configurable).build(),
            Err(ConfigError::TrackingWithoutHeader)
        );
        assert_eq!(
            builder.padding(PaddingPolicy::None).build(),
            Err(ConfigError::TrackingWithoutHeader)
        );
        let debug_only = builder.padding(PaddingPolicy::DebugOnly).build();
        if DEBUG_BUILD {
            assert!(debug_only.is_ok());
        } else {
            assert_eq!(debug_only, Err(ConfigError::TrackingWithoutHeader));
        }
        // Untracked configurations may let the caller choose.
        let untracked = builder
            .tracking(TrackingLevel::Disabled)
            .padding(PaddingPolicy::Configurable)
            .build();
        assert!(untracked.is_ok());
    }

    #[test]
    fn custom_alignment_must_be_power_of_two() {
        let builder = ConfigBuilder::new("c").alignment(AlignmentPolicy::Custom);
        assert_eq!(
            builder.custom_alignment(48).build(),
            Err(ConfigError::InvalidCustomAlignment)
        );
        let ok = builder.custom_alignment(256).build().unwrap();
        assert_eq!(ok.preferred_alignment(), 256);
    }

    #[test]
    fn type_agreement_is_checked() {
        let d = ConfigDescriptor::DEBUG;
        assert_eq!(
            d.validate_with(TrackingLevel::Aggregate, ThreadSafetyPolicy::Atomic),
            Err(ConfigError::TrackerMismatch)
        );
        assert_eq!(
            d.validate_with(TrackingLevel::Detailed, ThreadSafetyPolicy::None),
            Err(ConfigError::ThreadPolicyMismatch)
        );
    }

    #[test]
    fn effective_padding_decision() {
        let configurable = ConfigBuilder::from_preset("p", ConfigDescriptor::HIGH_PERFORMANCE)
            .padding(PaddingPolicy::Configurable)
            .descriptor();
        assert!(configurable.pads(true));
        assert!(!configurable.pads(false));
        assert_eq!(configurable.header_size(true), layout::DATA_OFFSET);
        assert_eq!(configurable.header_size(false), 0);
        assert!(ConfigDescriptor::DEBUG.pads(false));
        assert!(!ConfigDescriptor::HIGH_PERFORMANCE.pads(true));
        assert_eq!(ConfigDescriptor::DEFAULT.pads(false), DEBUG_BUILD);
    }

    #[test]
    fn preset_lookup_and_parsing() {
        assert_eq!(
            ConfigDescriptor::preset("High-Performance").map(|p| p.name),
            Some("high_performance")
        );
        assert!(ConfigDescriptor::preset("turbo").is_none());
        assert_eq!(TrackingLevel::from_str_loose("FULL"), TrackingLevel::Detailed);
        assert_eq!(PaddingPolicy::from_str_loose("debug-only"), PaddingPolicy::DebugOnly);
        assert_eq!(AllocationStrategy::from_str_loose("pool"), AllocationStrategy::Pooled);
        assert_eq!(AlignmentPolicy::PlatformOptimal.as_str(), "platform_optimal");
        assert_eq!(
            ConfigDescriptor::EMBEDDED.allocation_strategy,
            AllocationStrategy::Pooled
        );
    }

    #[test]
    fn error_text_matches_const_text() {
        for e in [
            ConfigError::TrackingWithoutLevel,
            ConfigError::TrackingWithoutHeader,
            ConfigError::ThreadPolicyMismatch,
        ] {
            assert_eq!(e.to_string(), e.as_str());
        }
    }
}
