//! Policy layer for the memlayer allocation engine.
//!
//! Everything an engine needs besides raw pointer handling lives here:
//!
//! - **Sync primitives** (`sync`): counters and flags selected by thread policy
//! - **Configuration** (`config`): policy tags, presets, validation, header layout
//! - **Tracking** (`tracker`): disabled, aggregate and detailed trackers
//! - **Errors** (`error`): error taxonomy, error policy, pluggable handler
//! - **Runtime settings** (`runtime`): hooks, soft limits, debug toggles
//! - **Diagnostics** (`diagnostics`): JSONL structured log records

#![deny(unsafe_code)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod tracker;

pub use config::{
    AlignmentPolicy, AllocationStrategy, CACHE_LINE_SIZE, ConfigBuilder, ConfigDescriptor,
    ConfigError, DEBUG_BUILD, DebugConfig, DefaultConfig, EmbeddedConfig, HighPerformanceConfig,
    MemoryConfig, PAGE_SIZE, PaddingPolicy, ThreadSafeConfig, TrackingLevel, layout,
};
pub use diagnostics::{LogEmitter, LogEntry, LogLevel};
pub use error::{
    ErrorHandler, ErrorPolicy, ErrorSeverity, MemoryError, Reporter, SourceLocation, crash,
    default_error_handler, error_handler, set_error_handler,
};
pub use runtime::{RuntimeConfig, SizeClass, runtime_config};
pub use sync::{
    AtomicCounter, AtomicFlag, Counter, CustomAtomic, Flag, NoSync, StdAtomic, ThreadPolicy,
    ThreadSafetyPolicy, UnsyncCounter, UnsyncFlag,
};
pub use tracker::{
    AggregateTracker, AllocationInfo, DetailedTracker, DisabledTracker, LeakReport, MemoryStats,
    MemoryTracker,
};
