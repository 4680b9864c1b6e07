//! # memlayer-core
//!
//! The allocation engine built on the `memlayer-policy` layer.
//!
//! - **Raw allocator seam** (`raw`): libc backend and a failing backend for tests
//! - **Block metadata** (`header`): hidden size header and aligned-block offsets;
//!   the only module that does arithmetic on user pointers
//! - **Engine** (`engine`): `MemoryManager<C>` byte, aligned and stats operations
//! - **Typed arrays** (`array`): element-count header, construction and destruction
//! - **Fast path** (`fast`): `FastManager` without header, tracking or reporting
//! - **Convenience layer** (`interface`): objects, RAII owners, process-wide facade
//! - **Build info** (`info`): version constants and platform summary
//!
//! Unsafe code is confined to pointer handling; every block carries a
//! `SAFETY` comment.

mod array;
pub mod engine;
pub mod fast;
mod header;
pub mod info;
pub mod interface;
pub mod raw;

pub use engine::MemoryManager;
pub use fast::FastManager;
pub use header::MAX_ALIGNMENT;
pub use info::{
    ModuleInfo, VERSION, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH, module_info, version_check,
};
pub use interface::{
    AlignedAllocation, Allocation, Memory, Owned, UniqueArray, alloc, alloc_aligned, alloc_zeroed,
    dump_allocations, finalize, free, free_aligned, get_available, get_error_handler,
    get_peak_usage, get_runtime_config, get_stats, get_usage, memory, realloc, realloc_aligned,
    report_leaks, reset_stats, set_error_handler,
};
pub use raw::{ExhaustedBackend, LibcBackend, RawAllocator};

pub use memlayer_policy as policy;
