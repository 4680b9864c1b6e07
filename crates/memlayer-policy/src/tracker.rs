//! Allocation tracking at three levels of fidelity.
//!
//! - [`DisabledTracker`]: every call is a no-op.
//! - [`AggregateTracker`]: usage, peak and operation counters.
//! - [`DetailedTracker`]: the aggregate counters plus a mutex-guarded
//!   pointer table used for leak reports and double-free detection.
//!
//! Trackers are generic over a [`ThreadPolicy`]; the table lock is the only
//! blocking primitive and is never held across a call into the error handler.

use std::collections::HashMap;
use std::marker::PhantomData;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::TrackingLevel;
use crate::error::{ErrorSeverity, Reporter, SourceLocation};
use crate::sync::{Counter, ThreadPolicy};

/// Snapshot of tracker counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Bytes ever allocated, including reallocation growth.
    pub total_allocated: u64,
    /// Bytes ever released, including reallocation shrinkage.
    pub total_freed: u64,
    pub current_usage: u64,
    pub peak_usage: u64,
    pub allocation_count: u64,
    pub deallocation_count: u64,
    pub reallocation_count: u64,
}

impl MemoryStats {
    /// Allocations not yet matched by a deallocation.
    #[must_use]
    pub fn live_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }
}

/// A live allocation recorded by the detailed tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationInfo {
    pub address: usize,
    pub size: u64,
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
    /// Monotonic sequence id, restarted by `reset_stats`.
    pub id: u64,
}

impl AllocationInfo {
    #[must_use]
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file, self.line, self.function)
    }
}

/// Result of a leak dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    pub level: TrackingLevel,
    pub stats: MemoryStats,
    /// Live allocations ordered by sequence id. Empty below `Detailed`.
    pub leaks: Vec<AllocationInfo>,
}

impl LeakReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }

    #[must_use]
    pub fn leaked_bytes(&self) -> u64 {
        self.leaks.iter().map(|l| l.size).sum()
    }
}

/// Contract shared by all tracking levels.
pub trait MemoryTracker: Default {
    const LEVEL: TrackingLevel;
    /// True when the tracker remembers sizes per pointer.
    const RETAINS_POINTERS: bool = false;

    fn track_allocation(&self, size: u64, loc: &SourceLocation);
    fn track_deallocation(&self, size: u64, loc: &SourceLocation);
    fn track_reallocation(&self, old_size: u64, new_size: u64, loc: &SourceLocation);

    fn track_allocation_with_ptr(&self, _ptr: usize, size: u64, loc: &SourceLocation) {
        self.track_allocation(size, loc);
    }

    /// Record a release and return the number of bytes accounted for it.
    fn track_deallocation_with_ptr(&self, _ptr: usize, size: u64, loc: &SourceLocation) -> u64 {
        self.track_deallocation(size, loc);
        size
    }

    /// Take the record for `ptr` out of the table before the block is
    /// resized or moved. The allocator may hand the old address to another
    /// caller as soon as the move releases it, so the entry must be gone first.
    fn detach(&self, _ptr: usize) -> Option<AllocationInfo> {
        None
    }

    /// Put back a record taken by [`detach`](Self::detach) when the resize failed.
    fn reattach(&self, _info: AllocationInfo) {}

    /// Record a resize of a block already passed to [`detach`](Self::detach).
    /// `new_ptr` is `None` when the block was released.
    fn track_reallocation_with_ptr(
        &self,
        _new_ptr: Option<usize>,
        old_size: u64,
        new_size: u64,
        loc: &SourceLocation,
    ) {
        self.track_reallocation(old_size, new_size, loc);
    }

    /// Size recorded for `ptr`, if this tracker retains pointers and knows it.
    fn recorded_size(&self, _ptr: usize) -> Option<u64> {
        None
    }

    fn contains(&self, ptr: usize) -> bool {
        self.recorded_size(ptr).is_some()
    }

    fn current_usage(&self) -> u64;
    fn peak_usage(&self) -> u64;
    fn allocation_count(&self) -> u64;
    fn stats(&self) -> MemoryStats;
    fn reset_stats(&self);

    /// Live allocations, ordered by sequence id.
    fn leaks(&self) -> Vec<AllocationInfo> {
        Vec::new()
    }

    /// Report current state through `reporter` and return it.
    fn dump_allocations(&self, reporter: &Reporter) -> LeakReport;
}

// ---------------------------------------------------------------------------
// Disabled
// ---------------------------------------------------------------------------

/// Tracker that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTracker;

impl MemoryTracker for DisabledTracker {
    const LEVEL: TrackingLevel = TrackingLevel::Disabled;

    #[inline(always)]
    fn track_allocation(&self, _size: u64, _loc: &SourceLocation) {}

    #[inline(always)]
    fn track_deallocation(&self, _size: u64, _loc: &SourceLocation) {}

    #[inline(always)]
    fn track_reallocation(&self, _old_size: u64, _new_size: u64, _loc: &SourceLocation) {}

    fn current_usage(&self) -> u64 {
        0
    }

    fn peak_usage(&self) -> u64 {
        0
    }

    fn allocation_count(&self) -> u64 {
        0
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats::default()
    }

    fn reset_stats(&self) {}

    fn dump_allocations(&self, _reporter: &Reporter) -> LeakReport {
        LeakReport {
            level: Self::LEVEL,
            stats: MemoryStats::default(),
            leaks: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Counter-only tracker.
pub struct AggregateTracker<P: ThreadPolicy> {
    current_usage: P::Counter,
    peak_usage: P::Counter,
    allocation_count: P::Counter,
    deallocation_count: P::Counter,
    reallocation_count: P::Counter,
    total_allocated: P::Counter,
    total_freed: P::Counter,
    _policy: PhantomData<P>,
}

impl<P: ThreadPolicy> Default for AggregateTracker<P> {
    fn default() -> Self {
        Self {
            current_usage: P::Counter::new(0),
            peak_usage: P::Counter::new(0),
            allocation_count: P::Counter::new(0),
            deallocation_count: P::Counter::new(0),
            reallocation_count: P::Counter::new(0),
            total_allocated: P::Counter::new(0),
            total_freed: P::Counter::new(0),
            _policy: PhantomData,
        }
    }
}

impl<P: ThreadPolicy> std::fmt::Debug for AggregateTracker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateTracker")
            .field("stats", &self.stats())
            .finish()
    }
}

impl<P: ThreadPolicy> AggregateTracker<P> {
    fn grow(&self, bytes: u64) {
        let usage = self.current_usage.add(bytes);
        self.peak_usage.exchange_if_greater(usage);
        self.total_allocated.add(bytes);
    }

    fn shrink(&self, bytes: u64) {
        self.current_usage.saturating_sub(bytes);
        self.total_freed.add(bytes);
    }

    fn summary(&self) -> String {
        let s = self.stats();
        format!(
            "memory stats: current={} peak={} allocated={} freed={} allocs={} deallocs={} reallocs={}",
            s.current_usage,
            s.peak_usage,
            s.total_allocated,
            s.total_freed,
            s.allocation_count,
            s.deallocation_count,
            s.reallocation_count,
        )
    }
}

impl<P: ThreadPolicy> MemoryTracker for AggregateTracker<P> {
    const LEVEL: TrackingLevel = TrackingLevel::Aggregate;

    fn track_allocation(&self, size: u64, _loc: &SourceLocation) {
        self.grow(size);
        self.allocation_count.increment();
    }

    fn track_deallocation(&self, size: u64, _loc: &SourceLocation) {
        self.shrink(size);
        self.deallocation_count.increment();
    }

    fn track_reallocation(&self, old_size: u64, new_size: u64, _loc: &SourceLocation) {
        if new_size > old_size {
            self.grow(new_size - old_size);
        } else {
            self.shrink(old_size - new_size);
        }
        self.reallocation_count.increment();
    }

    fn current_usage(&self) -> u64 {
        self.current_usage.get()
    }

    fn peak_usage(&self) -> u64 {
        self.peak_usage.get()
    }

    fn allocation_count(&self) -> u64 {
        self.allocation_count.get()
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_allocated: self.total_allocated.get(),
            total_freed: self.total_freed.get(),
            current_usage: self.current_usage.get(),
            peak_usage: self.peak_usage.get(),
            allocation_count: self.allocation_count.get(),
            deallocation_count: self.deallocation_count.get(),
            reallocation_count: self.reallocation_count.get(),
        }
    }

    fn reset_stats(&self) {
        self.current_usage.set(0);
        self.peak_usage.set(0);
        self.allocation_count.set(0);
        self.deallocation_count.set(0);
        self.reallocation_count.set(0);
        self.total_allocated.set(0);
        self.total_freed.set(0);
    }

    fn dump_allocations(&self, reporter: &Reporter) -> LeakReport {
        reporter.report(
            ErrorSeverity::Warning,
            &crate::here!("dump_allocations"),
            &self.summary(),
        );
        LeakReport {
            level: Self::LEVEL,
            stats: self.stats(),
            leaks: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Detailed
// ---------------------------------------------------------------------------

/// Aggregate counters plus a per-pointer allocation table.
pub struct DetailedTracker<P: ThreadPolicy> {
    counters: AggregateTracker<P>,
    next_id: P::Counter,
    allocations: Mutex<HashMap<usize, AllocationInfo>>,
}

impl<P: ThreadPolicy> Default for DetailedTracker<P> {
    fn default() -> Self {
        Self {
            counters: AggregateTracker::default(),
            next_id: P::Counter::new(0),
            allocations: Mutex::new(HashMap::new()),
        }
    }
}

impl<P: ThreadPolicy> std::fmt::Debug for DetailedTracker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailedTracker")
            .field("stats", &self.counters.stats())
            .field("live", &self.allocations.lock().len())
            .finish()
    }
}

impl<P: ThreadPolicy> DetailedTracker<P> {
    fn record(&self, ptr: usize, size: u64, loc: &SourceLocation) {
        let info = AllocationInfo {
            address: ptr,
            size,
            file: loc.file,
            line: loc.line,
            function: loc.function,
            id: self.next_id.increment(),
        };
        self.allocations.lock().insert(ptr, info);
    }

    /// Number of live table entries.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.allocations.lock().len()
    }
}

impl<P: ThreadPolicy> MemoryTracker for DetailedTracker<P> {
    const LEVEL: TrackingLevel = TrackingLevel::Detailed;
    const RETAINS_POINTERS: bool = true;

    fn track_allocation(&self, size: u64, loc: &SourceLocation) {
        self.counters.track_allocation(size, loc);
    }

    fn track_deallocation(&self, size: u64, loc: &SourceLocation) {
        self.counters.track_deallocation(size, loc);
    }

    fn track_reallocation(&self, old_size: u64, new_size: u64, loc: &SourceLocation) {
        self.counters.track_reallocation(old_size, new_size, loc);
    }

    fn track_allocation_with_ptr(&self, ptr: usize, size: u64, loc: &SourceLocation) {
        self.counters.track_allocation(size, loc);
        self.record(ptr, size, loc);
    }

    fn track_deallocation_with_ptr(&self, ptr: usize, _size: u64, loc: &SourceLocation) -> u64 {
        let removed = self.allocations.lock().remove(&ptr);
        // Unknown pointers (e.g. allocated before a reset) account as zero bytes.
        let size = removed.map_or(0, |info| info.size);
        self.counters.track_deallocation(size, loc);
        size
    }

    fn detach(&self, ptr: usize) -> Option<AllocationInfo> {
        self.allocations.lock().remove(&ptr)
    }

    fn reattach(&self, info: AllocationInfo) {
        self.allocations.lock().insert(info.address, info);
    }

    fn track_reallocation_with_ptr(
        &self,
        new_ptr: Option<usize>,
        old_size: u64,
        new_size: u64,
        loc: &SourceLocation,
    ) {
        if let Some(new_ptr) = new_ptr {
            self.record(new_ptr, new_size, loc);
        }
        self.counters.track_reallocation(old_size, new_size, loc);
    }

    fn recorded_size(&self, ptr: usize) -> Option<u64> {
        self.allocations.lock().get(&ptr).map(|info| info.size)
    }

    fn contains(&self, ptr: usize) -> bool {
        self.allocations.lock().contains_key(&ptr)
    }

    fn current_usage(&self) -> u64 {
        self.counters.current_usage()
    }

    fn peak_usage(&self) -> u64 {
        self.counters.peak_usage()
    }

    fn allocation_count(&self) -> u64 {
        self.counters.allocation_count()
    }

    fn stats(&self) -> MemoryStats {
        self.counters.stats()
    }

    fn reset_stats(&self) {
        let mut table = self.allocations.lock();
        table.clear();
        self.next_id.set(0);
        self.counters.reset_stats();
    }

    fn leaks(&self) -> Vec<AllocationInfo> {
        let mut leaks: Vec<_> = self.allocations.lock().values().cloned().collect();
        leaks.sort_by_key(|info| info.id);
        leaks
    }

    fn dump_allocations(&self, reporter: &Reporter) -> LeakReport {
        let leaks = self.leaks();
        for leak in &leaks {
            let message = format!(
                "leak: {} bytes at {:#x} ({}:{}) id {}",
                leak.size, leak.address, leak.file, leak.line, leak.id
            );
            reporter.report(ErrorSeverity::Warning, &leak.location(), &message);
        }
        LeakReport {
            level: Self::LEVEL,
            stats: self.stats(),
            leaks,
        }
    }
}
