//! The configurable allocation engine.
//!
//! [`MemoryManager`] wraps a [`RawAllocator`] with the behavior selected by a
//! [`MemoryConfig`]: optional hidden size header, tracking, runtime hooks and
//! limits, and error reporting. Public operations never unwind; a failure is
//! reported once through the engine's [`Reporter`] and the call returns `None`.
//!
//! Pointer-producing operations are safe. Operations that consume a pointer
//! are `unsafe`: the pointer must come from the same engine, through the
//! matching family (`alloc`/`realloc`/`free`, or the `_aligned` variants), and
//! with the same `pad_align` argument it was allocated with.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use memlayer_policy::layout::DATA_OFFSET;
use memlayer_policy::{
    ConfigDescriptor, ErrorHandler, ErrorPolicy, ErrorSeverity, LeakReport, LogEmitter, LogEntry,
    LogLevel, MemoryConfig, MemoryError, MemoryStats, MemoryTracker, Reporter, RuntimeConfig,
    SourceLocation, runtime_config,
};

use crate::header::{self, BlockHeader};
use crate::raw::{LibcBackend, RawAllocator};

/// Allocation engine parameterized by a configuration and a raw backend.
pub struct MemoryManager<C: MemoryConfig, B: RawAllocator = LibcBackend> {
    tracker: C::Tracker,
    backend: B,
    reporter: Reporter,
    runtime: &'static RuntimeConfig,
    _config: PhantomData<fn() -> C>,
}

impl<C: MemoryConfig, B: RawAllocator + Default> MemoryManager<C, B> {
    /// Engine over a default-constructed backend and the global runtime config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(B::default())
    }
}

impl<C: MemoryConfig, B: RawAllocator + Default> Default for MemoryManager<C, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MemoryConfig, B: RawAllocator> std::fmt::Debug for MemoryManager<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &C::DESCRIPTOR.name)
            .field("stats", &self.tracker.stats())
            .finish()
    }
}

impl<C: MemoryConfig, B: RawAllocator> MemoryManager<C, B> {
    /// Engine over `backend`.
    #[must_use]
    pub fn with_backend(backend: B) -> Self {
        let () = C::CHECK;
        Self {
            tracker: C::Tracker::default(),
            backend,
            reporter: Reporter::new(C::DESCRIPTOR.error_policy),
            runtime: runtime_config(),
            _config: PhantomData,
        }
    }

    /// Deliver reports to `handler` instead of the process-wide handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.reporter = self.reporter.with_handler(handler);
        self
    }

    /// Consult `runtime` instead of the process-wide runtime config.
    #[must_use]
    pub fn with_runtime_config(mut self, runtime: &'static RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> &'static ConfigDescriptor {
        &C::DESCRIPTOR
    }

    #[must_use]
    pub fn tracker(&self) -> &C::Tracker {
        &self.tracker
    }

    #[must_use]
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    #[must_use]
    pub fn runtime(&self) -> &'static RuntimeConfig {
        self.runtime
    }

    // -----------------------------------------------------------------------
    // Byte blocks
    // -----------------------------------------------------------------------

    /// Allocate `bytes` uninitialized bytes.
    #[track_caller]
    pub fn alloc(&self, bytes: usize, pad_align: bool) -> Option<NonNull<u8>> {
        let loc = SourceLocation::caller("alloc");
        let pad = C::DESCRIPTOR.pads(pad_align);
        self.settle(self.allocate(bytes, pad, false, &loc), &loc)
    }

    /// Allocate `bytes` zeroed bytes.
    #[track_caller]
    pub fn alloc_zeroed(&self, bytes: usize, pad_align: bool) -> Option<NonNull<u8>> {
        let loc = SourceLocation::caller("alloc_zeroed");
        let pad = C::DESCRIPTOR.pads(pad_align);
        self.settle(self.allocate(bytes, pad, true, &loc), &loc)
    }

    /// Resize a block. A null `ptr` allocates; `new_bytes == 0` frees and
    /// returns `None`. On failure the original block is left intact.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from [`alloc`](Self::alloc) /
    /// [`alloc_zeroed`](Self::alloc_zeroed) / `realloc` of this engine, with
    /// the same `pad_align`.
    #[track_caller]
    pub unsafe fn realloc(
        &self,
        ptr: *mut u8,
        new_bytes: usize,
        pad_align: bool,
    ) -> Option<NonNull<u8>> {
        let loc = SourceLocation::caller("realloc");
        let pad = C::DESCRIPTOR.pads(pad_align);
        match NonNull::new(ptr) {
            None => self.settle(self.allocate(new_bytes, pad, false, &loc), &loc),
            // SAFETY: forwarded caller contract.
            Some(user) => self
                .settle(unsafe { self.resize(user, new_bytes, pad, &loc) }, &loc)
                .flatten(),
        }
    }

    /// Release a block. Null is reported as [`MemoryError::NullPointer`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this engine's byte-block
    /// family, with the same `pad_align` it was allocated with.
    #[track_caller]
    pub unsafe fn free(&self, ptr: *mut u8, pad_align: bool) {
        let loc = SourceLocation::caller("free");
        let result = match NonNull::new(ptr) {
            None => Err(MemoryError::NullPointer { operation: "free" }),
            // SAFETY: forwarded caller contract.
            Some(user) => unsafe { self.release(user, C::DESCRIPTOR.pads(pad_align), &loc) },
        };
        self.settle(result, &loc);
    }

    // -----------------------------------------------------------------------
    // Aligned blocks
    // -----------------------------------------------------------------------

    /// Allocate `bytes` at an address that is a multiple of `alignment`.
    #[track_caller]
    pub fn alloc_aligned(&self, bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        let loc = SourceLocation::caller("alloc_aligned");
        self.settle(self.allocate_aligned(bytes, alignment, &loc), &loc)
    }

    /// Move an aligned block into a fresh aligned block, copying
    /// `min(prev_bytes, new_bytes)` bytes. A null `ptr` allocates;
    /// `new_bytes == 0` frees and returns `None`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this engine's aligned family,
    /// at least `prev_bytes` long.
    #[track_caller]
    pub unsafe fn realloc_aligned(
        &self,
        ptr: *mut u8,
        new_bytes: usize,
        prev_bytes: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let loc = SourceLocation::caller("realloc_aligned");
        let Some(user) = NonNull::new(ptr) else {
            return self.settle(self.allocate_aligned(new_bytes, alignment, &loc), &loc);
        };
        if new_bytes == 0 {
            // SAFETY: forwarded caller contract.
            let result = unsafe { self.release_aligned(user, &loc) };
            self.settle(result, &loc);
            return None;
        }
        // SAFETY: forwarded caller contract.
        let result = unsafe { self.resize_aligned(user, new_bytes, prev_bytes, alignment, &loc) };
        self.settle(result, &loc)
    }

    /// Release an aligned block. Null is reported as [`MemoryError::NullPointer`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this engine's aligned family.
    #[track_caller]
    pub unsafe fn free_aligned(&self, ptr: *mut u8) {
        let loc = SourceLocation::caller("free_aligned");
        let result = match NonNull::new(ptr) {
            None => Err(MemoryError::NullPointer {
                operation: "free_aligned",
            }),
            // SAFETY: forwarded caller contract.
            Some(user) => unsafe { self.release_aligned(user, &loc) },
        };
        self.settle(result, &loc);
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn usage(&self) -> u64 {
        self.tracker.current_usage()
    }

    #[must_use]
    pub fn peak_usage(&self) -> u64 {
        self.tracker.peak_usage()
    }

    /// No real ceiling is tracked; always `u64::MAX`.
    #[must_use]
    pub fn available(&self) -> u64 {
        u64::MAX
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.tracker.stats()
    }

    /// Zero all counters. Detailed trackers also forget live blocks, so
    /// with double-free detection on, blocks allocated before the reset can
    /// no longer be freed through this engine.
    pub fn reset_stats(&self) {
        self.tracker.reset_stats();
    }

    /// Report the tracker's state through the error handler.
    pub fn dump_allocations(&self) -> LeakReport {
        self.tracker.dump_allocations(&self.reporter)
    }

    /// Report outstanding allocations: one warning per leak for detailed
    /// trackers, a single summary warning otherwise.
    pub fn report_leaks(&self) -> LeakReport {
        if <C::Tracker as MemoryTracker>::RETAINS_POINTERS {
            return self.tracker.dump_allocations(&self.reporter);
        }
        let stats = self.tracker.stats();
        let live = stats.live_allocations();
        if live > 0 {
            let loc = SourceLocation::caller("report_leaks");
            self.reporter.report(
                ErrorSeverity::Warning,
                &loc,
                &format!("{live} allocations ({} bytes) still live", stats.current_usage),
            );
        }
        LeakReport {
            level: <C::Tracker as MemoryTracker>::LEVEL,
            stats,
            leaks: Vec::new(),
        }
    }

    /// Emit the leak report as one structured log line.
    pub fn write_leak_report(&self, emitter: &mut LogEmitter) -> std::io::Result<LeakReport> {
        let report = self
            .tracker
            .dump_allocations(&Reporter::new(ErrorPolicy::Silent));
        let level = if report.is_clean() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        let details = serde_json::to_value(&report).map_err(std::io::Error::other)?;
        let entry = LogEntry::new(level, "memory.leak_report")
            .with_message(format!(
                "{} leaks, {} bytes; config {}",
                report.leaks.len(),
                report.leaked_bytes(),
                C::DESCRIPTOR.name
            ))
            .with_details(details);
        emitter.emit_entry(&entry)?;
        emitter.flush()?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    pub(crate) fn settle<T>(
        &self,
        result: Result<T, MemoryError>,
        loc: &SourceLocation,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.reporter.report_error(&error, loc);
                None
            }
        }
    }

    /// Apply the runtime memory ceiling to `requested` additional bytes.
    fn admit(&self, requested: u64) -> Result<(), MemoryError> {
        self.runtime
            .check_limit(self.tracker.current_usage(), requested)
    }

    /// Issue the warning-threshold report if usage just crossed it.
    fn observe_usage(&self, loc: &SourceLocation) {
        let usage = self.tracker.current_usage();
        if self.runtime.crossed_warning_threshold(usage) {
            self.reporter.report(
                ErrorSeverity::Warning,
                loc,
                &format!(
                    "memory usage {usage} reached warning threshold {}",
                    self.runtime.warning_threshold()
                ),
            );
        }
    }

    /// Aligned blocks keep no size header; only pointer-retaining trackers
    /// can account their bytes symmetrically.
    fn aligned_tracking_size(bytes: usize) -> u64 {
        if <C::Tracker as MemoryTracker>::RETAINS_POINTERS {
            bytes as u64
        } else {
            0
        }
    }

    /// Runtime checks on a pointer about to be released or resized.
    ///
    /// # Safety
    ///
    /// If the tracker knows `user` and `padded` is set, `user` must be a live
    /// padded block.
    unsafe fn screen(
        &self,
        user: NonNull<u8>,
        padded: bool,
    ) -> Result<(), MemoryError> {
        if !<C::Tracker as MemoryTracker>::RETAINS_POINTERS {
            return Ok(());
        }
        let address = user.as_ptr() as usize;
        let recorded = self.tracker.recorded_size(address);
        if self.runtime.double_free_detection() && recorded.is_none() {
            return Err(MemoryError::DoubleFree { address });
        }
        let Some(expected) = recorded else {
            return Ok(());
        };
        if self.runtime.bounds_checking() && padded {
            // SAFETY: the tracker still lists `user`, so it is a live padded block.
            let found = unsafe { BlockHeader::from_user(user) }.size();
            if found != expected {
                return Err(MemoryError::HeaderCorrupted {
                    address,
                    found,
                    expected,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn allocate(
        &self,
        bytes: usize,
        pad: bool,
        zeroed: bool,
        loc: &SourceLocation,
    ) -> Result<NonNull<u8>, MemoryError> {
        let oom = MemoryError::OutOfMemory { requested: bytes };
        let header_size = if pad { DATA_OFFSET } else { 0 };
        let total = bytes.checked_add(header_size).ok_or(oom.clone())?;
        self.admit(bytes as u64)?;

        let raw = if zeroed {
            self.backend.allocate_zeroed(total)
        } else {
            self.backend.allocate(total)
        };
        let raw = NonNull::new(raw).ok_or(oom)?;
        let user = if pad {
            // SAFETY: `raw` spans `bytes + DATA_OFFSET` bytes.
            unsafe { BlockHeader::from_base(raw) }.init(bytes as u64)
        } else {
            raw
        };

        self.tracker
            .track_allocation_with_ptr(user.as_ptr() as usize, bytes as u64, loc);
        self.observe_usage(loc);
        self.runtime
            .notify_allocation(user.as_ptr(), bytes as u64, loc.function);
        Ok(user)
    }

    /// # Safety
    ///
    /// `user` must be a live byte block from this engine, allocated with `pad`.
    pub(crate) unsafe fn release(
        &self,
        user: NonNull<u8>,
        pad: bool,
        loc: &SourceLocation,
    ) -> Result<(), MemoryError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.screen(user, pad)? };
        let address = user.as_ptr() as usize;
        let (base, header_size) = if pad {
            // SAFETY: `user` is a live padded block.
            let header = unsafe { BlockHeader::from_user(user) };
            (header.base(), header.size())
        } else {
            (user, 0)
        };
        let size = self.tracker.track_deallocation_with_ptr(address, header_size, loc);
        self.runtime
            .notify_deallocation(user.as_ptr(), size, loc.function);
        // SAFETY: `base` is the start of a live allocation from this backend.
        unsafe { self.backend.release(base.as_ptr()) };
        self.observe_usage(loc);
        Ok(())
    }

    /// # Safety
    ///
    /// `user` must be a live byte block from this engine, allocated with `pad`.
    unsafe fn resize(
        &self,
        user: NonNull<u8>,
        new_bytes: usize,
        pad: bool,
        loc: &SourceLocation,
    ) -> Result<Option<NonNull<u8>>, MemoryError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.screen(user, pad)? };
        let address = user.as_ptr() as usize;
        let (base, header_size) = if pad {
            // SAFETY: `user` is a live padded block.
            let header = unsafe { BlockHeader::from_user(user) };
            (header.base(), Some(header.size()))
        } else {
            (user, None)
        };

        // The record leaves the table before the backend can release the old
        // address; another thread may be handed that address at once.
        let detached = self.tracker.detach(address);
        let recorded = detached.as_ref().map(|info| info.size);
        // Unpadded blocks carry no size; only a pointer-retaining tracker knows it.
        let old_size = header_size.or(recorded).unwrap_or(0);
        let tracked_old = if <C::Tracker as MemoryTracker>::RETAINS_POINTERS {
            recorded.unwrap_or(0)
        } else {
            old_size
        };

        if new_bytes == 0 {
            self.tracker
                .track_reallocation_with_ptr(None, tracked_old, 0, loc);
            self.runtime.notify_reallocation(
                user.as_ptr(),
                std::ptr::null_mut(),
                old_size,
                0,
                loc.function,
            );
            // SAFETY: `base` is the start of a live allocation from this backend.
            unsafe { self.backend.release(base.as_ptr()) };
            self.observe_usage(loc);
            return Ok(None);
        }

        // SAFETY: forwarded caller contract.
        let new_user = match unsafe { self.move_block(base, old_size, new_bytes, pad) } {
            Ok(new_user) => new_user,
            Err(error) => {
                if let Some(info) = detached {
                    self.tracker.reattach(info);
                }
                return Err(error);
            }
        };

        self.tracker.track_reallocation_with_ptr(
            Some(new_user.as_ptr() as usize),
            tracked_old,
            new_bytes as u64,
            loc,
        );
        self.observe_usage(loc);
        self.runtime.notify_reallocation(
            user.as_ptr(),
            new_user.as_ptr(),
            old_size,
            new_bytes as u64,
            loc.function,
        );
        Ok(Some(new_user))
    }

    /// Resize the backend block at `base` to hold `new_bytes` plus the header
    /// when `pad` is set. On failure the old block is untouched.
    ///
    /// # Safety
    ///
    /// `base` must be the start of a live allocation from this backend.
    unsafe fn move_block(
        &self,
        base: NonNull<u8>,
        old_size: u64,
        new_bytes: usize,
        pad: bool,
    ) -> Result<NonNull<u8>, MemoryError> {
        let oom = MemoryError::OutOfMemory {
            requested: new_bytes,
        };
        let header_size = if pad { DATA_OFFSET } else { 0 };
        let total = new_bytes.checked_add(header_size).ok_or(oom.clone())?;
        let growth = (new_bytes as u64).saturating_sub(old_size);
        if growth > 0 {
            self.admit(growth)?;
        }

        // SAFETY: `base` is a live allocation from this backend.
        let raw = NonNull::new(unsafe { self.backend.resize(base.as_ptr(), total) }).ok_or(oom)?;
        if !pad {
            return Ok(raw);
        }
        // SAFETY: `raw` spans `new_bytes + DATA_OFFSET` bytes and keeps the
        // old header contents.
        let header = unsafe { BlockHeader::from_base(raw) };
        header.set_size(new_bytes as u64);
        Ok(header.user())
    }

    fn allocate_aligned(
        &self,
        bytes: usize,
        alignment: usize,
        loc: &SourceLocation,
    ) -> Result<NonNull<u8>, MemoryError> {
        let tracked = Self::aligned_tracking_size(bytes);
        self.admit(tracked)?;
        let user = header::allocate_aligned(&self.backend, bytes, alignment)?;
        self.tracker
            .track_allocation_with_ptr(user.as_ptr() as usize, tracked, loc);
        self.observe_usage(loc);
        self.runtime
            .notify_allocation(user.as_ptr(), bytes as u64, loc.function);
        Ok(user)
    }

    /// # Safety
    ///
    /// `user` must be a live aligned block from this engine.
    unsafe fn release_aligned(
        &self,
        user: NonNull<u8>,
        loc: &SourceLocation,
    ) -> Result<(), MemoryError> {
        // SAFETY: aligned blocks are never treated as padded.
        unsafe { self.screen(user, false)? };
        let size = self
            .tracker
            .track_deallocation_with_ptr(user.as_ptr() as usize, 0, loc);
        self.runtime
            .notify_deallocation(user.as_ptr(), size, loc.function);
        // SAFETY: forwarded caller contract.
        unsafe { header::release_aligned(&self.backend, user) };
        self.observe_usage(loc);
        Ok(())
    }

    /// # Safety
    ///
    /// `user` must be a live aligned block from this engine of at least
    /// `prev_bytes` bytes.
    unsafe fn resize_aligned(
        &self,
        user: NonNull<u8>,
        new_bytes: usize,
        prev_bytes: usize,
        alignment: usize,
        loc: &SourceLocation,
    ) -> Result<NonNull<u8>, MemoryError> {
        // SAFETY: aligned blocks are never treated as padded.
        unsafe { self.screen(user, false)? };
        // Detached before the old block is released, as in `resize`.
        let detached = self.tracker.detach(user.as_ptr() as usize);
        let old_tracked = detached.as_ref().map_or(0, |info| info.size);
        let new_tracked = Self::aligned_tracking_size(new_bytes);
        let admitted = if new_tracked > old_tracked {
            self.admit(new_tracked - old_tracked)
        } else {
            Ok(())
        };
        let moved = admitted.and_then(|()| {
            // SAFETY: forwarded caller contract.
            unsafe { header::reallocate_aligned(&self.backend, user, new_bytes, prev_bytes, alignment) }
        });
        let fresh = match moved {
            Ok(fresh) => fresh,
            Err(error) => {
                if let Some(info) = detached {
                    self.tracker.reattach(info);
                }
                return Err(error);
            }
        };
        self.tracker.track_reallocation_with_ptr(
            Some(fresh.as_ptr() as usize),
            old_tracked,
            new_tracked,
            loc,
        );
        self.observe_usage(loc);
        self.runtime.notify_reallocation(
            user.as_ptr(),
            fresh.as_ptr(),
            prev_bytes as u64,
            new_bytes as u64,
            loc.function,
        );
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::ExhaustedBackend;
    use memlayer_policy::{
        ConfigBuilder, DebugConfig, DisabledTracker, HighPerformanceConfig, NoSync,
        PaddingPolicy, ThreadSafeConfig, define_config,
    };
    use std::cell::RefCell;

    thread_local! {
        static REPORTS: RefCell<Vec<(ErrorSeverity, String)>> = const { RefCell::new(Vec::new()) };
    }

    fn capture(severity: ErrorSeverity, _f: &str, _file: &str, _line: u32, msg: &str) {
        REPORTS.with(|r| r.borrow_mut().push((severity, msg.to_string())));
    }

    fn take_reports() -> Vec<(ErrorSeverity, String)> {
        REPORTS.with(|r| std::mem::take(&mut *r.borrow_mut()))
    }

    fn isolated_runtime() -> &'static RuntimeConfig {
        Box::leak(Box::new(RuntimeConfig::new()))
    }

    fn debug_engine() -> MemoryManager<DebugConfig> {
        MemoryManager::<DebugConfig>::new()
            .with_error_handler(capture)
            .with_runtime_config(isolated_runtime())
    }

    define_config! {
        struct CallerPadded {
            descriptor: ConfigBuilder::from_preset(
                "caller_padded",
                ConfigDescriptor::HIGH_PERFORMANCE,
            )
            .padding(PaddingPolicy::Configurable)
            .descriptor(),
            threading: NoSync,
            tracker: DisabledTracker,
        }
    }

    #[test]
    fn debug_alloc_free_scenario() {
        let engine = debug_engine();
        let p = engine.alloc(100, false).expect("allocation should succeed");
        assert_eq!(engine.usage(), 100);
        assert_eq!(engine.stats().allocation_count, 1);
        // SAFETY: `p` is a live block from this engine.
        unsafe { engine.free(p.as_ptr(), false) };
        assert_eq!(engine.usage(), 0);
        assert_eq!(engine.stats().deallocation_count, 1);
        assert_eq!(engine.peak_usage(), 100);
        assert!(take_reports().is_empty());
    }

    #[test]
    fn padded_pointer_is_max_aligned_and_writable() {
        let engine = debug_engine();
        let p = engine.alloc_zeroed(64, true).expect("allocation should succeed");
        assert_eq!(p.as_ptr() as usize % memlayer_policy::layout::MAX_ALIGN, 0);
        // SAFETY: 64 zeroed bytes.
        let bytes = unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes.fill(0x5A);
        // SAFETY: `p` is live.
        unsafe { engine.free(p.as_ptr(), true) };
    }

    #[test]
    fn realloc_preserves_contents_and_tracks_delta() {
        let engine = debug_engine();
        let p = engine.alloc(8, false).expect("allocation should succeed");
        // SAFETY: 8 live bytes, then resized block of 4096.
        unsafe {
            p.as_ptr().copy_from_nonoverlapping(b"memlayer".as_ptr(), 8);
            let q = engine.realloc(p.as_ptr(), 4096, false).expect("realloc should succeed");
            assert_eq!(std::slice::from_raw_parts(q.as_ptr(), 8), b"memlayer");
            assert_eq!(engine.usage(), 4096);
            let r = engine.realloc(q.as_ptr(), 16, false).expect("realloc should succeed");
            assert_eq!(engine.usage(), 16);
            assert_eq!(engine.peak_usage(), 4096);
            assert_eq!(engine.stats().reallocation_count, 2);
            engine.free(r.as_ptr(), false);
        }
        assert_eq!(engine.usage(), 0);
    }

    #[test]
    fn realloc_null_allocates_and_zero_frees() {
        let engine = debug_engine();
        // SAFETY: null is allowed; the result is live until resized to zero.
        unsafe {
            let p = engine
                .realloc(std::ptr::null_mut(), 32, false)
                .expect("allocation should succeed");
            assert_eq!(engine.stats().allocation_count, 1);
            assert!(engine.realloc(p.as_ptr(), 0, false).is_none());
        }
        assert_eq!(engine.usage(), 0);
        assert!(engine.report_leaks().is_clean());
        assert!(take_reports().is_empty());
    }

    #[test]
    fn free_null_reports_null_pointer() {
        let engine = MemoryManager::<ThreadSafeConfig>::new()
            .with_error_handler(capture)
            .with_runtime_config(isolated_runtime());
        // SAFETY: null is reported, never dereferenced.
        unsafe { engine.free(std::ptr::null_mut(), false) };
        // SAFETY: null is reported, never dereferenced.
        unsafe { engine.free_aligned(std::ptr::null_mut()) };
        let reports = take_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].1, "null pointer passed to free");
        assert_eq!(reports[1].1, "null pointer passed to free_aligned");
        let expected = if memlayer_policy::DEBUG_BUILD {
            ErrorSeverity::Assertion
        } else {
            ErrorSeverity::Error
        };
        assert_eq!(reports[0].0, expected);
    }

    #[test]
    fn allocator_failure_returns_none_without_tracking() {
        let engine = MemoryManager::<DebugConfig, ExhaustedBackend>::new()
            .with_error_handler(capture)
            .with_runtime_config(isolated_runtime());
        assert!(engine.alloc(64, false).is_none());
        assert!(engine.alloc_aligned(64, 64).is_none());
        assert_eq!(engine.stats(), MemoryStats::default());
        let reports = take_reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].1.contains("out of memory"));
        assert_eq!(reports[0].0, ErrorSeverity::Assertion);
    }

    #[test]
    fn aligned_scenario_does_not_disturb_neighbors() {
        let engine = debug_engine();
        let neighbor = engine.alloc(64, false).expect("allocation should succeed");
        // SAFETY: 64 live bytes.
        unsafe { neighbor.as_ptr().write_bytes(0xEE, 64) };
        let p = engine.alloc_aligned(37, 64).expect("aligned allocation should succeed");
        assert_eq!(p.as_ptr() as usize % 64, 0);
        // SAFETY: 37 live bytes.
        unsafe { p.as_ptr().write_bytes(0x11, 37) };
        assert_eq!(engine.usage(), 64 + 37);
        // SAFETY: `p` is a live aligned block.
        unsafe { engine.free_aligned(p.as_ptr()) };
        assert_eq!(engine.usage(), 64);
        // SAFETY: neighbor still live.
        let bytes = unsafe { std::slice::from_raw_parts(neighbor.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0xEE));
        // SAFETY: neighbor still live.
        unsafe { engine.free(neighbor.as_ptr(), false) };
    }

    #[test]
    fn invalid_alignment_is_reported() {
        let engine = debug_engine();
        assert!(engine.alloc_aligned(16, 24).is_none());
        let reports = take_reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.starts_with("invalid alignment 24"));
    }

    #[test]
    fn realloc_aligned_moves_and_copies() {
        let engine = debug_engine();
        let p = engine.alloc_aligned(8, 32).expect("aligned allocation should succeed");
        // SAFETY: 8 live bytes, then a 512-byte aligned block.
        unsafe {
            p.as_ptr().copy_from_nonoverlapping(b"abcdefgh".as_ptr(), 8);
            let q = engine
                .realloc_aligned(p.as_ptr(), 512, 8, 256)
                .expect("aligned realloc should succeed");
            assert_eq!(q.as_ptr() as usize % 256, 0);
            assert_eq!(std::slice::from_raw_parts(q.as_ptr(), 8), b"abcdefgh");
            assert_eq!(engine.usage(), 512);
            assert_eq!(engine.stats().reallocation_count, 1);
            assert!(engine.realloc_aligned(q.as_ptr(), 0, 512, 256).is_none());
        }
        assert_eq!(engine.usage(), 0);
        assert!(engine.report_leaks().is_clean());
    }

    #[test]
    fn aggregate_tracker_counts_aligned_blocks_as_zero_bytes() {
        let engine = MemoryManager::<ThreadSafeConfig>::new()
            .with_error_handler(capture)
            .with_runtime_config(isolated_runtime());
        for _ in 0..100 {
            let p = engine.alloc_aligned(1000, 128).expect("aligned allocation should succeed");
            // SAFETY: `p` is live.
            unsafe { engine.free_aligned(p.as_ptr()) };
        }
        assert_eq!(engine.usage(), 0);
        assert_eq!(engine.peak_usage(), 0);
        assert_eq!(engine.stats().allocation_count, 100);
    }

    #[test]
    fn detailed_leak_dump_lists_sizes() {
        let engine = debug_engine();
        let a = engine.alloc(50, false).expect("allocation should succeed");
        let b = engine.alloc(75, false).expect("allocation should succeed");
        let report = engine.dump_allocations();
        let sizes: Vec<_> = report.leaks.iter().map(|l| l.size).collect();
        assert_eq!(sizes, vec![50, 75]);
        assert_eq!(take_reports().len(), 2);
        // SAFETY: both blocks are live.
        unsafe {
            engine.free(a.as_ptr(), false);
            engine.free(b.as_ptr(), false);
        }
        assert!(engine.dump_allocations().is_clean());
    }

    #[test]
    fn reset_gives_same_deltas() {
        let engine = MemoryManager::<ThreadSafeConfig>::new()
            .with_runtime_config(isolated_runtime());
        let warm = engine.alloc(10, false).expect("allocation should succeed");
        // SAFETY: `warm` is live.
        unsafe { engine.free(warm.as_ptr(), false) };
        engine.reset_stats();
        assert_eq!(engine.stats(), MemoryStats::default());
        let p = engine.alloc(10, false).expect("allocation should succeed");
        assert_eq!(engine.usage(), 10);
        // SAFETY: `p` is live.
        unsafe { engine.free(p.as_ptr(), false) };
        let s = engine.stats();
        assert_eq!((s.current_usage, s.peak_usage), (0, 10));
        assert_eq!((s.allocation_count, s.deallocation_count), (1, 1));
    }

    #[test]
    fn caller_chosen_padding_is_honored() {
        let engine = MemoryManager::<CallerPadded>::new();
        let padded = engine.alloc(24, true).expect("allocation should succeed");
        let plain = engine.alloc(24, false).expect("allocation should succeed");
        // SAFETY: `padded` was allocated with padding.
        assert_eq!(unsafe { BlockHeader::from_user(padded) }.size(), 24);
        // SAFETY: each pointer is freed with the pad flag it was allocated with.
        unsafe {
            let padded = engine.realloc(padded.as_ptr(), 48, true).expect("realloc should succeed");
            assert_eq!(BlockHeader::from_user(padded).size(), 48);
            engine.free(padded.as_ptr(), true);
            engine.free(plain.as_ptr(), false);
        }
    }

    #[test]
    fn high_performance_config_keeps_no_state() {
        let engine = MemoryManager::<HighPerformanceConfig>::new();
        let p = engine.alloc(128, true).expect("allocation should succeed");
        assert_eq!(engine.usage(), 0);
        assert_eq!(engine.available(), u64::MAX);
        // SAFETY: `p` is live and unpadded.
        unsafe { engine.free(p.as_ptr(), true) };
        assert_eq!(engine.stats(), MemoryStats::default());
    }
}
