//! Convenience layer: single objects, RAII owners and the process-wide facade.
//!
//! The facade functions forward to one lazily constructed
//! [`MemoryManager<DefaultConfig>`] and report through the process-wide error
//! handler. Locations recorded for facade calls are those of the caller.

#![allow(unsafe_code)]

use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use memlayer_policy::layout::MAX_ALIGN;
use memlayer_policy::{
    DefaultConfig, ErrorHandler, LeakReport, LogEmitter, MemoryConfig, MemoryError, MemoryStats,
    RuntimeConfig, SourceLocation,
};

use crate::engine::MemoryManager;
use crate::raw::{LibcBackend, RawAllocator};

// ---------------------------------------------------------------------------
// Single objects
// ---------------------------------------------------------------------------

impl<C: MemoryConfig, B: RawAllocator> MemoryManager<C, B> {
    /// Move `value` into a fresh block. The block is padded according to the
    /// configuration's padding decision for `pad_align = false`.
    #[track_caller]
    pub fn new_object<T>(&self, value: T) -> Option<NonNull<T>> {
        let loc = SourceLocation::caller("new_object");
        let result = self.object_block::<T>(&loc).map(|ptr| {
            // SAFETY: the block holds `size_of::<T>()` suitably aligned bytes.
            unsafe { ptr.write(value) };
            ptr
        });
        self.settle(result, &loc)
    }

    fn object_block<T>(&self, loc: &SourceLocation) -> Result<NonNull<T>, MemoryError> {
        if mem::align_of::<T>() > MAX_ALIGN {
            return Err(MemoryError::Assertion(format!(
                "object alignment {} exceeds allocator alignment {MAX_ALIGN}",
                mem::align_of::<T>()
            )));
        }
        let pad = C::DESCRIPTOR.pads(false);
        self.allocate(mem::size_of::<T>(), pad, false, loc)
            .map(NonNull::cast)
    }

    /// Drop the object and free its block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live object from [`new_object`](Self::new_object)
    /// of this engine.
    #[track_caller]
    pub unsafe fn delete_object<T>(&self, ptr: *mut T) {
        let Some(user) = NonNull::new(ptr) else {
            return;
        };
        let loc = SourceLocation::caller("delete_object");
        // SAFETY: forwarded caller contract.
        let result = unsafe {
            ptr::drop_in_place(user.as_ptr());
            self.release(user.cast(), C::DESCRIPTOR.pads(false), &loc)
        };
        self.settle(result, &loc);
    }
}

// ---------------------------------------------------------------------------
// RAII owners
// ---------------------------------------------------------------------------

/// A single object owned through an engine.
pub struct Owned<'a, T, C: MemoryConfig, B: RawAllocator = LibcBackend> {
    engine: &'a MemoryManager<C, B>,
    ptr: NonNull<T>,
}

impl<'a, T, C: MemoryConfig, B: RawAllocator> Owned<'a, T, C, B> {
    #[track_caller]
    pub fn new(engine: &'a MemoryManager<C, B>, value: T) -> Option<Self> {
        engine.new_object(value).map(|ptr| Self { engine, ptr })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> Deref for Owned<'_, T, C, B> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the object stays live and initialized until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> DerefMut for Owned<'_, T, C, B> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: unique owner; live until drop.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> Drop for Owned<'_, T, C, B> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `new_object` on this engine.
        unsafe { self.engine.delete_object(self.ptr.as_ptr()) }
    }
}

impl<T: std::fmt::Debug, C: MemoryConfig, B: RawAllocator> std::fmt::Debug
    for Owned<'_, T, C, B>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&**self).finish()
    }
}

/// A typed array owned through an engine.
pub struct UniqueArray<'a, T, C: MemoryConfig, B: RawAllocator = LibcBackend> {
    engine: &'a MemoryManager<C, B>,
    ptr: NonNull<T>,
    len: usize,
}

impl<'a, T, C: MemoryConfig, B: RawAllocator> UniqueArray<'a, T, C, B> {
    #[track_caller]
    pub fn new_with(
        engine: &'a MemoryManager<C, B>,
        len: usize,
        init: impl FnMut(usize) -> T,
    ) -> Option<Self> {
        engine
            .new_array_with(len, init)
            .map(|ptr| Self { engine, ptr, len })
    }

    #[track_caller]
    pub fn new_default(engine: &'a MemoryManager<C, B>, len: usize) -> Option<Self>
    where
        T: Default,
    {
        engine.new_array(len).map(|ptr| Self { engine, ptr, len })
    }

    /// Bounds-checked access; an out-of-range index is reported as
    /// [`MemoryError::InvalidIndex`].
    #[track_caller]
    pub fn get_checked(&self, index: usize) -> Option<&T> {
        let element = self.get(index);
        if element.is_none() {
            let loc = SourceLocation::caller("get_checked");
            self.engine.reporter().report_error(
                &MemoryError::InvalidIndex {
                    index,
                    len: self.len,
                },
                &loc,
            );
        }
        element
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> Deref for UniqueArray<'_, T, C, B> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: `len` initialized elements live until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> DerefMut for UniqueArray<'_, T, C, B> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: unique owner of `len` initialized elements.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> Drop for UniqueArray<'_, T, C, B> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `new_array*` on this engine.
        unsafe { self.engine.delete_array(self.ptr.as_ptr()) }
    }
}

impl<T: std::fmt::Debug, C: MemoryConfig, B: RawAllocator> std::fmt::Debug
    for UniqueArray<'_, T, C, B>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Zero-initialized byte buffer owned through an engine.
pub struct Allocation<'a, C: MemoryConfig, B: RawAllocator = LibcBackend> {
    engine: &'a MemoryManager<C, B>,
    ptr: NonNull<u8>,
    len: usize,
    pad_align: bool,
}

impl<'a, C: MemoryConfig, B: RawAllocator> Allocation<'a, C, B> {
    #[track_caller]
    pub fn zeroed(engine: &'a MemoryManager<C, B>, len: usize, pad_align: bool) -> Option<Self> {
        engine.alloc_zeroed(len, pad_align).map(|ptr| Self {
            engine,
            ptr,
            len,
            pad_align,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: unique owner of `len` initialized bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Resize through `realloc`, zero-filling any growth. Returns false and
    /// leaves the buffer unchanged when `new_len` is zero or the resize fails.
    #[track_caller]
    pub fn resize(&mut self, new_len: usize) -> bool {
        if new_len == 0 {
            return false;
        }
        // SAFETY: `ptr` is a live block of this engine allocated with `pad_align`.
        let Some(resized) = (unsafe { self.engine.realloc(self.ptr.as_ptr(), new_len, self.pad_align) })
        else {
            return false;
        };
        if new_len > self.len {
            // SAFETY: the tail past the old length lies inside the new block.
            unsafe {
                resized
                    .as_ptr()
                    .add(self.len)
                    .write_bytes(0, new_len - self.len)
            };
        }
        self.ptr = resized;
        self.len = new_len;
        true
    }
}

impl<C: MemoryConfig, B: RawAllocator> Drop for Allocation<'_, C, B> {
    fn drop(&mut self) {
        // SAFETY: `ptr` is a live block of this engine allocated with `pad_align`.
        unsafe { self.engine.free(self.ptr.as_ptr(), self.pad_align) }
    }
}

impl<C: MemoryConfig, B: RawAllocator> std::fmt::Debug for Allocation<'_, C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("len", &self.len)
            .field("pad_align", &self.pad_align)
            .finish()
    }
}

/// Zero-initialized aligned byte buffer owned through an engine.
pub struct AlignedAllocation<'a, C: MemoryConfig, B: RawAllocator = LibcBackend> {
    engine: &'a MemoryManager<C, B>,
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

impl<'a, C: MemoryConfig, B: RawAllocator> AlignedAllocation<'a, C, B> {
    #[track_caller]
    pub fn zeroed(engine: &'a MemoryManager<C, B>, len: usize, alignment: usize) -> Option<Self> {
        let ptr = engine.alloc_aligned(len, alignment)?;
        // SAFETY: `len` writable bytes.
        unsafe { ptr.as_ptr().write_bytes(0, len) };
        Some(Self {
            engine,
            ptr,
            len,
            alignment,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: unique owner of `len` initialized bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Move into a block of `new_len` bytes at `alignment`, keeping the common
    /// prefix and zero-filling any growth. Returns false and leaves the buffer
    /// unchanged when `new_len` is zero or the move fails.
    #[track_caller]
    pub fn realign(&mut self, new_len: usize, alignment: usize) -> bool {
        if new_len == 0 {
            return false;
        }
        // SAFETY: `ptr` is a live aligned block of `len` bytes from this engine.
        let moved = unsafe {
            self.engine
                .realloc_aligned(self.ptr.as_ptr(), new_len, self.len, alignment)
        };
        let Some(moved) = moved else {
            return false;
        };
        if new_len > self.len {
            // SAFETY: the tail past the copied prefix lies inside the new block.
            unsafe {
                moved
                    .as_ptr()
                    .add(self.len)
                    .write_bytes(0, new_len - self.len)
            };
        }
        self.ptr = moved;
        self.len = new_len;
        self.alignment = alignment;
        true
    }
}

impl<C: MemoryConfig, B: RawAllocator> Drop for AlignedAllocation<'_, C, B> {
    fn drop(&mut self) {
        // SAFETY: `ptr` is a live aligned block of this engine.
        unsafe { self.engine.free_aligned(self.ptr.as_ptr()) }
    }
}

impl<C: MemoryConfig, B: RawAllocator> std::fmt::Debug for AlignedAllocation<'_, C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedAllocation")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Process-wide facade
// ---------------------------------------------------------------------------

/// The engine behind the facade functions.
pub type Memory = MemoryManager<DefaultConfig>;

static MEMORY: OnceLock<Memory> = OnceLock::new();

/// The process-wide engine, constructed on first use.
pub fn memory() -> &'static Memory {
    MEMORY.get_or_init(Memory::new)
}

#[track_caller]
pub fn alloc(bytes: usize, pad_align: bool) -> Option<NonNull<u8>> {
    memory().alloc(bytes, pad_align)
}

#[track_caller]
pub fn alloc_zeroed(bytes: usize, pad_align: bool) -> Option<NonNull<u8>> {
    memory().alloc_zeroed(bytes, pad_align)
}

/// # Safety
///
/// See [`MemoryManager::realloc`].
#[track_caller]
pub unsafe fn realloc(ptr: *mut u8, new_bytes: usize, pad_align: bool) -> Option<NonNull<u8>> {
    // SAFETY: forwarded caller contract.
    unsafe { memory().realloc(ptr, new_bytes, pad_align) }
}

/// # Safety
///
/// See [`MemoryManager::free`].
#[track_caller]
pub unsafe fn free(ptr: *mut u8, pad_align: bool) {
    // SAFETY: forwarded caller contract.
    unsafe { memory().free(ptr, pad_align) }
}

#[track_caller]
pub fn alloc_aligned(bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
    memory().alloc_aligned(bytes, alignment)
}

/// # Safety
///
/// See [`MemoryManager::realloc_aligned`].
#[track_caller]
pub unsafe fn realloc_aligned(
    ptr: *mut u8,
    new_bytes: usize,
    prev_bytes: usize,
    alignment: usize,
) -> Option<NonNull<u8>> {
    // SAFETY: forwarded caller contract.
    unsafe { memory().realloc_aligned(ptr, new_bytes, prev_bytes, alignment) }
}

/// # Safety
///
/// See [`MemoryManager::free_aligned`].
#[track_caller]
pub unsafe fn free_aligned(ptr: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { memory().free_aligned(ptr) }
}

pub fn get_usage() -> u64 {
    memory().usage()
}

pub fn get_peak_usage() -> u64 {
    memory().peak_usage()
}

pub fn get_available() -> u64 {
    memory().available()
}

pub fn get_stats() -> MemoryStats {
    memory().stats()
}

pub fn reset_stats() {
    memory().reset_stats();
}

pub fn dump_allocations() -> LeakReport {
    memory().dump_allocations()
}

pub fn report_leaks() -> LeakReport {
    memory().report_leaks()
}

pub fn set_error_handler(handler: Option<ErrorHandler>) {
    memlayer_policy::set_error_handler(handler);
}

pub fn get_error_handler() -> ErrorHandler {
    memlayer_policy::error_handler()
}

pub fn get_runtime_config() -> &'static RuntimeConfig {
    memlayer_policy::runtime_config()
}

/// End-of-process hook: when leak detection is on, writes the facade
/// engine's leak report to stderr.
pub fn finalize() -> std::io::Result<Option<LeakReport>> {
    let engine = memory();
    if !engine.runtime().leak_detection() {
        return Ok(None);
    }
    engine.write_leak_report(&mut LogEmitter::stderr()).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memlayer_policy::{DEBUG_BUILD, DebugConfig, ErrorSeverity, ThreadSafeConfig};
    use std::cell::{Cell, RefCell};

    thread_local! {
        static DROPS: Cell<usize> = const { Cell::new(0) };
        static REPORTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn capture(_s: ErrorSeverity, _f: &str, _file: &str, _line: u32, msg: &str) {
        REPORTS.with(|r| r.borrow_mut().push(msg.to_string()));
    }

    fn take_reports() -> Vec<String> {
        REPORTS.with(|r| std::mem::take(&mut *r.borrow_mut()))
    }

    struct Tracked(&'static str);

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.with(|d| d.set(d.get() + 1));
        }
    }

    fn engine() -> MemoryManager<DebugConfig> {
        MemoryManager::<DebugConfig>::new()
            .with_error_handler(capture)
            .with_runtime_config(Box::leak(Box::new(RuntimeConfig::new())))
    }

    #[test]
    fn object_lifecycle() {
        let engine = engine();
        let before = DROPS.with(Cell::get);
        let obj = engine.new_object(Tracked("a")).expect("object should allocate");
        assert_eq!(engine.usage(), mem::size_of::<Tracked>() as u64);
        // SAFETY: `obj` is live.
        unsafe {
            assert_eq!(obj.as_ref().0, "a");
            engine.delete_object(obj.as_ptr());
            engine.delete_object::<Tracked>(ptr::null_mut());
        }
        assert_eq!(DROPS.with(Cell::get) - before, 1);
        assert_eq!(engine.usage(), 0);
        assert!(take_reports().is_empty());
    }

    #[test]
    fn owned_and_unique_array_release_on_drop() {
        let engine = engine();
        let before = DROPS.with(Cell::get);
        {
            let mut owned = Owned::new(&engine, vec![1, 2, 3]).expect("object should allocate");
            owned.push(4);
            assert_eq!(owned.len(), 4);
            let arr = UniqueArray::new_with(&engine, 3, |_| Tracked("x"))
                .expect("array should allocate");
            assert_eq!(arr.len(), 3);
            assert!(engine.usage() > 0);
        }
        assert_eq!(DROPS.with(Cell::get) - before, 3);
        assert_eq!(engine.usage(), 0);
        assert!(engine.dump_allocations().is_clean());
    }

    #[test]
    fn checked_index_reports_invalid_index() {
        let engine = MemoryManager::<ThreadSafeConfig>::new()
            .with_error_handler(capture)
            .with_runtime_config(Box::leak(Box::new(RuntimeConfig::new())));
        let mut arr: UniqueArray<'_, u32, ThreadSafeConfig> =
            UniqueArray::new_default(&engine, 4).expect("array should allocate");
        arr[2] = 5;
        assert_eq!(arr.get_checked(2), Some(&5));
        assert_eq!(arr.get_checked(4), None);
        assert_eq!(take_reports(), vec!["index 4 out of bounds for length 4"]);
    }

    #[test]
    fn allocation_guard_grows_with_zeroed_tail() {
        let engine = engine();
        let mut buf = Allocation::zeroed(&engine, 8, false).expect("buffer should allocate");
        buf.as_mut_slice().fill(0xAB);
        assert!(buf.resize(16));
        assert_eq!(&buf.as_slice()[..8], &[0xAB; 8]);
        assert_eq!(&buf.as_slice()[8..], &[0; 8]);
        assert!(!buf.resize(0));
        assert_eq!(engine.usage(), 16);
        drop(buf);
        assert_eq!(engine.usage(), 0);
    }

    #[test]
    fn aligned_guard_realigns_and_frees() {
        let engine = engine();
        let mut buf = AlignedAllocation::zeroed(&engine, 37, 64).expect("buffer should allocate");
        assert_eq!(buf.as_ptr() as usize % 64, 0);
        buf.as_mut_slice().fill(7);
        assert!(buf.realign(100, 256));
        assert_eq!(buf.as_ptr() as usize % 256, 0);
        assert_eq!(buf.alignment(), 256);
        assert!(buf.as_slice()[..37].iter().all(|&b| b == 7));
        assert!(buf.as_slice()[37..].iter().all(|&b| b == 0));
        assert_eq!(engine.usage(), 100);
        drop(buf);
        assert_eq!(engine.usage(), 0);
        assert!(take_reports().is_empty());
    }

    #[test]
    fn facade_round_trip() {
        let before = get_stats();
        let p = alloc(48, false).expect("facade allocation should succeed");
        if DEBUG_BUILD {
            assert!(get_usage() >= 48);
        } else {
            assert_eq!(get_usage(), 0);
        }
        // SAFETY: `p` is a live facade block.
        unsafe { free(p.as_ptr(), false) };
        let after = get_stats();
        assert_eq!(after.current_usage, before.current_usage);
        assert_eq!(get_available(), u64::MAX);
        assert!(std::ptr::eq(get_runtime_config(), memory().runtime()));
    }
}
