//! Trust-the-caller allocation path.
//!
//! [`FastManager`] mirrors the [`MemoryManager`](crate::MemoryManager)
//! operation names but writes no header, tracks nothing and reports nothing.
//! Failures surface only as `None`.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use memlayer_policy::{LeakReport, MemoryStats, TrackingLevel};

use crate::header;
use crate::raw::{LibcBackend, RawAllocator};

#[derive(Debug, Default, Clone, Copy)]
pub struct FastManager<B: RawAllocator = LibcBackend> {
    backend: B,
}

impl FastManager<LibcBackend> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            backend: LibcBackend,
        }
    }
}

impl<B: RawAllocator> FastManager<B> {
    #[must_use]
    pub const fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    #[inline]
    pub fn alloc(&self, bytes: usize, _pad_align: bool) -> Option<NonNull<u8>> {
        NonNull::new(self.backend.allocate(bytes))
    }

    #[inline]
    pub fn alloc_zeroed(&self, bytes: usize, _pad_align: bool) -> Option<NonNull<u8>> {
        NonNull::new(self.backend.allocate_zeroed(bytes))
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live block from this manager's byte family.
    #[inline]
    pub unsafe fn realloc(
        &self,
        ptr: *mut u8,
        new_bytes: usize,
        _pad_align: bool,
    ) -> Option<NonNull<u8>> {
        if new_bytes == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.backend.release(ptr) };
            return None;
        }
        // SAFETY: forwarded caller contract.
        NonNull::new(unsafe { self.backend.resize(ptr, new_bytes) })
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live block from this manager's byte family.
    #[inline]
    pub unsafe fn free(&self, ptr: *mut u8, _pad_align: bool) {
        // SAFETY: forwarded caller contract.
        unsafe { self.backend.release(ptr) }
    }

    pub fn alloc_aligned(&self, bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        header::allocate_aligned(&self.backend, bytes, alignment).ok()
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live aligned block from this manager of at
    /// least `prev_bytes` bytes.
    pub unsafe fn realloc_aligned(
        &self,
        ptr: *mut u8,
        new_bytes: usize,
        prev_bytes: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let Some(user) = NonNull::new(ptr) else {
            return self.alloc_aligned(new_bytes, alignment);
        };
        if new_bytes == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { header::release_aligned(&self.backend, user) };
            return None;
        }
        // SAFETY: forwarded caller contract.
        unsafe { header::reallocate_aligned(&self.backend, user, new_bytes, prev_bytes, alignment) }
            .ok()
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live aligned block from this manager.
    pub unsafe fn free_aligned(&self, ptr: *mut u8) {
        if let Some(user) = NonNull::new(ptr) {
            // SAFETY: forwarded caller contract.
            unsafe { header::release_aligned(&self.backend, user) }
        }
    }

    #[must_use]
    pub fn usage(&self) -> u64 {
        0
    }

    #[must_use]
    pub fn peak_usage(&self) -> u64 {
        0
    }

    #[must_use]
    pub fn available(&self) -> u64 {
        u64::MAX
    }

    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        0
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats::default()
    }

    pub fn reset_stats(&self) {}

    #[must_use]
    pub fn dump_allocations(&self) -> LeakReport {
        LeakReport {
            level: TrackingLevel::Disabled,
            stats: MemoryStats::default(),
            leaks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::ExhaustedBackend;

    #[test]
    fn byte_blocks_round_trip() {
        let fast = FastManager::new();
        let p = fast.alloc_zeroed(32, true).expect("allocation should succeed");
        // SAFETY: 32 zeroed bytes, then a 64-byte resized block.
        unsafe {
            assert_eq!(*p.as_ptr().add(31), 0);
            p.as_ptr().write(9);
            let q = fast.realloc(p.as_ptr(), 64, true).expect("realloc should succeed");
            assert_eq!(*q.as_ptr(), 9);
            assert!(fast.realloc(q.as_ptr(), 0, true).is_none());
            fast.free(std::ptr::null_mut(), false);
        }
        assert_eq!(fast.stats(), MemoryStats::default());
        assert_eq!(fast.available(), u64::MAX);
    }

    #[test]
    fn aligned_blocks_and_silent_failures() {
        let fast = FastManager::new();
        let p = fast.alloc_aligned(100, 512).expect("aligned allocation should succeed");
        assert_eq!(p.as_ptr() as usize % 512, 0);
        // SAFETY: `p` is a live 100-byte aligned block.
        unsafe {
            let q = fast
                .realloc_aligned(p.as_ptr(), 10, 100, 32)
                .expect("aligned realloc should succeed");
            assert_eq!(q.as_ptr() as usize % 32, 0);
            fast.free_aligned(q.as_ptr());
            fast.free_aligned(std::ptr::null_mut());
        }
        assert!(fast.alloc_aligned(8, 3).is_none());

        let exhausted = FastManager::with_backend(ExhaustedBackend);
        assert!(exhausted.alloc(8, false).is_none());
        assert!(exhausted.alloc_aligned(8, 8).is_none());
        assert!(exhausted.dump_allocations().is_clean());
    }
}
