//! The system allocator seam.
//!
//! Engines never call libc directly; they go through a [`RawAllocator`] so a
//! test can substitute a backend that fails on demand.

#![allow(unsafe_code)]

use std::ptr;

/// Four raw primitives: allocate, zero-allocate, resize, release.
///
/// # Safety
///
/// Implementations must return either null or a pointer to at least `size`
/// bytes aligned to [`layout::MAX_ALIGN`](memlayer_policy::layout::MAX_ALIGN),
/// and `release`/`resize` must accept every non-null pointer previously
/// returned by this allocator.
pub unsafe trait RawAllocator {
    fn allocate(&self, size: usize) -> *mut u8;
    fn allocate_zeroed(&self, size: usize) -> *mut u8;

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this allocator. On success
    /// the old pointer is invalidated; on failure (null) it stays valid.
    unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this allocator.
    unsafe fn release(&self, ptr: *mut u8);
}

/// libc `malloc`/`calloc`/`realloc`/`free`.
///
/// Zero-byte requests are rounded up to one byte so a null result always
/// means exhaustion.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcBackend;

// SAFETY: libc's allocator returns memory suitably aligned for any fundamental
// type (at least MAX_ALIGN) and accepts its own pointers in realloc/free.
unsafe impl RawAllocator for LibcBackend {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size.max(1)).cast() }
    }

    fn allocate_zeroed(&self, size: usize) -> *mut u8 {
        // SAFETY: calloc has no preconditions.
        unsafe { libc::calloc(1, size.max(1)).cast() }
    }

    unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr` is null or came from this allocator.
        unsafe { libc::realloc(ptr.cast(), size.max(1)).cast() }
    }

    unsafe fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: caller guarantees `ptr` came from this allocator and is live.
        unsafe { libc::free(ptr.cast()) }
    }
}

/// Backend that refuses every request. Useful for exercising failure paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExhaustedBackend;

// SAFETY: never hands out memory, so there is nothing to release.
unsafe impl RawAllocator for ExhaustedBackend {
    fn allocate(&self, _size: usize) -> *mut u8 {
        ptr::null_mut()
    }

    fn allocate_zeroed(&self, _size: usize) -> *mut u8 {
        ptr::null_mut()
    }

    unsafe fn resize(&self, _ptr: *mut u8, _size: usize) -> *mut u8 {
        ptr::null_mut()
    }

    unsafe fn release(&self, _ptr: *mut u8) {}
}
