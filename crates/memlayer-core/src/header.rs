//! Hidden block metadata.
//!
//! This is the only module that performs pointer arithmetic on user
//! pointers. Two encodings exist:
//!
//! - **Padded blocks** carry a [`BlockHeader`] of `DATA_OFFSET` bytes in front
//!   of the user pointer, holding the requested size and an element count.
//! - **Aligned blocks** store a `u32` offset in the 4 bytes just before the
//!   aligned user pointer, pointing back at the raw allocation start.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use memlayer_policy::MemoryError;
use memlayer_policy::layout::{DATA_OFFSET, ELEMENT_OFFSET, SIZE_OFFSET};

use crate::raw::RawAllocator;

/// Accessor over the header in front of a padded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    base: NonNull<u8>,
}

impl BlockHeader {
    /// # Safety
    ///
    /// `base` must point to at least `DATA_OFFSET` writable bytes that stay
    /// live for as long as the accessor is used.
    pub(crate) unsafe fn from_base(base: NonNull<u8>) -> Self {
        Self { base }
    }

    /// # Safety
    ///
    /// `user` must have been returned by a padded allocation that is still live.
    pub(crate) unsafe fn from_user(user: NonNull<u8>) -> Self {
        // SAFETY: padded user pointers sit exactly DATA_OFFSET bytes past the
        // start of the same allocation.
        let base = unsafe { user.sub(DATA_OFFSET) };
        Self { base }
    }

    /// Start of the raw allocation.
    pub(crate) fn base(self) -> NonNull<u8> {
        self.base
    }

    /// Pointer handed to the caller.
    pub(crate) fn user(self) -> NonNull<u8> {
        // SAFETY: the allocation spans at least DATA_OFFSET bytes.
        unsafe { self.base.add(DATA_OFFSET) }
    }

    pub(crate) fn size(self) -> u64 {
        self.read(SIZE_OFFSET)
    }

    pub(crate) fn set_size(self, size: u64) {
        self.write(SIZE_OFFSET, size);
    }

    pub(crate) fn element_count(self) -> u64 {
        self.read(ELEMENT_OFFSET)
    }

    pub(crate) fn set_element_count(self, count: u64) {
        self.write(ELEMENT_OFFSET, count);
    }

    /// Write a fresh header and return the user pointer.
    pub(crate) fn init(self, size: u64) -> NonNull<u8> {
        self.set_size(size);
        self.set_element_count(0);
        self.user()
    }

    fn read(self, offset: usize) -> u64 {
        // SAFETY: offset + 8 <= DATA_OFFSET, inside the header region.
        unsafe { self.base.add(offset).cast::<u64>().read_unaligned() }
    }

    fn write(self, offset: usize, value: u64) {
        // SAFETY: offset + 8 <= DATA_OFFSET, inside the header region.
        unsafe { self.base.add(offset).cast::<u64>().write_unaligned(value) }
    }
}

/// Bytes of the aligned-block back offset.
pub(crate) const ALIGN_PREFIX: usize = core::mem::size_of::<u32>();

/// Largest alignment whose back offset still fits in the prefix.
pub const MAX_ALIGNMENT: usize = 1 << 31;

/// Power of two, no larger than [`MAX_ALIGNMENT`].
pub(crate) fn check_alignment(alignment: usize) -> Result<(), MemoryError> {
    if alignment.is_power_of_two() && alignment <= MAX_ALIGNMENT {
        Ok(())
    } else {
        Err(MemoryError::InvalidAlignment {
            alignment,
            max: MAX_ALIGNMENT,
        })
    }
}

/// Raw bytes needed so an aligned block of `bytes` fits behind its prefix.
fn aligned_request(bytes: usize, alignment: usize) -> Option<usize> {
    bytes.checked_add(alignment - 1)?.checked_add(ALIGN_PREFIX)
}

/// Allocate `bytes` aligned to `alignment` and record the back offset.
pub(crate) fn allocate_aligned<B: RawAllocator>(
    backend: &B,
    bytes: usize,
    alignment: usize,
) -> Result<NonNull<u8>, MemoryError> {
    check_alignment(alignment)?;
    let total =
        aligned_request(bytes, alignment).ok_or(MemoryError::OutOfMemory { requested: bytes })?;
    let raw = NonNull::new(backend.allocate(total))
        .ok_or(MemoryError::OutOfMemory { requested: bytes })?;
    // SAFETY: `raw` spans `total` bytes, enough for the prefix, the worst-case
    // skip and `bytes` of payload.
    Ok(unsafe { place_aligned(raw, alignment) })
}

/// # Safety
///
/// `raw` must span at least `aligned_request(bytes, alignment)` bytes and
/// `alignment` must be a valid power of two.
unsafe fn place_aligned(raw: NonNull<u8>, alignment: usize) -> NonNull<u8> {
    let start = raw.as_ptr() as usize;
    let aligned = (start + ALIGN_PREFIX + alignment - 1) & !(alignment - 1);
    let offset = aligned - start;
    debug_assert!(offset >= ALIGN_PREFIX && offset < alignment + ALIGN_PREFIX);
    // SAFETY: offset < alignment + ALIGN_PREFIX keeps `user` and the prefix
    // in front of it within the raw allocation.
    unsafe {
        let user = raw.add(offset);
        user.sub(ALIGN_PREFIX)
            .cast::<u32>()
            .write_unaligned(offset as u32);
        user
    }
}

/// Start of the raw allocation behind an aligned user pointer.
///
/// # Safety
///
/// `user` must have been returned by [`allocate_aligned`] and still be live.
pub(crate) unsafe fn aligned_base(user: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: the prefix written by `place_aligned` precedes `user`, and the
    // offset it records leads back to the start of the same allocation.
    unsafe {
        let offset = user.sub(ALIGN_PREFIX).cast::<u32>().read_unaligned();
        user.sub(offset as usize)
    }
}

/// Release an aligned block.
///
/// # Safety
///
/// Same as [`aligned_base`]; `backend` must be the allocator that produced it.
pub(crate) unsafe fn release_aligned<B: RawAllocator>(backend: &B, user: NonNull<u8>) {
    // SAFETY: forwarded caller contract.
    unsafe { backend.release(aligned_base(user).as_ptr()) }
}

/// Move an aligned block into a fresh aligned allocation, copying
/// `min(prev_bytes, new_bytes)` bytes, then release the old one.
///
/// On failure the old block is left untouched.
///
/// # Safety
///
/// `user` must be a live aligned block of at least `prev_bytes` bytes from `backend`.
pub(crate) unsafe fn reallocate_aligned<B: RawAllocator>(
    backend: &B,
    user: NonNull<u8>,
    new_bytes: usize,
    prev_bytes: usize,
    alignment: usize,
) -> Result<NonNull<u8>, MemoryError> {
    let fresh = allocate_aligned(backend, new_bytes, alignment)?;
    // SAFETY: both blocks are live, distinct and at least `min(..)` bytes long.
    unsafe {
        std::ptr::copy_nonoverlapping(user.as_ptr(), fresh.as_ptr(), prev_bytes.min(new_bytes));
        release_aligned(backend, user);
    }
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{ExhaustedBackend, LibcBackend};

    #[test]
    fn header_round_trip() {
        let backend = LibcBackend;
        let raw = NonNull::new(backend.allocate(DATA_OFFSET + 8)).expect("allocation should succeed");
        // SAFETY: `raw` spans DATA_OFFSET + 8 bytes.
        let header = unsafe { BlockHeader::from_base(raw) };
        let user = header.init(8);
        assert_eq!(user.as_ptr() as usize - raw.as_ptr() as usize, DATA_OFFSET);
        header.set_element_count(3);
        // SAFETY: `user` came from a padded layout above.
        let again = unsafe { BlockHeader::from_user(user) };
        assert_eq!(again, header);
        assert_eq!(again.size(), 8);
        assert_eq!(again.element_count(), 3);
        // SAFETY: base came from this backend.
        unsafe { backend.release(again.base().as_ptr()) };
    }

    #[test]
    fn aligned_offsets_stay_in_range() {
        let backend = LibcBackend;
        let mut alignment = 1;
        while alignment <= 8192 {
            let user = allocate_aligned(&backend, 37, alignment).expect("allocation should succeed");
            assert_eq!(user.as_ptr() as usize % alignment, 0);
            // SAFETY: `user` is a live aligned block.
            let base = unsafe { aligned_base(user) };
            let offset = user.as_ptr() as usize - base.as_ptr() as usize;
            assert!(offset >= ALIGN_PREFIX, "alignment {alignment}");
            assert!(offset < alignment + ALIGN_PREFIX, "alignment {alignment}");
            // SAFETY: `user` is live and from `backend`.
            unsafe { release_aligned(&backend, user) };
            alignment <<= 1;
        }
    }

    #[test]
    fn invalid_alignments_rejected() {
        for bad in [0, 3, 12, 100] {
            assert!(matches!(
                check_alignment(bad),
                Err(MemoryError::InvalidAlignment { .. })
            ));
        }
        assert!(check_alignment(MAX_ALIGNMENT << 1).is_err());
        assert!(aligned_request(usize::MAX, 16).is_none());
    }

    #[test]
    fn reallocate_aligned_preserves_prefix_bytes() {
        let backend = LibcBackend;
        let user = allocate_aligned(&backend, 16, 64).expect("allocation should succeed");
        // SAFETY: 16 live bytes.
        unsafe { user.as_ptr().copy_from_nonoverlapping(b"0123456789abcdef".as_ptr(), 16) };
        // SAFETY: `user` is a live 16-byte aligned block.
        let grown = unsafe { reallocate_aligned(&backend, user, 256, 16, 128) }
            .expect("reallocation should succeed");
        assert_eq!(grown.as_ptr() as usize % 128, 0);
        // SAFETY: first 16 bytes were copied.
        let copied = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 16) };
        assert_eq!(copied, b"0123456789abcdef");
        // SAFETY: `grown` is live.
        let shrunk = unsafe { reallocate_aligned(&backend, grown, 4, 256, 8) }
            .expect("reallocation should succeed");
        // SAFETY: 4 copied bytes.
        assert_eq!(unsafe { std::slice::from_raw_parts(shrunk.as_ptr(), 4) }, b"0123");
        // SAFETY: `shrunk` is live.
        unsafe { release_aligned(&backend, shrunk) };
    }

    #[test]
    fn exhausted_backend_reports_out_of_memory() {
        assert_eq!(
            allocate_aligned(&ExhaustedBackend, 10, 16),
            Err(MemoryError::OutOfMemory { requested: 10 })
        );
    }
}
