//! Typed arrays with a recoverable element count.
//!
//! Arrays always carry the padded header, whatever the configuration's
//! padding policy says: the element count lives there so `array_len` and
//! `delete_array` can find it from the user pointer alone.

#![allow(unsafe_code)]

use std::fmt::Display;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use memlayer_policy::layout::MAX_ALIGN;
use memlayer_policy::{MemoryConfig, MemoryError, SourceLocation};

use crate::engine::MemoryManager;
use crate::header::BlockHeader;
use crate::raw::RawAllocator;

/// Destroys the initialized prefix and frees the block unless finished.
struct ArrayGuard<'a, T, C: MemoryConfig, B: RawAllocator> {
    engine: &'a MemoryManager<C, B>,
    ptr: NonNull<T>,
    initialized: usize,
    loc: SourceLocation,
}

impl<T, C: MemoryConfig, B: RawAllocator> ArrayGuard<'_, T, C, B> {
    fn finish(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<T, C: MemoryConfig, B: RawAllocator> Drop for ArrayGuard<'_, T, C, B> {
    fn drop(&mut self) {
        // SAFETY: exactly `initialized` leading elements were written, and the
        // block is a live padded allocation of this engine.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.initialized,
            ));
            let released = self.engine.release(self.ptr.cast(), true, &self.loc);
            self.engine.settle(released, &self.loc);
        }
    }
}

impl<C: MemoryConfig, B: RawAllocator> MemoryManager<C, B> {
    fn array_block<T>(
        &self,
        count: usize,
        zeroed: bool,
        loc: &SourceLocation,
    ) -> Result<NonNull<T>, MemoryError> {
        if mem::align_of::<T>() > MAX_ALIGN {
            return Err(MemoryError::Assertion(format!(
                "element alignment {} exceeds header alignment {MAX_ALIGN}",
                mem::align_of::<T>()
            )));
        }
        let bytes = count
            .checked_mul(mem::size_of::<T>())
            .ok_or(MemoryError::SizeOverflow {
                count,
                element_size: mem::size_of::<T>(),
            })?;
        let user = self.allocate(bytes, true, zeroed, loc)?;
        // SAFETY: `allocate` with padding returned a live padded block.
        unsafe { BlockHeader::from_user(user) }.set_element_count(count as u64);
        Ok(user.cast())
    }

    fn fill_array<T, E>(
        &self,
        count: usize,
        loc: SourceLocation,
        mut init: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<NonNull<T>, MemoryError>
    where
        E: Display,
    {
        let ptr = self.array_block::<T>(count, false, &loc)?;
        let mut guard = ArrayGuard {
            engine: self,
            ptr,
            initialized: 0,
            loc,
        };
        while guard.initialized < count {
            let value = init(guard.initialized)
                .map_err(|e| MemoryError::Construction(e.to_string()))?;
            // SAFETY: index < count, inside the block.
            unsafe { ptr.add(guard.initialized).write(value) };
            guard.initialized += 1;
        }
        Ok(guard.finish())
    }

    /// `count` default-constructed elements.
    #[track_caller]
    pub fn new_array<T: Default>(&self, count: usize) -> Option<NonNull<T>> {
        self.new_array_with(count, |_| T::default())
    }

    /// `count` elements built by `init(index)`. If `init` panics, the
    /// elements built so far are dropped and the block is freed.
    #[track_caller]
    pub fn new_array_with<T>(
        &self,
        count: usize,
        mut init: impl FnMut(usize) -> T,
    ) -> Option<NonNull<T>> {
        let loc = SourceLocation::caller("new_array");
        let result = self.fill_array(count, loc, |i| Ok::<_, std::convert::Infallible>(init(i)));
        self.settle(result, &loc)
    }

    /// Like [`new_array_with`](Self::new_array_with) with a fallible
    /// constructor. A constructor error is reported once as
    /// [`MemoryError::Construction`] and returned.
    #[track_caller]
    pub fn try_new_array_with<T, E: Display>(
        &self,
        count: usize,
        init: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<NonNull<T>, MemoryError> {
        let loc = SourceLocation::caller("new_array");
        self.fill_array(count, loc, init).inspect_err(|error| {
            self.reporter().report_error(error, &loc);
        })
    }

    /// Array storage left uninitialized.
    #[track_caller]
    pub fn new_array_uninit<T>(&self, count: usize) -> Option<NonNull<MaybeUninit<T>>> {
        let loc = SourceLocation::caller("new_array_uninit");
        self.settle(self.array_block(count, false, &loc), &loc)
    }

    /// Array storage filled with zero bytes.
    #[track_caller]
    pub fn new_array_zeroed<T>(&self, count: usize) -> Option<NonNull<MaybeUninit<T>>> {
        let loc = SourceLocation::caller("new_array_zeroed");
        self.settle(self.array_block(count, true, &loc), &loc)
    }

    /// Element count recorded when the array was created.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live array from this engine.
    pub unsafe fn array_len<T>(&self, ptr: NonNull<T>) -> usize {
        // SAFETY: arrays are always padded.
        unsafe { BlockHeader::from_user(ptr.cast()) }.element_count() as usize
    }

    /// Drop every element and free the array. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live array from this engine whose elements
    /// are all initialized.
    #[track_caller]
    pub unsafe fn delete_array<T>(&self, ptr: *mut T) {
        let Some(user) = NonNull::new(ptr) else {
            return;
        };
        let loc = SourceLocation::caller("delete_array");
        // SAFETY: forwarded caller contract.
        let count = unsafe { self.array_len(user) };
        if mem::needs_drop::<T>() {
            // SAFETY: `count` initialized elements start at `user`.
            unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr, count)) };
        }
        // SAFETY: arrays are padded blocks of this engine.
        let result = unsafe { self.release(user.cast(), true, &loc) };
        self.settle(result, &loc);
    }
}
