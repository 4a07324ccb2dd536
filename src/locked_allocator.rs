use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::align::ALIGNMENT;
use crate::error::Result;
use crate::free_list_allocator::FreeListAllocator;

/// A spin locked free-list allocator, usable as the global allocator.
///
/// The lock guards the whole allocator state; every operation holds it for
/// its full duration.
pub struct LockedAllocator(spin::Mutex<FreeListAllocator>);

impl Default for LockedAllocator {
    fn default() -> Self {
        Self::empty()
    }
}

impl LockedAllocator {
    /// Creates a locked allocator without a region, which returns null on
    /// every allocation request until `init` is called.
    pub const fn empty() -> Self {
        Self(spin::Mutex::new(FreeListAllocator::empty()))
    }

    /// Binds the allocator to a region, discarding any previous one.
    ///
    /// # Safety
    ///
    /// See [`FreeListAllocator::init`].
    pub unsafe fn init(&self, start: *mut u8, size: usize) -> Result<()> {
        // SAFETY: forwarded to the caller.
        unsafe { self.0.lock().init(start, size) }
    }

    /// Direct access to the allocator, e.g. to validate or dump it.
    pub fn lock(&self) -> spin::MutexGuard<'_, FreeListAllocator> {
        self.0.lock()
    }
}

// SAFETY: all state sits behind the mutex. Blocks never overlap and payloads
// are ALIGNMENT-aligned, larger alignments are refused with null.
unsafe impl GlobalAlloc for LockedAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.0
            .lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        // SAFETY: forwarded to the caller.
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() {
            // SAFETY: the block just handed out holds at least `size` bytes.
            unsafe { ptr.write_bytes(0, size) };
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: the caller passes a pointer from `alloc` on this allocator.
        unsafe { self.0.lock().deallocate(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        // SAFETY: as in `dealloc`; GlobalAlloc forbids a zero new_size.
        unsafe { self.0.lock().reallocate(ptr, new_size) }
            .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
    }
}
