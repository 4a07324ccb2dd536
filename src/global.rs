/*
 * global.rs
 *
 * One process-wide heap behind free functions, for callers that want the
 * classic init/malloc/free/realloc surface instead of an allocator value.
 * Null pointers and `false` are the only failure signals here.
 */

use core::fmt;
use core::ptr;

use crate::locked_allocator::LockedAllocator;

static HEAP: LockedAllocator = LockedAllocator::empty();

/// Binds the process-wide heap to `size` bytes at `start`. Returns `false`,
/// leaving the heap as it was, if the region is null or too small.
///
/// # Safety
///
/// See [`crate::FreeListAllocator::init`]. Pointers from a previous region
/// must not be used after a successful call.
pub unsafe fn init(start: *mut u8, size: usize) -> bool {
    // SAFETY: forwarded to the caller.
    unsafe { HEAP.init(start, size) }.is_ok()
}

/// Null when `size` is zero, the heap is unbound, or nothing fits.
pub fn allocate(size: usize) -> *mut u8 {
    HEAP.lock()
        .allocate(size)
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// # Safety
///
/// `ptr` must be null or a live pointer from [`allocate`] / [`reallocate`].
pub unsafe fn deallocate(ptr: *mut u8) {
    // SAFETY: forwarded to the caller.
    unsafe { HEAP.lock().deallocate(ptr) }
}

/// # Safety
///
/// Same as [`deallocate`].
pub unsafe fn reallocate(ptr: *mut u8, new_size: usize) -> *mut u8 {
    // SAFETY: forwarded to the caller.
    unsafe { HEAP.lock().reallocate(ptr, new_size) }.map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

pub fn validate() -> bool {
    HEAP.lock().validate()
}

pub fn dump<W: fmt::Write>(out: &mut W) -> fmt::Result {
    HEAP.lock().dump(out)
}

/// The lock-guarded heap itself.
pub fn heap() -> &'static LockedAllocator {
    &HEAP
}
