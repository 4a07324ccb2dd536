use core::ffi::c_void;
use core::ptr::{self, NonNull};

use lazy_static::lazy_static;
use libc::{self, mmap, munmap};
use log::debug;

lazy_static! {
    pub static ref PAGE_SIZE: usize = page_size();
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

/// An anonymous private mapping to hand to an allocator as its region.
///
/// The mapping is made once and never grown; it is unmapped on drop, so any
/// allocator bound to it must be dropped or re-bound first.
pub struct PageRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl PageRegion {
    /// Maps at least `size` bytes, rounded up to whole pages. Returns `None`
    /// for a zero size or when the kernel refuses the mapping.
    pub fn map(size: usize) -> Option<PageRegion> {
        if size == 0 {
            return None;
        }
        let page = *PAGE_SIZE;
        let len = size.checked_add(page - 1)? / page * page;

        // SAFETY: anonymous mapping at a kernel-chosen address, no fd involved.
        let addr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            debug!("mmap of {} bytes failed", len);
            return None;
        }

        debug!("mapped {} bytes at {:p}", len, addr);
        NonNull::new(addr.cast::<u8>()).map(|ptr| PageRegion { ptr, len })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for PageRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and len describe exactly the mapping made in `map`.
        unsafe { munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
    }
}

// SAFETY: the mapping is plain memory owned by this value alone.
unsafe impl Send for PageRegion {}
