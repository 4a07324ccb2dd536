use core::ptr::NonNull;

use crate::align::{ALIGNMENT, MIN_PAYLOAD, is_aligned};

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = size_of::<Header>();

/// A free block is only split when the leftover can host a header plus a
/// minimal payload.
pub const SPLIT_THRESHOLD: usize = HEADER_SIZE * 3;

/// Smallest region `init` accepts.
pub const MIN_REGION: usize = ALIGNMENT * 3;

const ALLOCATED_BIT: u64 = 1;
const NIL: usize = usize::MAX;

const _: () = {
    assert!(HEADER_SIZE == ALIGNMENT);
    assert!(HEADER_SIZE + MIN_PAYLOAD <= SPLIT_THRESHOLD);
    assert!(MIN_REGION >= HEADER_SIZE + MIN_PAYLOAD);
    assert!(size_of::<FreeLinks>() <= MIN_PAYLOAD);
};

/// Inline block metadata.
/// Sizes are always multiples of `ALIGNMENT`, so the low bit of the word
/// holds the allocated flag. Use the accessors, never the raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct Header(u64);

impl Header {
    pub fn new(size: usize, allocated: bool) -> Header {
        debug_assert!(is_aligned(size), "block size {size} is not aligned");
        Header(size as u64 | allocated as u64)
    }

    pub fn size(&self) -> usize {
        (self.0 & !ALLOCATED_BIT) as usize
    }

    pub fn is_allocated(&self) -> bool {
        self.0 & ALLOCATED_BIT == ALLOCATED_BIT
    }
}

/// Free-list links of an unallocated block, as arena offsets.
/// Stored in the first bytes of the block's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FreeLinks {
    prev: usize,
    next: usize,
}

impl FreeLinks {
    pub fn new(prev: Option<usize>, next: Option<usize>) -> FreeLinks {
        FreeLinks {
            prev: prev.unwrap_or(NIL),
            next: next.unwrap_or(NIL),
        }
    }

    pub fn prev(&self) -> Option<usize> {
        (self.prev != NIL).then_some(self.prev)
    }

    pub fn next(&self) -> Option<usize> {
        (self.next != NIL).then_some(self.next)
    }
}

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header from the arena start.
    pub offset: usize,
    /// Address of the header.
    pub addr: usize,
    /// Payload bytes.
    pub size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    /// Address handed out for this block.
    pub fn payload_addr(&self) -> usize {
        self.addr + HEADER_SIZE
    }

    /// Address one past the end of this block.
    pub fn end_addr(&self) -> usize {
        self.payload_addr() + self.size
    }
}

/// The managed region, addressed by offsets.
///
/// All reads and writes of metadata go through here so that no reference to
/// the region is ever formed: callers hold raw pointers into the payloads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arena {
    start: NonNull<u8>,
    len: usize,
}

impl Arena {
    /// # Safety
    ///
    /// `start` must be 8-aligned and valid for reads and writes of `len`
    /// bytes for as long as the arena is used.
    pub unsafe fn new(start: NonNull<u8>, len: usize) -> Arena {
        debug_assert!(is_aligned(start.as_ptr().addr()));
        debug_assert!(is_aligned(len));
        Arena { start, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn start_addr(&self) -> usize {
        self.start.as_ptr().addr()
    }

    pub fn end_addr(&self) -> usize {
        self.start_addr() + self.len
    }

    pub fn header(&self, offset: usize) -> Header {
        debug_assert!(offset + HEADER_SIZE <= self.len);
        // SAFETY: offset is a block boundary inside the arena, and block
        // boundaries are 8-aligned.
        unsafe { self.start.as_ptr().add(offset).cast::<Header>().read() }
    }

    pub fn set_header(&self, offset: usize, header: Header) {
        debug_assert!(offset + HEADER_SIZE <= self.len);
        // SAFETY: as in `header`.
        unsafe {
            self.start
                .as_ptr()
                .add(offset)
                .cast::<Header>()
                .write(header)
        }
    }

    pub fn links(&self, offset: usize) -> FreeLinks {
        debug_assert!(!self.header(offset).is_allocated());
        debug_assert!(offset + HEADER_SIZE + MIN_PAYLOAD <= self.len);
        // SAFETY: free blocks own at least MIN_PAYLOAD payload bytes, which
        // start 8-aligned right after the header.
        unsafe { self.payload(offset).as_ptr().cast::<FreeLinks>().read() }
    }

    pub fn set_links(&self, offset: usize, links: FreeLinks) {
        debug_assert!(!self.header(offset).is_allocated());
        debug_assert!(offset + HEADER_SIZE + MIN_PAYLOAD <= self.len);
        // SAFETY: as in `links`.
        unsafe { self.payload(offset).as_ptr().cast::<FreeLinks>().write(links) }
    }

    pub fn payload(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: offset + HEADER_SIZE stays inside the region for any block.
        unsafe { self.start.add(offset + HEADER_SIZE) }
    }

    /// Offset right after the block at `offset`. Equals `len` for the last
    /// block.
    pub fn next_offset(&self, offset: usize) -> usize {
        offset + HEADER_SIZE + self.header(offset).size()
    }

    /// Block offset of a payload pointer, if it could be one of ours.
    pub fn block_of(&self, ptr: *mut u8) -> Option<usize> {
        let offset = ptr
            .addr()
            .checked_sub(self.start_addr())?
            .checked_sub(HEADER_SIZE)?;
        if !is_aligned(offset) || offset + HEADER_SIZE + MIN_PAYLOAD > self.len {
            return None;
        }
        Some(offset)
    }

    pub fn info(&self, offset: usize) -> BlockInfo {
        let header = self.header(offset);
        BlockInfo {
            offset,
            addr: self.start_addr() + offset,
            size: header.size(),
            allocated: header.is_allocated(),
        }
    }
}
