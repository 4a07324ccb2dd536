use core::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::align::{ALIGNMENT, align_down, align_up, request_size};
use crate::block::{Arena, FreeLinks, HEADER_SIZE, Header, MIN_REGION, SPLIT_THRESHOLD};
use crate::error::{HeapError, Result};

// Headers are inlined into the region, free-list links live in the payload of
// free blocks. Everything is addressed by offset from the arena start.
// Best-fit over an unordered free list, blocks are split when the leftover can
// host another block and merged with free neighbors on release.
pub struct FreeListAllocator {
    pub(crate) arena: Option<Arena>,
    pub(crate) free_head: Option<usize>,
}

// SAFETY: the allocator exclusively owns its region; moving it to another
// thread moves that ownership along with it.
unsafe impl Send for FreeListAllocator {}

impl Default for FreeListAllocator {
    fn default() -> Self {
        Self::empty()
    }
}

impl FreeListAllocator {
    /// An allocator with no region bound. Every allocation fails until
    /// `init` succeeds.
    pub const fn empty() -> Self {
        FreeListAllocator {
            arena: None,
            free_head: None,
        }
    }

    /// Creates an allocator managing `size` bytes at `start`.
    ///
    /// # Safety
    ///
    /// See [`FreeListAllocator::init`].
    pub unsafe fn new(start: *mut u8, size: usize) -> Result<Self> {
        let mut allocator = Self::empty();
        // SAFETY: forwarded to the caller.
        unsafe { allocator.init(start, size)? };
        Ok(allocator)
    }

    /// Binds the allocator to `size` bytes at `start`, turning the whole
    /// region into a single free block. Any previous region is forgotten.
    ///
    /// A misaligned `start` is rounded up to `ALIGNMENT` and the usable size
    /// rounded down to a multiple of it.
    ///
    /// # Safety
    ///
    /// `start` must be valid for reads and writes of `size` bytes, must not be
    /// used by anything else, and must outlive every use of this allocator.
    /// Pointers handed out before a re-init must not be used afterwards.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) -> Result<()> {
        let too_small = HeapError::RegionTooSmall {
            size,
            min: MIN_REGION,
        };
        if size < MIN_REGION {
            return Err(too_small);
        }
        let Some(raw) = NonNull::new(start) else {
            return Err(HeapError::NullRegion);
        };

        let addr = raw.as_ptr().addr();
        let skew = align_up(addr).ok_or(too_small)? - addr;
        let usable = size
            .checked_sub(skew)
            .map(align_down)
            .filter(|usable| *usable >= MIN_REGION)
            .ok_or(too_small)?;

        // SAFETY: skew < ALIGNMENT and skew + usable <= size, so the aligned
        // start stays inside the caller's region.
        let arena = unsafe { Arena::new(raw.add(skew), usable) };
        arena.set_header(0, Header::new(usable - HEADER_SIZE, false));
        arena.set_links(0, FreeLinks::new(None, None));

        if let Some(old) = self.arena {
            debug!(
                "re-binding heap, discarding region {:#x}..{:#x}",
                old.start_addr(),
                old.end_addr()
            );
        }
        self.arena = Some(arena);
        self.free_head = Some(0);

        debug!(
            "heap bound to {:#x}..{:#x} ({} usable bytes)",
            arena.start_addr(),
            arena.end_addr(),
            usable
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    /// Bytes of the managed region, headers included.
    pub fn capacity(&self) -> usize {
        self.arena.map_or(0, |arena| arena.len())
    }

    /// Whether `ptr` points into the managed region.
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.arena.is_some_and(|arena| {
            let addr = ptr.addr();
            addr >= arena.start_addr() && addr < arena.end_addr()
        })
    }

    /// Payload bytes available behind a live allocation.
    pub fn usable_size(&self, ptr: *mut u8) -> Option<usize> {
        let arena = self.arena?;
        let offset = live_block(arena, ptr)?;
        Some(arena.header(offset).size())
    }

    /// Reserves at least `size` bytes, 8-aligned.
    ///
    /// Returns `None` for a zero-sized request or when no free block is large
    /// enough; the heap is left untouched in both cases.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let arena = self.arena?;
        let needed = request_size(size)?;

        let Some(block) = self.find_best_fit(arena, needed) else {
            trace!("allocate({}) -> out of memory", size);
            return None;
        };

        self.unlink_free(arena, block);
        let header = arena.header(block);
        arena.set_header(block, Header::new(header.size(), true));
        self.split_if_possible(arena, block, needed);

        let ptr = arena.payload(block);
        trace!(
            "allocate({}) -> {:p} (block of {} bytes)",
            size,
            ptr,
            arena.header(block).size()
        );
        Some(ptr)
    }

    /// Returns a block to the free list and merges it with free neighbors.
    ///
    /// Null is ignored. Pointers that are not live allocations of this heap
    /// are ignored with a warning when they can be recognized as such.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator that has not
    /// been released since.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(arena) = self.arena else {
            warn!("deallocate({:p}) -> heap not initialized, ignored", ptr);
            return;
        };
        let Some(offset) = live_block(arena, ptr) else {
            warn!("deallocate({:p}) -> not a live block of this heap, ignored", ptr);
            return;
        };

        self.release(arena, offset);
        trace!("deallocate({:p}) -> released", ptr);
    }

    /// Resizes an allocation, in place when the block or its free right
    /// neighbors allow it, otherwise by moving it.
    ///
    /// A null `ptr` allocates, a zero `new_size` deallocates and returns
    /// `None`. If a move is needed and no block is large enough, `None` is
    /// returned and the original allocation is left exactly as it was.
    ///
    /// # Safety
    ///
    /// Same contract as [`FreeListAllocator::deallocate`]. On success the old
    /// pointer must no longer be used unless it was returned again.
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            // SAFETY: forwarded to the caller.
            unsafe { self.deallocate(ptr) };
            return None;
        }

        let arena = self.arena?;
        let Some(offset) = live_block(arena, ptr) else {
            warn!("reallocate({:p}) -> not a live block of this heap", ptr);
            return None;
        };
        let needed = request_size(new_size)?;
        let old_size = arena.header(offset).size();

        if old_size >= needed {
            self.shrink_in_place(arena, offset, needed);
            trace!("reallocate({:p}) {} -> {} SHRINK in place", ptr, old_size, new_size);
            return Some(arena.payload(offset));
        }

        if can_grow_in_place(arena, offset, needed) {
            while arena.header(offset).size() < needed {
                if !self.absorb_right(arena, offset) {
                    break;
                }
            }
            self.shrink_in_place(arena, offset, needed);
            trace!("reallocate({:p}) {} -> {} GREW in place", ptr, old_size, new_size);
            return Some(arena.payload(offset));
        }

        let Some(new_ptr) = self.allocate(new_size) else {
            warn!(
                "reallocate({:p}) {} -> {} failed, original block kept",
                ptr, old_size, new_size
            );
            return None;
        };

        // SAFETY: both blocks are live, distinct and at least this long.
        unsafe { ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), old_size.min(new_size)) };
        self.release(arena, offset);

        trace!(
            "reallocate({:p}) {} -> {} COPIED to {:p}",
            ptr, old_size, new_size, new_ptr
        );
        Some(new_ptr)
    }

    /// Smallest free block that fits; the first one found wins a tie.
    fn find_best_fit(&self, arena: Arena, needed: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        let mut cursor = self.free_head;

        while let Some(offset) = cursor {
            let size = arena.header(offset).size();
            if size >= needed && best.is_none_or(|(_, best_size)| size < best_size) {
                best = Some((offset, size));
                // nothing can beat an exact fit
                if size == needed {
                    break;
                }
            }
            cursor = arena.links(offset).next();
        }

        best.map(|(offset, _)| offset)
    }

    /// Carves `needed` bytes off the front of the block, turning the rest into
    /// a free block at the head of the list. Returns the remainder's offset.
    fn split_if_possible(&mut self, arena: Arena, offset: usize, needed: usize) -> Option<usize> {
        let header = arena.header(offset);
        let leftover = header.size() - needed;
        if leftover < SPLIT_THRESHOLD {
            return None;
        }

        arena.set_header(offset, Header::new(needed, header.is_allocated()));
        let rest = offset + HEADER_SIZE + needed;
        arena.set_header(rest, Header::new(leftover - HEADER_SIZE, false));
        self.push_free(arena, rest);

        Some(rest)
    }

    fn shrink_in_place(&mut self, arena: Arena, offset: usize, needed: usize) {
        if let Some(rest) = self.split_if_possible(arena, offset, needed) {
            self.coalesce_right(arena, rest);
        }
    }

    /// Marks the block free, pushes it on the list and merges it with its
    /// free neighbors on both sides.
    fn release(&mut self, arena: Arena, offset: usize) {
        let header = arena.header(offset);
        arena.set_header(offset, Header::new(header.size(), false));
        self.push_free(arena, offset);
        self.coalesce_right(arena, offset);

        // The left neighbor merges through its own right pass.
        if let Some(left) = self.left_free_neighbor(arena, offset) {
            self.coalesce_right(arena, left);
        }
    }

    fn coalesce_right(&mut self, arena: Arena, offset: usize) {
        while self.absorb_right(arena, offset) {}
    }

    /// Folds the right neighbor into the block if the neighbor is free.
    fn absorb_right(&mut self, arena: Arena, offset: usize) -> bool {
        let right = arena.next_offset(offset);
        if right >= arena.len() {
            return false;
        }
        let neighbor = arena.header(right);
        if neighbor.is_allocated() {
            return false;
        }

        self.unlink_free(arena, right);
        let header = arena.header(offset);
        arena.set_header(
            offset,
            Header::new(
                header.size() + HEADER_SIZE + neighbor.size(),
                header.is_allocated(),
            ),
        );
        true
    }

    /// Free block whose right edge touches `offset`.
    fn left_free_neighbor(&self, arena: Arena, offset: usize) -> Option<usize> {
        let mut cursor = self.free_head;
        while let Some(candidate) = cursor {
            if arena.next_offset(candidate) == offset {
                return Some(candidate);
            }
            cursor = arena.links(candidate).next();
        }
        None
    }

    /// The block must already be marked free.
    fn push_free(&mut self, arena: Arena, offset: usize) {
        arena.set_links(offset, FreeLinks::new(None, self.free_head));
        if let Some(head) = self.free_head {
            let links = arena.links(head);
            arena.set_links(head, FreeLinks::new(Some(offset), links.next()));
        }
        self.free_head = Some(offset);
    }

    /// The block must still be marked free.
    fn unlink_free(&mut self, arena: Arena, offset: usize) {
        let links = arena.links(offset);

        match links.prev() {
            Some(prev) => {
                let prev_links = arena.links(prev);
                arena.set_links(prev, FreeLinks::new(prev_links.prev(), links.next()));
            }
            None => self.free_head = links.next(),
        }

        if let Some(next) = links.next() {
            let next_links = arena.links(next);
            arena.set_links(next, FreeLinks::new(links.prev(), next_links.next()));
        }
    }
}

/// Block offset behind `ptr` if it is a live allocation.
fn live_block(arena: Arena, ptr: *mut u8) -> Option<usize> {
    let offset = arena.block_of(ptr)?;
    arena.header(offset).is_allocated().then_some(offset)
}

/// Whether the free run right of the block brings it to `needed` bytes.
/// Read only.
fn can_grow_in_place(arena: Arena, offset: usize, needed: usize) -> bool {
    let mut size = arena.header(offset).size();
    let mut right = arena.next_offset(offset);

    while size < needed && right < arena.len() {
        let neighbor = arena.header(right);
        if neighbor.is_allocated() {
            break;
        }
        size += HEADER_SIZE + neighbor.size();
        right = arena.next_offset(right);
    }

    size >= needed
}

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

#[cfg(test)]
mod test {
    use super::*;
    use crate::align::MIN_PAYLOAD;

    #[repr(C, align(8))]
    struct Region<const N: usize>([u8; N]);

    impl<const N: usize> Region<N> {
        fn new() -> Self {
            Region([0; N])
        }

        fn allocator(&mut self) -> FreeListAllocator {
            unsafe { FreeListAllocator::new(self.0.as_mut_ptr(), N) }.unwrap()
        }
    }

    fn fill(ptr: NonNull<u8>, byte: u8, len: usize) {
        unsafe { ptr.as_ptr().write_bytes(byte, len) };
    }

    fn holds(ptr: NonNull<u8>, byte: u8, len: usize) -> bool {
        (0..len).all(|i| unsafe { *ptr.as_ptr().add(i) } == byte)
    }

    #[test]
    fn init_single_free_block() {
        let mut region = Region::<1024>::new();
        let allocator = region.allocator();

        assert_eq!(allocator.capacity(), 1024);
        assert_eq!(allocator.free_head, Some(0));
        let arena = allocator.arena.unwrap();
        assert_eq!(arena.header(0).size(), 1024 - HEADER_SIZE);
        assert!(!arena.header(0).is_allocated());
        assert!(allocator.validate());
    }

    #[test]
    fn init_too_small() {
        let mut region = Region::<64>::new();
        let mut allocator = FreeListAllocator::empty();

        let err = unsafe { allocator.init(region.0.as_mut_ptr(), 16) };
        assert_eq!(
            err,
            Err(HeapError::RegionTooSmall {
                size: 16,
                min: MIN_REGION
            })
        );
        assert!(!allocator.is_initialized());

        assert!(unsafe { allocator.init(region.0.as_mut_ptr(), MIN_REGION) }.is_ok());
        assert!(allocator.validate());
    }

    #[test]
    fn init_null() {
        let mut allocator = FreeListAllocator::empty();
        assert_eq!(
            unsafe { allocator.init(ptr::null_mut(), 4096) },
            Err(HeapError::NullRegion)
        );
    }

    #[test]
    fn init_trims_misaligned_region() {
        let mut region = Region::<256>::new();
        let mut allocator = FreeListAllocator::empty();

        let start = unsafe { region.0.as_mut_ptr().add(3) };
        unsafe { allocator.init(start, 200) }.unwrap();

        // 5 bytes lost to the skew, 195 rounded down to 192
        assert_eq!(allocator.capacity(), 192);
        let ptr = allocator.allocate(8).unwrap();
        assert_eq!(ptr.as_ptr().addr() % ALIGNMENT, 0);
        assert!(allocator.validate());
    }

    #[test]
    fn reinit_discards_state() {
        let mut region = Region::<512>::new();
        let mut allocator = region.allocator();

        allocator.allocate(100).unwrap();
        allocator.allocate(100).unwrap();
        unsafe { allocator.init(region.0.as_mut_ptr(), 512) }.unwrap();

        assert_eq!(allocator.stats().allocated_blocks, 0);
        assert_eq!(allocator.stats().free_blocks, 1);
        assert!(allocator.validate());
    }

    #[test]
    fn empty_allocator_refuses() {
        let mut allocator = FreeListAllocator::empty();
        assert!(allocator.allocate(8).is_none());
        unsafe { allocator.deallocate(0x1000 as *mut u8) };
        assert!(!allocator.validate());
    }

    #[test]
    fn alloc_chunks() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let chunk = allocator.allocate(16).unwrap();
        unsafe { allocator.deallocate(chunk.as_ptr()) };
        assert!(allocator.validate());

        let one = allocator.allocate(16).unwrap();
        let two = allocator.allocate(16).unwrap();
        let three = allocator.allocate(16).unwrap();
        assert_eq!(one, chunk);
        assert_eq!(two.as_ptr().addr(), one.as_ptr().addr() + 16 + HEADER_SIZE);
        assert_eq!(three.as_ptr().addr(), two.as_ptr().addr() + 16 + HEADER_SIZE);

        unsafe {
            allocator.deallocate(three.as_ptr());
            allocator.deallocate(one.as_ptr());
            allocator.deallocate(two.as_ptr());
        }
        assert!(allocator.validate());
        assert_eq!(allocator.stats().free_blocks, 1);
    }

    #[test]
    fn zero_size_is_none() {
        let mut region = Region::<256>::new();
        let mut allocator = region.allocator();

        assert!(allocator.allocate(0).is_none());
        assert_eq!(allocator.stats().free_blocks, 1);
        assert!(allocator.allocate(usize::MAX).is_none());
    }

    #[test]
    fn minimum_payload() {
        let mut region = Region::<256>::new();
        let mut allocator = region.allocator();

        let ptr = allocator.allocate(1).unwrap();
        assert_eq!(allocator.usable_size(ptr.as_ptr()), Some(MIN_PAYLOAD));
        let ptr = allocator.allocate(17).unwrap();
        assert_eq!(allocator.usable_size(ptr.as_ptr()), Some(24));
    }

    #[test]
    fn best_fit_prefers_smallest() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(128).unwrap();
        let _g1 = allocator.allocate(16).unwrap();
        let b = allocator.allocate(48).unwrap();
        let _g2 = allocator.allocate(16).unwrap();
        let c = allocator.allocate(64).unwrap();
        let _g3 = allocator.allocate(16).unwrap();

        unsafe {
            allocator.deallocate(a.as_ptr());
            allocator.deallocate(b.as_ptr());
            allocator.deallocate(c.as_ptr());
        }

        // 48 is the tightest fit for 40
        assert_eq!(allocator.allocate(40), Some(b));
        // 64 is now the tightest fit for 56
        assert_eq!(allocator.allocate(56), Some(c));
        assert_eq!(allocator.allocate(100), Some(a));
        assert!(allocator.validate());
    }

    #[test]
    fn best_fit_tie_takes_first_found() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(32).unwrap();
        let _g1 = allocator.allocate(16).unwrap();
        let b = allocator.allocate(32).unwrap();
        let _g2 = allocator.allocate(16).unwrap();

        unsafe {
            allocator.deallocate(a.as_ptr());
            allocator.deallocate(b.as_ptr());
        }

        // b was freed last so it sits at the head of the list
        assert_eq!(allocator.allocate(32), Some(b));
        assert_eq!(allocator.allocate(32), Some(a));
    }

    #[test]
    fn no_split_below_threshold() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(40).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        unsafe { allocator.deallocate(a.as_ptr()) };

        // leftover of 16 cannot host a block, so the whole 40 is handed out
        let b = allocator.allocate(24).unwrap();
        assert_eq!(a, b);
        assert_eq!(allocator.usable_size(b.as_ptr()), Some(40));
        assert!(allocator.validate());
    }

    #[test]
    fn out_of_memory_leaves_heap() {
        let mut region = Region::<256>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(100).unwrap();
        let before = allocator.stats();
        assert!(allocator.allocate(200).is_none());
        assert_eq!(allocator.stats(), before);
        unsafe { allocator.deallocate(a.as_ptr()) };
        assert!(allocator.allocate(200).is_some());
    }

    #[test]
    fn merge() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let one = allocator.allocate(2000).unwrap();
        unsafe { allocator.deallocate(one.as_ptr()) };

        let two = allocator.allocate(3080).unwrap();
        assert_eq!(one, two);
        assert!(allocator.validate());
    }

    #[test]
    fn merge_left_neighbor() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(64).unwrap();
        let b = allocator.allocate(64).unwrap();
        let _guard = allocator.allocate(64).unwrap();

        unsafe {
            allocator.deallocate(a.as_ptr());
            allocator.deallocate(b.as_ptr());
        }

        let blocks: std::vec::Vec<_> = allocator.blocks().collect();
        assert_eq!(blocks[0].size, 64 + HEADER_SIZE + 64);
        assert!(!blocks[0].allocated);
        assert!(allocator.validate());
    }

    #[test]
    fn double_free_ignored() {
        let mut region = Region::<512>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(32).unwrap();
        let _b = allocator.allocate(32).unwrap();
        unsafe {
            allocator.deallocate(a.as_ptr());
            allocator.deallocate(a.as_ptr());
        }
        assert!(allocator.validate());
    }

    #[test]
    fn foreign_pointer_ignored() {
        let mut region = Region::<512>::new();
        let mut allocator = region.allocator();
        let mut elsewhere = [0u64; 4];

        let _a = allocator.allocate(32).unwrap();
        unsafe { allocator.deallocate(elsewhere.as_mut_ptr().cast()) };
        assert!(
            unsafe { allocator.reallocate(elsewhere.as_mut_ptr().cast(), 64) }.is_none()
        );
        assert!(allocator.validate());
        assert!(!allocator.owns(elsewhere.as_ptr().cast()));
    }

    #[test]
    fn realloc_shrink_in_place() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(256).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        fill(a, 0xAB, 256);

        let b = unsafe { allocator.reallocate(a.as_ptr(), 64) }.unwrap();
        assert_eq!(a, b);
        assert!(holds(b, 0xAB, 64));
        assert_eq!(allocator.usable_size(b.as_ptr()), Some(64));
        assert!(allocator.validate());
    }

    #[test]
    fn realloc_grow_in_place() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(64).unwrap();
        let b = allocator.allocate(64).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        fill(a, 3, 64);
        unsafe { allocator.deallocate(b.as_ptr()) };

        let c = unsafe { allocator.reallocate(a.as_ptr(), 128) }.unwrap();
        assert_eq!(a, c);
        assert!(holds(c, 3, 64));
        assert!(allocator.validate());
    }

    #[test]
    fn realloc_moves_when_blocked() {
        let mut region = Region::<4096>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(64).unwrap();
        let _b = allocator.allocate(256).unwrap();
        fill(a, 5, 64);

        let c = unsafe { allocator.reallocate(a.as_ptr(), 128) }.unwrap();
        assert_ne!(a, c);
        assert!(holds(c, 5, 64));
        assert!(allocator.validate());
    }

    #[test]
    fn realloc_failure_keeps_block() {
        let mut region = Region::<512>::new();
        let mut allocator = region.allocator();

        let a = allocator.allocate(128).unwrap();
        let _b = allocator.allocate(128).unwrap();
        fill(a, 9, 128);
        let before = allocator.stats();

        assert!(unsafe { allocator.reallocate(a.as_ptr(), 1024) }.is_none());
        assert_eq!(allocator.stats(), before);
        assert_eq!(allocator.usable_size(a.as_ptr()), Some(128));
        assert!(holds(a, 9, 128));
        assert!(allocator.validate());
    }

    #[test]
    fn realloc_null_and_zero() {
        let mut region = Region::<512>::new();
        let mut allocator = region.allocator();

        let a = unsafe { allocator.reallocate(ptr::null_mut(), 64) }.unwrap();
        assert!(unsafe { allocator.reallocate(a.as_ptr(), 0) }.is_none());
        assert_eq!(allocator.stats().allocated_blocks, 0);
        assert!(allocator.validate());
    }
}
