/*
 * validate.rs
 *
 * Read-only views of the heap: consistency check, block walk, stats, dump.
 * Nothing here mutates the arena or tries to repair it.
 */

use core::fmt;

use log::warn;

use crate::align::{MIN_PAYLOAD, is_aligned};
use crate::block::{Arena, BlockInfo, HEADER_SIZE};
use crate::error::{HeapError, Result};
use crate::free_list_allocator::FreeListAllocator;

/// Aggregate view of the heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Headers plus payload of allocated blocks.
    pub used_bytes: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    /// Payload of the largest free block, the biggest request that can
    /// currently succeed.
    pub largest_free: usize,
}

/// Blocks in address order. Assumes a consistent heap, run `check` first when
/// in doubt.
pub struct Blocks {
    arena: Option<Arena>,
    offset: usize,
}

impl Iterator for Blocks {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let arena = self.arena?;
        if self.offset + HEADER_SIZE > arena.len() {
            return None;
        }
        let info = arena.info(self.offset);
        self.offset = arena.next_offset(self.offset);
        Some(info)
    }
}

impl FreeListAllocator {
    /// True when the block walk covers the arena exactly and the free list
    /// holds exactly the free blocks.
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`FreeListAllocator::validate`], naming the first problem found.
    pub fn check(&self) -> Result<()> {
        let Some(arena) = self.arena else {
            return Err(HeapError::Uninitialized);
        };

        let result = walk_blocks(arena).and_then(|walked| {
            let listed = walk_free_list(arena, self.free_head)?;
            if walked == listed {
                Ok(())
            } else {
                Err(HeapError::FreeCountMismatch { walked, listed })
            }
        });

        if let Err(err) = &result {
            warn!("heap check failed: {}", err);
        }
        result
    }

    pub fn blocks(&self) -> Blocks {
        Blocks {
            arena: self.arena,
            offset: 0,
        }
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks()
            .fold(HeapStats::default(), |mut stats, block| {
                if block.allocated {
                    stats.used_bytes += HEADER_SIZE + block.size;
                    stats.allocated_blocks += 1;
                } else {
                    stats.free_bytes += block.size;
                    stats.free_blocks += 1;
                    stats.largest_free = stats.largest_free.max(block.size);
                }
                stats
            })
    }

    /// Writes every block with its status and, for free blocks, its list
    /// neighbors, followed by the used byte total.
    pub fn dump<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let Some(arena) = self.arena else {
            return writeln!(out, "Heap is not initialized.");
        };

        writeln!(
            out,
            "Heap segment starts at {:#x}, ends at {:#x}.",
            arena.start_addr(),
            arena.end_addr()
        )?;

        for block in self.blocks() {
            writeln!(out, "Block at: {:#x}", block.addr)?;
            writeln!(out, "  size: {}", block.size)?;
            writeln!(
                out,
                "  allocated: {}",
                if block.allocated { "yes" } else { "no" }
            )?;
            if !block.allocated {
                let links = arena.links(block.offset);
                writeln!(out, "  prev free: {}", Neighbor(arena, links.prev()))?;
                writeln!(out, "  next free: {}", Neighbor(arena, links.next()))?;
            }
        }

        writeln!(out, "Memory used: {}", self.stats().used_bytes)?;
        writeln!(out, "Heap size: {}", arena.len() - HEADER_SIZE)
    }
}

impl fmt::Display for FreeListAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dump(f)
    }
}

impl fmt::Debug for FreeListAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("FreeListAllocator");
        match self.arena {
            Some(arena) => s
                .field("start", &format_args!("{:#x}", arena.start_addr()))
                .field("len", &arena.len())
                .field("free_head", &self.free_head)
                .finish(),
            None => s.field("arena", &"unbound").finish(),
        }
    }
}

struct Neighbor(Arena, Option<usize>);

impl fmt::Display for Neighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Some(offset) => write!(f, "{:#x}", self.0.start_addr() + offset),
            None => write!(f, "none"),
        }
    }
}

/* heap walk: every size aligned, last block ends exactly at the arena end */
fn walk_blocks(arena: Arena) -> Result<usize> {
    let end = arena.len();
    let mut offset = 0;
    let mut free = 0;

    while offset < end {
        if offset + HEADER_SIZE > end {
            return Err(HeapError::SpanOverrun { offset, end });
        }
        let header = arena.header(offset);
        let size = header.size();
        if !is_aligned(size) {
            return Err(HeapError::MisalignedBlock { offset, size });
        }

        let next = offset
            .checked_add(HEADER_SIZE)
            .and_then(|o| o.checked_add(size))
            .filter(|next| *next <= end)
            .ok_or(HeapError::SpanOverrun { offset, end })?;

        if !header.is_allocated() {
            free += 1;
        }
        offset = next;
    }

    Ok(free)
}

/* free list walk: every node in range and free, no more nodes than can exist */
fn walk_free_list(arena: Arena, head: Option<usize>) -> Result<usize> {
    let max_nodes = arena.len() / (HEADER_SIZE + MIN_PAYLOAD);
    let mut cursor = head;
    let mut count = 0;

    while let Some(offset) = cursor {
        let in_range = is_aligned(offset) && offset + HEADER_SIZE + MIN_PAYLOAD <= arena.len();
        if !in_range || arena.header(offset).is_allocated() || count >= max_nodes {
            return Err(HeapError::CorruptFreeList { offset });
        }
        count += 1;
        cursor = arena.links(offset).next();
    }

    Ok(count)
}
