//! # freelist - an explicit free-list heap over a fixed region
//!
//! The allocator manages one caller-provided region. It never asks the OS
//! for more memory.
//!
//! ```text
//!   ┌────────┬──────────────┬────────┬─────────────────┬────────┬──────────┐
//!   │ header │ payload      │ header │ prev | next ... │ header │ payload  │
//!   │ 32 | 1 │ (allocated)  │ 48 | 0 │ (free)          │ 16 | 1 │          │
//!   └────────┴──────────────┴────────┴─────────────────┴────────┴──────────┘
//!                                        ▲
//!                                        └── free-list links, as offsets
//! ```
//!
//! Every block starts with an 8 byte header packing the payload size and the
//! allocated flag. Free blocks are threaded on a doubly linked list whose
//! links live in their own payload. Allocation is best-fit with splitting,
//! deallocation merges with free neighbors on both sides.
//!
//! ## Crate Structure
//!
//! ```text
//!   freelist
//!   ├── align               - alignment constants and rounding
//!   ├── block               - header, free-list links, block info
//!   ├── free_list_allocator - FreeListAllocator: init/allocate/deallocate/reallocate
//!   ├── validate            - check, stats, block walk, dump
//!   ├── error               - HeapError
//!   ├── locked_allocator    - spin locked GlobalAlloc wrapper (feature `spin`)
//!   ├── global              - process-wide heap behind free functions (feature `spin`)
//!   └── page_region         - mmap backed region (unix)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use freelist::FreeListAllocator;
//!
//! #[repr(align(8))]
//! struct Region([u8; 4096]);
//!
//! let mut region = Region([0; 4096]);
//! let mut heap = unsafe { FreeListAllocator::new(region.0.as_mut_ptr(), 4096) }.unwrap();
//!
//! let ptr = heap.allocate(100).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 8, 0);
//!
//! let ptr = unsafe { heap.reallocate(ptr.as_ptr(), 200) }.unwrap();
//! unsafe { heap.deallocate(ptr.as_ptr()) };
//! assert!(heap.validate());
//! ```
//!
//! ## Limitations
//!
//! - `FreeListAllocator` is single-threaded, wrap it in `LockedAllocator` to
//!   share it.
//! - Double frees and foreign pointers are undefined behavior. Some of them
//!   are recognized and ignored, most are not.
//! - Alignments above 8 bytes are not supported.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod align;
pub mod block;
pub mod error;
pub mod free_list_allocator;
#[cfg(feature = "spin")]
pub mod global;
#[cfg(feature = "spin")]
pub mod locked_allocator;
#[cfg(unix)]
pub mod page_region;
pub mod validate;

pub use align::ALIGNMENT;
pub use block::{BlockInfo, HEADER_SIZE};
pub use error::{HeapError, Result};
pub use free_list_allocator::FreeListAllocator;
#[cfg(feature = "spin")]
pub use locked_allocator::LockedAllocator;
#[cfg(unix)]
pub use page_region::PageRegion;
pub use validate::{Blocks, HeapStats};
