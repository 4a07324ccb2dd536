/*
 * error.rs
 *
 * Allocation failures are reported as None / null, never as errors.
 * HeapError only covers binding a region and the validator's findings.
 */

use core::fmt;

/* everything init or check can report */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    NullRegion,
    RegionTooSmall { size: usize, min: usize },
    Uninitialized,
    MisalignedBlock { offset: usize, size: usize },
    SpanOverrun { offset: usize, end: usize },
    CorruptFreeList { offset: usize },
    FreeCountMismatch { walked: usize, listed: usize },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullRegion => write!(f, "region start is null"),
            Self::RegionTooSmall { size, min } => {
                write!(f, "region of {size} bytes is too small (need {min})")
            }
            Self::Uninitialized => write!(f, "heap has no region bound"),
            Self::MisalignedBlock { offset, size } => {
                write!(f, "block at offset {offset} has unaligned size {size}")
            }
            Self::SpanOverrun { offset, end } => {
                write!(f, "block at offset {offset} runs past heap end {end}")
            }
            Self::CorruptFreeList { offset } => {
                write!(f, "free list is corrupt at offset {offset}")
            }
            Self::FreeCountMismatch { walked, listed } => write!(
                f,
                "free block count mismatch: heap walk found {walked}, free list holds {listed}"
            ),
        }
    }
}

impl core::error::Error for HeapError {}

pub type Result<T> = core::result::Result<T, HeapError>;
