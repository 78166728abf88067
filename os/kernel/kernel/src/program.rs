//! # Program Images
//!
//! The loader side of process creation. An image is an entry point plus a
//! list of loadable segments; where the bytes come from (an ELF file, a
//! table compiled into the kernel, a test) is the implementor's business.

use core::iter::FusedIterator;
use kernel_info::memory::{PROC_START_ADDR, PROC_STACK_ADDR};
use kernel_memory_addresses::VirtualAddress;

/// One loadable segment.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Segment<'a> {
    /// First virtual address of the segment; need not be page aligned.
    pub va: VirtualAddress,
    /// Size in memory. Bytes past `data.len()` are zero.
    pub mem_size: u64,
    /// Initialized contents.
    pub data: &'a [u8],
    pub writable: bool,
}

impl Segment<'_> {
    /// One past the last byte of the segment, or `None` on overflow.
    #[must_use]
    pub const fn end(&self) -> Option<VirtualAddress> {
        self.va.checked_add(self.mem_size)
    }

    /// Check that the segment fits into the application part of a process
    /// address space and that its data fits into its memory size.
    ///
    /// # Errors
    /// See [`ProgramError`].
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.data.len() as u64 > self.mem_size {
            return Err(ProgramError::DataTooLarge {
                va: self.va,
                data: self.data.len(),
                mem_size: self.mem_size,
            });
        }
        let in_range = self.end().is_some_and(|end| {
            self.va.as_u64() >= PROC_START_ADDR && end.as_u64() <= PROC_STACK_ADDR
        });
        if !in_range {
            return Err(ProgramError::OutOfRange {
                va: self.va,
                mem_size: self.mem_size,
            });
        }
        Ok(())
    }
}

/// Source of a process's initial memory contents.
pub trait ProgramImage {
    /// Initial instruction pointer.
    fn entry(&self) -> VirtualAddress;

    fn segment_count(&self) -> usize;

    /// Segment `index`, `None` past the end.
    fn segment(&self, index: usize) -> Option<Segment<'_>>;
}

impl<'a> dyn ProgramImage + 'a {
    /// All segments in order.
    #[must_use]
    pub fn segments(&self) -> Segments<'_, 'a> {
        Segments {
            image: self,
            next: 0,
        }
    }
}

/// Iterator over the segments of a [`ProgramImage`].
pub struct Segments<'i, 'a> {
    image: &'i (dyn ProgramImage + 'a),
    next: usize,
}

impl<'i> Iterator for Segments<'i, '_> {
    type Item = Segment<'i>;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.image.segment(self.next)?;
        self.next += 1;
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.image.segment_count().saturating_sub(self.next);
        (r, Some(r))
    }
}

impl FusedIterator for Segments<'_, '_> {}

/// A segment the kernel refuses to load.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProgramError {
    #[error("segment at {va} ({mem_size:#x} bytes) lies outside application memory")]
    OutOfRange { va: VirtualAddress, mem_size: u64 },
    #[error("segment at {va} has {data} bytes of data but only {mem_size:#x} bytes of memory")]
    DataTooLarge {
        va: VirtualAddress,
        data: usize,
        mem_size: u64,
    },
}
