use crate::{MemoryAddress, PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use core::fmt;

/// Physical page frame base.
///
/// A `PhysicalPage` is the **page-aligned base** of a 4 KiB frame. Frames are
/// also addressed by their frame number (`base >> 12`), which is what the
/// frame ownership table and the emulated RAM index by.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(MemoryAddress);

impl PhysicalPage {
    /// Frame containing `pa` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.0.align_down())
    }

    /// Frame starting at `pa`, or `None` if `pa` is not page aligned.
    #[inline]
    #[must_use]
    pub const fn try_from_addr(pa: PhysicalAddress) -> Option<Self> {
        if pa.is_page_aligned() {
            Some(Self(pa.0))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_number(number: usize) -> Self {
        Self(MemoryAddress::new((number as u64) << PAGE_SHIFT))
    }

    /// Frame number, i.e. index of the frame in physical memory.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn number(self) -> usize {
        (self.0.as_u64() >> PAGE_SHIFT) as usize
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    /// Combine with an in-frame offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < PAGE_SIZE);
        PhysicalAddress::new(self.0.as_u64() + offset)
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(MemoryAddress::new(self.0.as_u64() + PAGE_SIZE))
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {:#06X}", self.0.as_u64())
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:016X})", self.0.as_u64())
    }
}
