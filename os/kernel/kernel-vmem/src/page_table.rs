//! # Page Table Frames
//!
//! One [`PageTable`] type serves all four levels; the [`Level`] of a table is
//! a property of where it sits in the walk, not of its layout.

use crate::{PageEntryBits, PageFrame};
use kernel_memory_addresses::VirtualAddress;

/// Entries per table.
pub const ENTRIES: usize = 512;

/// Paging level of a table, from the root down.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// Page Map Level 4 (root, indexed by VA bits 47..39).
    L4,
    /// Page Directory Pointer Table (VA bits 38..30).
    L3,
    /// Page Directory (VA bits 29..21).
    L2,
    /// Page Table (VA bits 20..12); its entries are leaves.
    L1,
}

impl Level {
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::L4 => 39,
            Self::L3 => 30,
            Self::L2 => 21,
            Self::L1 => 12,
        }
    }

    /// Bytes of virtual address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn span(self) -> u64 {
        1 << self.shift()
    }

    /// Index of `va` into a table at this level.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift()) & 0x1FF) as usize
    }

    /// The level of the tables this level's entries point to.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::L4 => Some(Self::L3),
            Self::L3 => Some(Self::L2),
            Self::L2 => Some(Self::L1),
            Self::L1 => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::L4 => "PML4",
            Self::L3 => "PDPT",
            Self::L2 => "PD",
            Self::L1 => "PT",
        }
    }
}

/// A 4 KiB page table: 512 raw 64-bit entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [u64; ENTRIES],
}

const _: () = {
    assert!(size_of::<PageTable>() == size_of::<PageFrame>());
    assert!(align_of::<PageTable>() == align_of::<PageFrame>());
};

impl PageTable {
    /// View a frame as a page table.
    #[inline]
    #[must_use]
    pub const fn from_frame(frame: &PageFrame) -> &Self {
        // SAFETY: same size and alignment, and every bit pattern is a valid `[u64; 512]`.
        unsafe { &*core::ptr::from_ref(frame).cast::<Self>() }
    }

    #[inline]
    pub const fn from_frame_mut(frame: &mut PageFrame) -> &mut Self {
        // SAFETY: see `from_frame`; the exclusive borrow is carried over.
        unsafe { &mut *core::ptr::from_mut(frame).cast::<Self>() }
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, index: usize) -> PageEntryBits {
        PageEntryBits::from_bits(self.entries[index])
    }

    #[inline]
    pub const fn set_entry(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry.into_bits();
    }

    /// Present entries with their indices.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, &raw)| (i, PageEntryBits::from_bits(raw)))
            .filter(|(_, e)| e.present())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PagePermissions, PhysicalPage};

    #[test]
    fn indices_split_the_address() {
        let va = VirtualAddress::new(0x0000_7F12_3456_7000);
        let rebuilt = (Level::L4.index_of(va) as u64) << 39
            | (Level::L3.index_of(va) as u64) << 30
            | (Level::L2.index_of(va) as u64) << 21
            | (Level::L1.index_of(va) as u64) << 12;
        assert_eq!(rebuilt, va.as_u64());

        let proc_stack = VirtualAddress::new(0x2F_F000);
        assert_eq!(Level::L4.index_of(proc_stack), 0);
        assert_eq!(Level::L2.index_of(proc_stack), 1);
        assert_eq!(Level::L1.index_of(proc_stack), 0xFF);
    }

    #[test]
    fn frame_view_round_trips_entries() {
        let mut frame = PageFrame::zeroed();
        let e = PageEntryBits::leaf(PhysicalPage::from_number(3), PagePermissions::USER_RO);
        PageTable::from_frame_mut(&mut frame).set_entry(511, e);
        assert_eq!(PageTable::from_frame(&frame).entry(511), e);
        assert_eq!(frame.0[511 * 8], 0b101);
        assert_eq!(PageTable::from_frame(&frame).present_entries().count(), 1);
    }
}
