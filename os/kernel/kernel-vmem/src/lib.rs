//! # Virtual Memory Support
//!
//! x86-64 four-level page tables stored in physical frames, plus the two
//! cursors the kernel walks them with.
//!
//! ## What you get
//! - An [`AddressSpace`] describing a `PML4` root page table, with
//!   [`map`](AddressSpace::map), [`unmap`](AddressSpace::unmap) and
//!   [`translate`](AddressSpace::translate).
//! - A leaf-mapping cursor, [`VmIter`], that steps through virtual pages and
//!   reports the effective permissions of each one.
//! - A table-node cursor, [`PtIter`], that visits every intermediate page-table
//!   frame of an address space (used to reclaim or audit them).
//! - The raw [`PageEntryBits`] layout and the [`PagePermissions`] subset the
//!   kernel cares about.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! Each 48-bit virtual address is divided into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! The CPU uses these fields as **indices** into four levels of page tables,
//! each level containing 512 (2⁹) entries of 8 bytes (64 bits) each.
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   (leaf, maps 4 KiB)
//!   │        │        └────────────► PDE   (points to a PT)
//!   │        └─────────────────────► PDPTE (points to a PD)
//!   └──────────────────────────────► PML4E (points to a PDPT)
//! ```
//!
//! ### Effective permissions
//!
//! A page is accessible only if every entry on the walk is present, and the
//! writable and user bits are the AND over all four levels. Intermediate
//! entries are therefore created present + writable + user so that the leaf
//! alone decides what a mapping allows.
//!
//! ## Physical memory access
//!
//! Page tables live in ordinary frames. Code in this crate never dereferences
//! physical addresses directly; it borrows frames through a [`PhysMapper`],
//! which on the emulated machine is the RAM array itself.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;
pub mod ptiter;
pub mod vmiter;

pub use crate::address_space::{AddressSpace, MapError, Mapping, Translation, VmError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{Level, PageTable};
pub use crate::ptiter::{PtIter, TableNode};
pub use crate::vmiter::VmIter;
pub use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};

/// Size of a frame in bytes, as `usize`.
#[allow(clippy::cast_possible_truncation)]
pub const FRAME_BYTES: usize = PAGE_SIZE as usize;

bitflags::bitflags! {
    /// The permission bits of a mapping, in their hardware bit positions.
    ///
    /// These are the only bits the kernel sets on leaf entries; caching and
    /// global bits stay clear.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PagePermissions: u64 {
        /// Mapping is valid. Cleared means any access faults.
        const PRESENT  = 1 << 0;
        /// Writes are allowed.
        const WRITABLE = 1 << 1;
        /// Accessible from user mode (CPL 3).
        const USER     = 1 << 2;

        /// Kernel-only read/write.
        const KERNEL_RW = Self::PRESENT.bits() | Self::WRITABLE.bits();
        /// User read-only (code, rodata).
        const USER_RO = Self::PRESENT.bits() | Self::USER.bits();
        /// User read/write (data, heap, stack).
        const USER_RW = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
    }
}

/// One 4 KiB physical frame.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageFrame(pub [u8; FRAME_BYTES]);

impl PageFrame {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self([0; FRAME_BYTES])
    }
}

impl Default for PageFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// The implementation decides where frames come from (a reserved kernel pool,
/// the owner-tracking frame table, a test bump allocator). Returns `None` on
/// out-of-memory. Callers zero the frame before linking it into a table.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame for a page table.
    fn alloc_4k<M: PhysMapper + ?Sized>(&mut self, mem: &mut M) -> Option<PhysicalPage>;
}

/// Borrows physical frames as Rust values.
///
/// On real hardware this would go through an identity map or a higher-half
/// direct map. On the emulated machine it indexes the RAM array.
///
/// # Panics
/// Implementations panic if `page` lies outside installed memory. Page tables
/// built by this crate only ever point at frames handed out by a
/// [`FrameAlloc`], so a walk never triggers this.
pub trait PhysMapper {
    fn frame(&self, page: PhysicalPage) -> &PageFrame;
    fn frame_mut(&mut self, page: PhysicalPage) -> &mut PageFrame;
}

/// Typed and byte-level helpers on top of [`PhysMapper`].
pub trait PhysMapperExt: PhysMapper {
    /// Borrow the [`PageTable`] stored in `page`.
    #[inline]
    fn table(&self, page: PhysicalPage) -> &PageTable {
        PageTable::from_frame(self.frame(page))
    }

    #[inline]
    fn table_mut(&mut self, page: PhysicalPage) -> &mut PageTable {
        PageTable::from_frame_mut(self.frame_mut(page))
    }

    fn zero_frame(&mut self, page: PhysicalPage) {
        self.frame_mut(page).0.fill(0);
    }

    /// Copy the whole contents of `src` into `dst`.
    fn copy_frame(&mut self, src: PhysicalPage, dst: PhysicalPage) {
        if src == dst {
            return;
        }
        let tmp = self.frame(src).clone();
        *self.frame_mut(dst) = tmp;
    }

    /// Read bytes starting at `pa`. The range must not cross a frame boundary.
    fn read_bytes(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        let (page, offset) = pa.split();
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        buf.copy_from_slice(&self.frame(page).0[offset..offset + buf.len()]);
    }

    /// Write bytes starting at `pa`. The range must not cross a frame boundary.
    fn write_bytes(&mut self, pa: PhysicalAddress, data: &[u8]) {
        let (page, offset) = pa.split();
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        self.frame_mut(page).0[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl<T: PhysMapper + ?Sized> PhysMapperExt for T {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    pub struct BumpAlloc {
        /// Next free frame number.
        next: usize,
        /// Exclusive end (bounds check).
        end: usize,
    }

    impl BumpAlloc {
        pub fn new(start: usize, end: usize) -> Self {
            Self { next: start, end }
        }

        pub fn used(&self, start: usize) -> usize {
            self.next - start
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k<M: PhysMapper + ?Sized>(&mut self, _mem: &mut M) -> Option<PhysicalPage> {
            if self.next >= self.end {
                return None;
            }
            let page = PhysicalPage::from_number(self.next);
            self.next += 1;
            Some(page)
        }
    }

    /// Physical RAM as a vector of frames; physical addresses are byte
    /// offsets from 0.
    pub struct TestPhys {
        frames: Vec<PageFrame>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            Self {
                frames: vec![PageFrame::zeroed(); n],
            }
        }
    }

    impl PhysMapper for TestPhys {
        fn frame(&self, page: PhysicalPage) -> &PageFrame {
            &self.frames[page.number()]
        }

        fn frame_mut(&mut self, page: PhysicalPage) -> &mut PageFrame {
            &mut self.frames[page.number()]
        }
    }

    pub fn fresh_space(mem: &mut TestPhys, alloc: &mut BumpAlloc) -> AddressSpace {
        AddressSpace::new(mem, alloc).expect("root frame")
    }

    #[test]
    fn map_then_walk_yields_installed_mapping() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 32);
        let space = fresh_space(&mut mem, &mut alloc);

        let va = VirtualAddress::new(0x10_3000);
        let frame = PhysicalPage::from_number(40);
        space
            .map(&mut mem, &mut alloc, va, frame, PagePermissions::USER_RW)
            .expect("map");

        let t = space.translate(&mem, va + 0x10).expect("mapped");
        assert_eq!(t.pa, frame.join(0x10));
        assert_eq!(t.perm, PagePermissions::USER_RW);

        // root + PDPT + PD + PT
        assert_eq!(alloc.used(1), 4);
    }

    #[test]
    fn remapping_replaces_leaf_without_new_tables() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 32);
        let space = fresh_space(&mut mem, &mut alloc);
        let va = VirtualAddress::new(0x2F_F000);

        space
            .map(&mut mem, &mut alloc, va, PhysicalPage::from_number(40), PagePermissions::USER_RW)
            .expect("map");
        let used = alloc.used(1);
        space
            .map(&mut mem, &mut alloc, va, PhysicalPage::from_number(41), PagePermissions::USER_RO)
            .expect("remap");

        assert_eq!(alloc.used(1), used);
        let t = space.translate(&mem, va).expect("mapped");
        assert_eq!(t.pa.page(), PhysicalPage::from_number(41));
        assert_eq!(t.perm, PagePermissions::USER_RO);
    }

    #[test]
    fn effective_permissions_combine_all_levels() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 32);
        let space = fresh_space(&mut mem, &mut alloc);
        let va = VirtualAddress::new(0x10_0000);
        space
            .map(&mut mem, &mut alloc, va, PhysicalPage::from_number(40), PagePermissions::USER_RW)
            .expect("map");

        // Clear the user bit on the PML4 entry: the leaf stays user, the walk does not.
        let root = space.root_page();
        let index = Level::L4.index_of(va);
        let entry = mem.table(root).entry(index).with_user_access(false);
        mem.table_mut(root).set_entry(index, entry);

        let t = space.translate(&mem, va).expect("still present");
        assert_eq!(t.perm, PagePermissions::KERNEL_RW);
    }

    #[test]
    fn map_without_present_clears_the_leaf() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 32);
        let space = fresh_space(&mut mem, &mut alloc);
        let va = VirtualAddress::new(0x12_0000);
        space
            .map(&mut mem, &mut alloc, va, PhysicalPage::from_number(40), PagePermissions::USER_RW)
            .expect("map");
        space
            .map(&mut mem, &mut alloc, va, PhysicalPage::from_number(40), PagePermissions::empty())
            .expect("clear");
        assert_eq!(space.translate(&mem, va), None);
    }

    #[test]
    fn unmap_returns_previous_translation() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 32);
        let space = fresh_space(&mut mem, &mut alloc);
        let va = VirtualAddress::new(0x11_0000);
        space
            .map(&mut mem, &mut alloc, va, PhysicalPage::from_number(50), PagePermissions::USER_RO)
            .expect("map");

        let old = space.unmap(&mut mem, va).expect("was mapped");
        assert_eq!(old.pa, PhysicalAddress::new(50 * 4096));
        assert_eq!(space.translate(&mem, va), None);
        assert_eq!(space.unmap(&mut mem, va), None);
    }

    #[test]
    fn map_rejects_unaligned_and_reports_oom() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 3);
        let space = fresh_space(&mut mem, &mut alloc);

        assert_eq!(
            space.map(
                &mut mem,
                &mut alloc,
                VirtualAddress::new(0x10_0010),
                PhysicalPage::from_number(40),
                PagePermissions::USER_RW
            ),
            Err(MapError::Unaligned(VirtualAddress::new(0x10_0010)))
        );
        // Only one frame left after the root: the PD cannot be allocated.
        assert_eq!(
            space.map(
                &mut mem,
                &mut alloc,
                VirtualAddress::new(0x10_0000),
                PhysicalPage::from_number(40),
                PagePermissions::USER_RW
            ),
            Err(MapError::OutOfMemory)
        );
    }

    #[test]
    fn copy_to_and_from_cross_page_boundaries() {
        let mut mem = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(1, 32);
        let space = fresh_space(&mut mem, &mut alloc);
        let base = VirtualAddress::new(0x10_0000);
        // Deliberately non-contiguous frames behind contiguous pages.
        space
            .map(&mut mem, &mut alloc, base, PhysicalPage::from_number(45), PagePermissions::USER_RO)
            .expect("map");
        space
            .map(&mut mem, &mut alloc, base + PAGE_SIZE, PhysicalPage::from_number(42), PagePermissions::USER_RO)
            .expect("map");

        let data: Vec<u8> = (0..64u8).collect();
        let start = base + (PAGE_SIZE - 32);
        space.copy_to(&mut mem, start, &data).expect("copy in");

        let mut back = [0u8; 64];
        space.copy_from(&mem, start, &mut back).expect("copy out");
        assert_eq!(&back[..], &data[..]);
        assert_eq!(mem.frame(PhysicalPage::from_number(42)).0[0], 32);
        assert_eq!(mem.frame(PhysicalPage::from_number(45)).0[4095], 31);

        assert_eq!(
            space.copy_to(&mut mem, base + (2 * PAGE_SIZE - 1), &[1, 2]),
            Err(VmError::Unmapped(base + 2 * PAGE_SIZE))
        );
    }

    #[test]
    fn copy_frame_duplicates_contents() {
        let mut mem = TestPhys::with_frames(4);
        mem.write_bytes(PhysicalAddress::new(0x1010), b"hello");
        mem.copy_frame(PhysicalPage::from_number(1), PhysicalPage::from_number(3));
        let mut buf = [0u8; 5];
        mem.read_bytes(PhysicalAddress::new(0x3010), &mut buf);
        assert_eq!(&buf, b"hello");
    }
}
