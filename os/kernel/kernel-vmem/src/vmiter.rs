//! # Leaf-Mapping Cursor
//!
//! [`VmIter`] is positioned at one virtual address of one address space and
//! caches the result of walking it. Moving the cursor re-walks; mapping through
//! the cursor updates the tables and the cached view together.
//!
//! The cursor does not hold on to physical memory. Every call that needs it
//! takes it explicitly, so a caller can step through one address space while
//! allocating frames and writing into another.
//!
//! ```rust
//! # use kernel_vmem::*;
//! # struct Ram(Vec<PageFrame>);
//! # impl PhysMapper for Ram {
//! #     fn frame(&self, p: PhysicalPage) -> &PageFrame { &self.0[p.number()] }
//! #     fn frame_mut(&mut self, p: PhysicalPage) -> &mut PageFrame { &mut self.0[p.number()] }
//! # }
//! # struct Bump(usize);
//! # impl FrameAlloc for Bump {
//! #     fn alloc_4k<M: PhysMapper + ?Sized>(&mut self, _: &mut M) -> Option<PhysicalPage> {
//! #         self.0 += 1;
//! #         Some(PhysicalPage::from_number(self.0))
//! #     }
//! # }
//! # let mut ram = Ram(vec![PageFrame::zeroed(); 32]);
//! # let mut alloc = Bump(0);
//! let space = AddressSpace::new(&mut ram, &mut alloc).unwrap();
//! let mut it = space.cursor(&ram, VirtualAddress::new(0x10_0000));
//! assert!(!it.present());
//!
//! it.map(&mut ram, &mut alloc, PhysicalPage::from_number(20), PagePermissions::USER_RW)
//!     .unwrap();
//! assert!(it.present() && it.writable() && it.user());
//! assert_eq!(it.pa(), Some(PhysicalAddress::new(20 * 4096)));
//! ```

use crate::{AddressSpace, FrameAlloc, MapError, PagePermissions, PhysMapper, Translation};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// Cursor over the leaf mappings of an address space.
#[derive(Debug, Copy, Clone)]
pub struct VmIter {
    space: AddressSpace,
    va: VirtualAddress,
    found: Option<Translation>,
}

impl VmIter {
    /// Position a cursor at `va` in `space`.
    pub fn new<M: PhysMapper + ?Sized>(mem: &M, space: AddressSpace, va: VirtualAddress) -> Self {
        Self {
            space,
            va,
            found: space.translate(mem, va),
        }
    }

    #[inline]
    #[must_use]
    pub const fn va(&self) -> VirtualAddress {
        self.va
    }

    #[inline]
    #[must_use]
    pub const fn space(&self) -> AddressSpace {
        self.space
    }

    /// Physical address of [`va`](Self::va), if mapped.
    #[inline]
    #[must_use]
    pub fn pa(&self) -> Option<PhysicalAddress> {
        self.found.map(|t| t.pa)
    }

    /// Physical frame backing the current page, if mapped.
    #[inline]
    #[must_use]
    pub fn page(&self) -> Option<PhysicalPage> {
        self.pa().map(PhysicalAddress::page)
    }

    /// Effective permissions; empty if not mapped.
    #[inline]
    #[must_use]
    pub fn perm(&self) -> PagePermissions {
        self.found.map_or(PagePermissions::empty(), |t| t.perm)
    }

    #[inline]
    #[must_use]
    pub fn present(&self) -> bool {
        self.found.is_some()
    }

    #[inline]
    #[must_use]
    pub fn writable(&self) -> bool {
        self.perm().contains(PagePermissions::WRITABLE)
    }

    #[inline]
    #[must_use]
    pub fn user(&self) -> bool {
        self.perm().contains(PagePermissions::USER)
    }

    /// Move to `va` and re-walk.
    pub fn find<M: PhysMapper + ?Sized>(&mut self, mem: &M, va: VirtualAddress) {
        self.va = va;
        self.found = self.space.translate(mem, va);
    }

    /// Move to the start of the next page.
    ///
    /// Returns `false` (and stays put) if that would wrap the address space.
    pub fn advance<M: PhysMapper + ?Sized>(&mut self, mem: &M) -> bool {
        let next = self.va.page().base().checked_add(crate::PAGE_SIZE);
        match next {
            Some(va) => {
                self.find(mem, va);
                true
            }
            None => false,
        }
    }

    /// Install or replace the leaf for the current page.
    ///
    /// # Errors
    /// See [`AddressSpace::map`].
    pub fn map<M, A>(
        &mut self,
        mem: &mut M,
        alloc: &mut A,
        page: PhysicalPage,
        perm: PagePermissions,
    ) -> Result<(), MapError>
    where
        M: PhysMapper + ?Sized,
        A: FrameAlloc + ?Sized,
    {
        let result = self
            .space
            .map(mem, alloc, self.va.page().base(), page, perm);
        self.found = self.space.translate(mem, self.va);
        result
    }
}
