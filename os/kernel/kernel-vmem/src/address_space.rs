//! # Address Space (x86-64, PML4-rooted)
//!
//! Helpers to build and manipulate a **single** virtual address space: a tree
//! rooted at a PML4 frame.
//!
//! ## Highlights
//!
//! - [`AddressSpace::map`] installs or replaces one 4 KiB leaf, allocating and
//!   linking missing intermediate tables.
//! - [`AddressSpace::unmap`] clears a single leaf.
//! - [`AddressSpace::translate`] resolves a VA to a PA plus the effective
//!   permissions of the walk.
//! - [`AddressSpace::copy_to`] / [`AddressSpace::copy_from`] move bytes
//!   through the mapping with kernel privileges (permission bits are ignored).
//!
//! ## Design
//!
//! - The handle is just the root frame; physical memory is passed to every
//!   call, so one address space can be read while frames are being allocated
//!   for another.
//! - Intermediate entries are created present + writable + user.
//! - Intermediate tables are never freed by `unmap`; reclaiming them is the
//!   owner's job (see [`PtIter`](crate::PtIter)).

use crate::page_table::Level;
use crate::{
    FrameAlloc, PAGE_SIZE, PageEntryBits, PagePermissions, PhysMapper, PhysMapperExt, PtIter,
    VmIter,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// Errors from installing a mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory while allocating a page-table frame")]
    OutOfMemory,
    #[error("virtual address {0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("virtual address {0} is covered by a large page")]
    LargePage(VirtualAddress),
}

/// Errors from accessing memory through a mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("virtual address {0} is not mapped")]
    Unmapped(VirtualAddress),
    #[error("address range starting at {0} wraps around")]
    Overflow(VirtualAddress),
}

/// Result of a successful walk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Translation {
    /// Physical address of the translated byte.
    pub pa: PhysicalAddress,
    /// Effective permissions, AND-combined over all levels.
    pub perm: PagePermissions,
}

/// A present leaf mapping, as yielded by [`AddressSpace::mappings`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Mapping {
    pub va: VirtualAddress,
    pub page: PhysicalPage,
    pub perm: PagePermissions,
}

/// Handle to a single, concrete address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AddressSpace {
    root: PhysicalPage,
}

impl AddressSpace {
    /// Wrap an existing PML4 frame.
    #[inline]
    #[must_use]
    pub const fn from_root(root: PhysicalPage) -> Self {
        Self { root }
    }

    /// Allocate an empty PML4.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `alloc` has no frame left.
    pub fn new<M, A>(mem: &mut M, alloc: &mut A) -> Result<Self, MapError>
    where
        M: PhysMapper + ?Sized,
        A: FrameAlloc + ?Sized,
    {
        let root = alloc.alloc_4k(mem).ok_or(MapError::OutOfMemory)?;
        mem.zero_frame(root);
        Ok(Self { root })
    }

    /// Physical page of the PML4.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    /// Walk the tables for `va`.
    ///
    /// Returns `None` if any level is not present.
    pub fn translate<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        va: VirtualAddress,
    ) -> Option<Translation> {
        let mut table = self.root;
        let mut perm = PagePermissions::all();
        let mut level = Level::L4;
        loop {
            let entry = mem.table(table).entry(level.index_of(va));
            if !entry.present() {
                return None;
            }
            perm &= entry.permissions();

            let next = match level.next() {
                Some(next) if !entry.large_page() => next,
                _ => {
                    let offset = va.as_u64() & (level.span() - 1);
                    return Some(Translation {
                        pa: entry.physical_address() + offset,
                        perm,
                    });
                }
            };
            table = entry.page();
            level = next;
        }
    }

    /// Install or replace the leaf for the page at `va`.
    ///
    /// Missing intermediate tables are taken from `alloc`. Mapping with a
    /// `perm` that lacks [`PagePermissions::PRESENT`] clears the leaf instead
    /// and never allocates.
    ///
    /// # Errors
    /// - [`MapError::Unaligned`] if `va` is not page aligned.
    /// - [`MapError::OutOfMemory`] if an intermediate table could not be
    ///   allocated. Tables linked before the failure stay in place.
    /// - [`MapError::LargePage`] if a large-page leaf covers `va`.
    pub fn map<M, A>(
        &self,
        mem: &mut M,
        alloc: &mut A,
        va: VirtualAddress,
        page: PhysicalPage,
        perm: PagePermissions,
    ) -> Result<(), MapError>
    where
        M: PhysMapper + ?Sized,
        A: FrameAlloc + ?Sized,
    {
        if !va.is_page_aligned() {
            return Err(MapError::Unaligned(va));
        }

        let present = perm.contains(PagePermissions::PRESENT);
        let Some(leaf_table) = self.leaf_table(mem, Some(alloc).filter(|_| present), va)? else {
            // nothing mapped there, nothing to clear
            return Ok(());
        };

        let entry = if present {
            PageEntryBits::leaf(page, perm)
        } else {
            PageEntryBits::new()
        };
        mem.table_mut(leaf_table)
            .set_entry(Level::L1.index_of(va), entry);
        Ok(())
    }

    /// Clear the leaf for the page containing `va` and return what it mapped.
    pub fn unmap<M: PhysMapper + ?Sized>(
        &self,
        mem: &mut M,
        va: VirtualAddress,
    ) -> Option<Translation> {
        let page_va = va.page().base();
        let old = self.translate(mem, page_va)?;
        let leaf_table = self
            .leaf_table::<M, NoAlloc>(mem, None, page_va)
            .ok()
            .flatten()?;
        mem.table_mut(leaf_table)
            .set_entry(Level::L1.index_of(page_va), PageEntryBits::new());
        Some(old)
    }

    /// Leaf cursor positioned at `va`.
    pub fn cursor<M: PhysMapper + ?Sized>(&self, mem: &M, va: VirtualAddress) -> VmIter {
        VmIter::new(mem, *self, va)
    }

    /// Cursor over all intermediate table frames (the root excluded).
    pub fn table_nodes<'m, M: PhysMapper + ?Sized>(&self, mem: &'m M) -> PtIter<'m, M> {
        PtIter::new(mem, *self)
    }

    /// Present leaf mappings with `start <= va < end`, in address order.
    pub fn mappings<'m, M: PhysMapper + ?Sized>(
        &self,
        mem: &'m M,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> Mappings<'m, M> {
        Mappings {
            mem,
            cursor: self.cursor(mem, start.page().base()),
            end,
        }
    }

    /// Write `src` at `va` through this address space, ignoring permissions.
    ///
    /// # Errors
    /// [`VmError::Unmapped`] with the first unmapped page. Pages before it
    /// have already been written.
    pub fn copy_to<M: PhysMapper + ?Sized>(
        &self,
        mem: &mut M,
        va: VirtualAddress,
        src: &[u8],
    ) -> Result<(), VmError> {
        let mut done = 0;
        while done < src.len() {
            let at = offset_va(va, done)?;
            let chunk = chunk_len(at, src.len() - done);
            let t = self.translate(mem, at).ok_or(VmError::Unmapped(at))?;
            mem.write_bytes(t.pa, &src[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Read `dst.len()` bytes at `va` through this address space.
    ///
    /// # Errors
    /// [`VmError::Unmapped`] with the first unmapped page.
    pub fn copy_from<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        va: VirtualAddress,
        dst: &mut [u8],
    ) -> Result<(), VmError> {
        let mut done = 0;
        while done < dst.len() {
            let at = offset_va(va, done)?;
            let chunk = chunk_len(at, dst.len() - done);
            let t = self.translate(mem, at).ok_or(VmError::Unmapped(at))?;
            mem.read_bytes(t.pa, &mut dst[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Find (or, with an allocator, build) the PT covering `va`.
    fn leaf_table<M, A>(
        &self,
        mem: &mut M,
        mut alloc: Option<&mut A>,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalPage>, MapError>
    where
        M: PhysMapper + ?Sized,
        A: FrameAlloc + ?Sized,
    {
        let mut table = self.root;
        for level in [Level::L4, Level::L3, Level::L2] {
            let index = level.index_of(va);
            let entry = mem.table(table).entry(index);
            table = if entry.present() {
                if entry.large_page() {
                    return Err(MapError::LargePage(va));
                }
                entry.page()
            } else if let Some(alloc) = alloc.as_deref_mut() {
                let next = alloc.alloc_4k(mem).ok_or(MapError::OutOfMemory)?;
                mem.zero_frame(next);
                mem.table_mut(table).set_entry(index, PageEntryBits::table(next));
                log::trace!("linked {} frame {next} for {va}", level.name());
                next
            } else {
                return Ok(None);
            };
        }
        Ok(Some(table))
    }
}

/// Placeholder allocator type for walks that must not allocate.
enum NoAlloc {}

impl FrameAlloc for NoAlloc {
    fn alloc_4k<M: PhysMapper + ?Sized>(&mut self, _mem: &mut M) -> Option<PhysicalPage> {
        match *self {}
    }
}

fn offset_va(va: VirtualAddress, offset: usize) -> Result<VirtualAddress, VmError> {
    va.checked_add(offset as u64).ok_or(VmError::Overflow(va))
}

#[allow(clippy::cast_possible_truncation)]
fn chunk_len(at: VirtualAddress, remaining: usize) -> usize {
    let left_in_page = (PAGE_SIZE - at.offset()) as usize;
    remaining.min(left_in_page)
}

/// Iterator over present leaves of an address space. See [`AddressSpace::mappings`].
pub struct Mappings<'m, M: PhysMapper + ?Sized> {
    mem: &'m M,
    cursor: VmIter,
    end: VirtualAddress,
}

impl<M: PhysMapper + ?Sized> Iterator for Mappings<'_, M> {
    type Item = Mapping;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor.va() < self.end {
            let found = self.cursor.page().map(|page| Mapping {
                va: self.cursor.va(),
                page,
                perm: self.cursor.perm(),
            });
            if !self.cursor.advance(self.mem) {
                self.end = self.cursor.va();
            }
            if found.is_some() {
                return found;
            }
        }
        None
    }
}
