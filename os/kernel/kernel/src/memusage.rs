//! # Memory-Usage Audit
//!
//! Classifies every physical frame by walking the kernel page table and every
//! live process page table, and flags frames that user code can reach but
//! should not: reserved memory, kernel data, and frames the kernel itself
//! uses (page tables).
//!
//! The result renders as the classic one-character-per-page memory map:
//!
//! ```text
//! PHYSICAL MEMORY
//! 0x000000 R111111112222222................................................
//! 0x040000 KKKKKKKKKKKKKKKKKKKKKKKKKKKKKKKK...............................K
//! ```
//!
//! | Symbol | Meaning                                                   |
//! |--------|-----------------------------------------------------------|
//! | `R`    | reserved (null page, I/O hole)                            |
//! | `K`    | kernel image, kernel stack, kernel page tables            |
//! | `.`    | free, or user-accessible without an owning process        |
//! | `1`..  | owned by exactly one process (data or page table)         |
//! | `S`    | reachable from more than one process                      |
//! | `*`    | kernel-only frame that is also user accessible (error)    |

use crate::{Kernel, ProcessTable};
use bitflags::bitflags;
use core::fmt;
use kernel_alloc::{FrameAllocator, FrameOwner};
use kernel_info::memory::{MEMSIZE_VIRTUAL, NPAGES, is_allocatable, is_reserved};
use kernel_info::process::Pid;
use kernel_vmem::{
    AddressSpace, FRAME_BYTES, PagePermissions, PhysMapper, PhysicalAddress, PhysicalPage,
    VirtualAddress,
};
use log::error;

/// Pages shown by [`MemoryUsage::render_virtual`].
pub const VIRTUAL_VIEW_PAGES: usize = 768;

/// Pages per rendered row.
const ROW: usize = 64;

/// Symbol for a page owned by a single process, indexed by pid.
const NAMES: &[u8; 16] = b"K123456789ABCDEF";

bitflags! {
    /// What references a physical frame. Process bits are
    /// [`UsageFlags::process`].
    #[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
    pub struct UsageFlags: u32 {
        /// Reachable as a kernel-only page (page tables included).
        const KERNEL = 1;
        /// Reachable from user mode.
        const USER = 2;
    }
}

impl UsageFlags {
    /// Bit for "associated with process `pid`".
    #[must_use]
    pub const fn process(pid: Pid) -> Self {
        Self::from_bits_retain(2 << pid.index())
    }

    /// Lowest process recorded in these flags.
    #[must_use]
    pub fn lowest_pid(self) -> Option<Pid> {
        let procs = self.bits() >> 2;
        if procs == 0 {
            return None;
        }
        Pid::new(procs.trailing_zeros() as usize + 1)
    }

    /// Numeric comparison against a flag set; any process bit makes the
    /// value larger than `KERNEL | USER`.
    const fn exceeds(self, other: Self) -> bool {
        self.bits() > other.bits()
    }
}

/// What is wrong with a page.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PageErrorKind {
    ReservedMappedForUser,
    KernelDataMappedForUser,
    KernelAllocatedMappedForUser,
}

impl fmt::Display for PageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReservedMappedForUser => "reserved page mapped for user",
            Self::KernelDataMappedForUser => "kernel data page mapped for user",
            Self::KernelAllocatedMappedForUser => "kernel allocated page mapped for user",
        })
    }
}

/// A page-table error found by the audit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageError {
    pub pa: PhysicalAddress,
    pub kind: PageErrorKind,
    /// Lowest process that can reach the page.
    pub pid: Option<Pid>,
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pa, self.kind)?;
        if let Some(pid) = self.pid {
            write!(f, " (pid {pid})")?;
        }
        Ok(())
    }
}

/// One snapshot of physical memory usage.
#[derive(Clone)]
pub struct MemoryUsage {
    marks: [UsageFlags; NPAGES],
}

impl Default for MemoryUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUsage {
    /// Nothing marked.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            marks: [UsageFlags::empty(); NPAGES],
        }
    }

    /// Rebuild the marks from the current page tables.
    pub fn refresh<M: PhysMapper + ?Sized>(
        &mut self,
        mem: &M,
        kernel: AddressSpace,
        procs: &ProcessTable,
        frames: &FrameAllocator,
    ) {
        self.marks.fill(UsageFlags::empty());

        for node in kernel.table_nodes(mem) {
            self.mark(node.page, UsageFlags::KERNEL);
        }
        self.mark(kernel.root_page(), UsageFlags::KERNEL);

        let user_range = (VirtualAddress::zero(), VirtualAddress::new(MEMSIZE_VIRTUAL));
        let mut any = false;
        for p in procs.live() {
            let Some(space) = p.space.filter(|s| *s != kernel) else {
                continue;
            };
            any = true;
            let owned = UsageFlags::process(p.pid);
            for node in space.table_nodes(mem) {
                self.mark(node.page, UsageFlags::KERNEL | owned);
            }
            self.mark(space.root_page(), UsageFlags::KERNEL | owned);

            for m in space.mappings(mem, user_range.0, user_range.1) {
                if m.perm.contains(PagePermissions::USER) {
                    self.mark(m.page, UsageFlags::USER | owned);
                }
            }
        }

        // No process page tables yet: fall back to frame ownership.
        if !any {
            for m in kernel.mappings(mem, user_range.0, user_range.1) {
                if m.perm.contains(PagePermissions::USER) {
                    let owner = match frames.owner(m.page) {
                        FrameOwner::Process(pid) => UsageFlags::process(pid),
                        FrameOwner::Free | FrameOwner::Kernel => UsageFlags::empty(),
                    };
                    self.mark(m.page, UsageFlags::USER | owner);
                }
            }
        }
    }

    /// Marks recorded for `page`; pages beyond installed memory are unmarked.
    #[must_use]
    pub fn flags(&self, page: PhysicalPage) -> UsageFlags {
        self.marks.get(page.number()).copied().unwrap_or_default()
    }

    /// Memory-map symbol for `page`.
    #[must_use]
    pub fn symbol(&self, page: PhysicalPage) -> char {
        self.classify(page).0
    }

    /// Page-table error at `page`, if any.
    #[must_use]
    pub fn error(&self, page: PhysicalPage) -> Option<PageError> {
        self.classify(page).1
    }

    /// Every page-table error, in address order.
    pub fn errors(&self) -> impl Iterator<Item = PageError> + '_ {
        (0..NPAGES).filter_map(|n| self.error(PhysicalPage::from_number(n)))
    }

    /// Write the physical memory map, 64 pages per row.
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn render_physical<W: fmt::Write + ?Sized>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "PHYSICAL MEMORY")?;
        for row in 0..NPAGES / ROW {
            let first = row * ROW;
            write!(out, "0x{:06X} ", first * FRAME_BYTES)?;
            for n in first..first + ROW {
                out.write_char(self.symbol(PhysicalPage::from_number(n)))?;
            }
            out.write_char('\n')?;
        }
        Ok(())
    }

    /// Write the virtual memory map of `space` for the low
    /// [`VIRTUAL_VIEW_PAGES`] pages. Unmapped pages are blank; each mapped
    /// page shows the symbol of the frame behind it.
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn render_virtual<M, W>(
        &self,
        mem: &M,
        space: AddressSpace,
        pid: Pid,
        out: &mut W,
    ) -> fmt::Result
    where
        M: PhysMapper + ?Sized,
        W: fmt::Write + ?Sized,
    {
        writeln!(out, "VIRTUAL ADDRESS SPACE FOR {pid}")?;
        let mut it = space.cursor(mem, VirtualAddress::zero());
        for n in 0..VIRTUAL_VIEW_PAGES {
            if n % ROW == 0 {
                write!(out, "0x{:06X} ", it.va().as_u64())?;
            }
            let symbol = it.page().map_or(' ', |page| self.symbol(page));
            out.write_char(symbol)?;
            if n % ROW == ROW - 1 {
                out.write_char('\n')?;
            }
            it.advance(mem);
        }
        Ok(())
    }

    fn mark(&mut self, page: PhysicalPage, flags: UsageFlags) {
        if let Some(v) = self.marks.get_mut(page.number()) {
            *v |= flags;
        }
    }

    fn classify(&self, page: PhysicalPage) -> (char, Option<PageError>) {
        let pa = page.base();
        let v = self.flags(page);
        let reserved = is_reserved(pa);
        let kernel = !reserved && !is_allocatable(pa);
        let both = UsageFlags::KERNEL | UsageFlags::USER;
        let error = |kind| PageError {
            pa,
            kind,
            pid: v.lowest_pid(),
        };

        if reserved {
            if v.exceeds(both) {
                return ('R', Some(error(PageErrorKind::ReservedMappedForUser)));
            }
            return ('R', None);
        }
        if kernel {
            if v.exceeds(both) {
                return ('K', Some(error(PageErrorKind::KernelDataMappedForUser)));
            }
            return ('K', None);
        }

        if v.is_empty() || v == UsageFlags::USER {
            return ('.', None);
        }
        if v == UsageFlags::KERNEL {
            return ('K', None);
        }
        if v.contains(both) {
            return ('*', Some(error(PageErrorKind::KernelAllocatedMappedForUser)));
        }

        let Some(pid) = v.lowest_pid() else {
            return ('?', None);
        };
        if v.exceeds(UsageFlags::process(pid) | both) {
            ('S', None)
        } else {
            (char::from(NAMES[pid.index()]), None)
        }
    }
}

impl<M: PhysMapper> Kernel<M> {
    /// Classify physical memory as it is right now.
    #[must_use]
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::new();
        usage.refresh(&self.mem, self.kernel_space, &self.procs, &self.frames);
        usage
    }

    /// Run the audit and report every page-table error.
    ///
    /// Errors are logged and counted in
    /// [`audit_errors`](Kernel::audit_errors); they do not stop the machine.
    pub fn memshow(&mut self) -> MemoryUsage {
        let usage = self.memory_usage();
        for e in usage.errors() {
            error!("PAGE TABLE ERROR: {e}");
            self.audit_errors += 1;
        }
        usage
    }
}
