//! Boot-time pool for the kernel's own page tables.

use kernel_info::memory::{KERNEL_PAGETABLE_ADDR, KERNEL_PAGETABLE_FRAMES};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_vmem::{FrameAlloc, PhysMapper, PhysMapperExt};

/// Bump allocator over the frames reserved for kernel page tables.
///
/// These frames sit inside the kernel data range, so they are identity-mapped
/// into every process address space together with the rest of the kernel and
/// never compete with process frames. There is no `free`: the kernel address
/// space lives as long as the machine.
pub struct KernelTablePool {
    next: u64,
    end: u64,
}

impl KernelTablePool {
    /// Construct the allocator over the statically reserved pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: KERNEL_PAGETABLE_ADDR,
            end: KERNEL_PAGETABLE_ADDR + KERNEL_PAGETABLE_FRAMES * PAGE_SIZE,
        }
    }

    /// Frames not yet handed out.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        (self.end - self.next) / PAGE_SIZE
    }

    /// Whether `page` belongs to the pool (handed out or not).
    #[must_use]
    pub const fn contains(page: PhysicalPage) -> bool {
        let pa = page.base().as_u64();
        pa >= KERNEL_PAGETABLE_ADDR && pa < KERNEL_PAGETABLE_ADDR + KERNEL_PAGETABLE_FRAMES * PAGE_SIZE
    }
}

impl Default for KernelTablePool {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAlloc for KernelTablePool {
    /// Hand out the next reserved frame, zeroed; `None` once the pool is used up.
    fn alloc_4k<M: PhysMapper + ?Sized>(&mut self, mem: &mut M) -> Option<PhysicalPage> {
        if self.next + PAGE_SIZE > self.end {
            return None;
        }
        let page = PhysicalPage::containing(PhysicalAddress::new(self.next));
        self.next += PAGE_SIZE;
        mem.zero_frame(page);
        Some(page)
    }
}
