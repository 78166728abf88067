//! # Memory Layout

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Start of the kernel image; the trap entry code sits on this page.
pub const KERNEL_START_ADDR: u64 = 0x4_0000;

/// Address of the exception entry trampoline. Every address space must map it
/// identically, otherwise the next trap cannot reach the kernel.
pub const KERNEL_ENTRY_ADDR: u64 = KERNEL_START_ADDR;

/// Kernel page tables are statically reserved inside the kernel data range.
pub const KERNEL_PAGETABLE_ADDR: u64 = 0x5_B000;

/// Number of frames reserved at [`KERNEL_PAGETABLE_ADDR`].
pub const KERNEL_PAGETABLE_FRAMES: u64 = 5;

/// End (exclusive) of kernel code and data.
pub const KERNEL_END_ADDR: u64 = 0x6_0000;

/// Top of the single kernel stack page.
pub const KERNEL_STACK_TOP: u64 = 0x8_0000;

/// Start of the legacy I/O hole (VGA, option ROMs, BIOS).
pub const IO_PHYS_MEM: u64 = 0xA_0000;

/// End of the legacy I/O hole.
pub const EXT_PHYS_MEM: u64 = 0x10_0000;

/// First virtual address that belongs to an application.
pub const PROC_START_ADDR: u64 = 0x10_0000;

/// Installed physical memory.
pub const MEMSIZE_PHYSICAL: u64 = 0x20_0000;

/// Number of physical frames.
#[allow(clippy::cast_possible_truncation)]
pub const NPAGES: usize = (MEMSIZE_PHYSICAL / PAGE_SIZE) as usize;

/// Top of every process address space.
pub const MEMSIZE_VIRTUAL: u64 = 0x30_0000;

/// Fixed virtual address of each process's stack page.
pub const PROC_STACK_ADDR: u64 = MEMSIZE_VIRTUAL - PAGE_SIZE;

const _: () = {
    assert!(KERNEL_START_ADDR.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_END_ADDR.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_PAGETABLE_ADDR >= KERNEL_START_ADDR);
    assert!(KERNEL_PAGETABLE_ADDR + KERNEL_PAGETABLE_FRAMES * PAGE_SIZE <= KERNEL_END_ADDR);
    assert!(KERNEL_END_ADDR <= KERNEL_STACK_TOP - PAGE_SIZE);
    assert!(KERNEL_STACK_TOP <= IO_PHYS_MEM);
    assert!(PROC_START_ADDR >= EXT_PHYS_MEM);
    assert!(MEMSIZE_PHYSICAL > PROC_START_ADDR);
    assert!(MEMSIZE_VIRTUAL >= MEMSIZE_PHYSICAL);
};

/// Physical ranges nobody may own: the null page and the I/O hole.
#[must_use]
pub const fn is_reserved(pa: PhysicalAddress) -> bool {
    let pa = pa.as_u64();
    pa < PAGE_SIZE || (pa >= IO_PHYS_MEM && pa < EXT_PHYS_MEM)
}

/// Kernel code, data and the kernel stack page.
#[must_use]
pub const fn is_kernel(pa: PhysicalAddress) -> bool {
    let pa = pa.as_u64();
    (pa >= KERNEL_START_ADDR && pa < KERNEL_END_ADDR)
        || (pa >= KERNEL_STACK_TOP - PAGE_SIZE && pa < KERNEL_STACK_TOP)
}

/// Whether the frame allocator may hand out the frame containing `pa`.
#[must_use]
pub const fn is_allocatable(pa: PhysicalAddress) -> bool {
    pa.as_u64() < MEMSIZE_PHYSICAL && !is_reserved(pa) && !is_kernel(pa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocatable_excludes_fixed_ranges() {
        let pa = PhysicalAddress::new;
        assert!(!is_allocatable(pa(0)));
        assert!(is_allocatable(pa(0x1000)));
        assert!(!is_allocatable(pa(KERNEL_START_ADDR)));
        assert!(!is_allocatable(pa(KERNEL_PAGETABLE_ADDR)));
        assert!(is_allocatable(pa(KERNEL_END_ADDR)));
        assert!(!is_allocatable(pa(KERNEL_STACK_TOP - 1)));
        assert!(is_allocatable(pa(KERNEL_STACK_TOP)));
        assert!(!is_allocatable(pa(0xB_8000)));
        assert!(is_allocatable(pa(EXT_PHYS_MEM)));
        assert!(is_allocatable(pa(MEMSIZE_PHYSICAL - PAGE_SIZE)));
        assert!(!is_allocatable(pa(MEMSIZE_PHYSICAL)));
    }

    #[test]
    fn reserved_is_only_null_page_and_io_hole() {
        assert!(is_reserved(PhysicalAddress::new(0x800)));
        assert!(is_reserved(PhysicalAddress::new(IO_PHYS_MEM)));
        assert!(!is_reserved(PhysicalAddress::new(KERNEL_START_ADDR)));
        assert!(!is_reserved(PhysicalAddress::new(EXT_PHYS_MEM)));
    }
}
