//! Kernel and process address-space plumbing.

use crate::KernelError;
use kernel_alloc::{FrameAllocator, FrameError, FrameOwner, KernelTablePool};
use kernel_info::memory::{
    KERNEL_ENTRY_ADDR, KERNEL_PAGETABLE_FRAMES, KERNEL_STACK_TOP, MEMSIZE_PHYSICAL,
    MEMSIZE_VIRTUAL, PROC_START_ADDR,
};
use kernel_info::process::Pid;
use kernel_vmem::{
    AddressSpace, FRAME_BYTES, MapError, PAGE_SIZE, PagePermissions, PhysMapper, PhysicalAddress,
    PhysicalPage, VirtualAddress,
};
use log::{debug, trace};

/// Identity-map physical memory into a fresh kernel address space.
///
/// Everything from the second page up to [`MEMSIZE_PHYSICAL`] is mapped, the
/// null page is left out so null dereferences fault. Kernel memory below
/// [`PROC_START_ADDR`] ends up supervisor-only.
pub fn build_kernel_space<M: PhysMapper + ?Sized>(mem: &mut M) -> Result<AddressSpace, MapError> {
    let mut pool = KernelTablePool::new();
    let space = AddressSpace::new(mem, &mut pool)?;

    // Bootstrap: all of memory, user-accessible.
    let mut it = space.cursor(mem, VirtualAddress::new(PAGE_SIZE));
    while it.va().as_u64() < MEMSIZE_PHYSICAL {
        let page = identity(it.va());
        it.map(mem, &mut pool, page, PagePermissions::USER_RW)?;
        it.advance(mem);
    }

    // Then take kernel memory and the I/O hole away from user mode.
    for va in (PAGE_SIZE..PROC_START_ADDR).step_by(FRAME_BYTES) {
        let va = VirtualAddress::new(va);
        space.map(mem, &mut pool, va, identity(va), PagePermissions::KERNEL_RW)?;
    }

    debug!(
        "kernel page table uses {} reserved frames",
        KERNEL_PAGETABLE_FRAMES - pool.remaining()
    );
    Ok(space)
}

/// Validate an address space before it is loaded into CR3.
///
/// The trap entry code and the kernel stack must be reachable from `space`,
/// and each of the two page tables must be reachable from the other so the
/// kernel can keep working after the switch.
pub fn check_pagetable<M: PhysMapper + ?Sized>(
    mem: &M,
    kernel: AddressSpace,
    space: AddressSpace,
) -> Result<(), KernelError> {
    let root = space.root_page();
    let checks = [
        (space, KERNEL_ENTRY_ADDR, "trap entry page is not identity mapped"),
        (
            space,
            KERNEL_STACK_TOP - PAGE_SIZE,
            "kernel stack is not identity mapped",
        ),
        (
            kernel,
            root.base().as_u64(),
            "kernel page table does not map this page table",
        ),
        (
            space,
            kernel.root_page().base().as_u64(),
            "page table does not map the kernel page table",
        ),
    ];
    for (walked, pa, reason) in checks {
        let found = walked.translate(mem, VirtualAddress::new(pa));
        if found.map(|t| t.pa.as_u64()) != Some(pa) {
            return Err(KernelError::BadPageTable { root, reason });
        }
    }
    Ok(())
}

/// Allocate a root for `pid` and alias the kernel's mappings below
/// [`PROC_START_ADDR`] into it.
///
/// Table frames are charged to the process; the aliased leaves point at the
/// kernel's frames and are never freed by the process. On error the partial
/// space is returned alongside, so the caller can tear it down.
pub fn new_process_space<M: PhysMapper + ?Sized>(
    mem: &mut M,
    frames: &mut FrameAllocator,
    kernel: AddressSpace,
    pid: Pid,
) -> Result<AddressSpace, (Option<AddressSpace>, MapError)> {
    let mut alloc = frames.for_owner(FrameOwner::Process(pid));
    let space = AddressSpace::new(mem, &mut alloc).map_err(|e| (None, e))?;

    let mut it = kernel.cursor(mem, VirtualAddress::zero());
    while it.va().as_u64() < PROC_START_ADDR {
        if let Some(page) = it.page() {
            space
                .map(mem, &mut alloc, it.va(), page, it.perm())
                .map_err(|e| (Some(space), e))?;
        }
        it.advance(mem);
    }
    trace!("process {pid} page table at {}", space.root_page());
    Ok(space)
}

/// Free everything `pid` owns in `space`: user leaves, intermediate tables
/// and the root, in that order.
///
/// Leaves that are not charged to `pid` (kernel aliases) stay untouched.
pub fn release_space<M: PhysMapper + ?Sized>(
    mem: &M,
    frames: &mut FrameAllocator,
    space: AddressSpace,
    pid: Pid,
) -> Result<(), FrameError> {
    let owner = FrameOwner::Process(pid);
    let start = VirtualAddress::new(PROC_START_ADDR);
    let end = VirtualAddress::new(MEMSIZE_VIRTUAL);

    let mut leaves = 0;
    for m in space.mappings(mem, start, end) {
        if frames.owner(m.page) == owner {
            frames.free(m.page.base())?;
            leaves += 1;
        }
    }

    let mut tables = 0;
    for node in space.table_nodes(mem) {
        let previous = frames.free(node.page.base())?;
        debug_assert_eq!(previous, owner, "{} at {} not owned by {pid}", node.level.name(), node.va);
        tables += 1;
    }

    frames.free(space.root_page().base())?;
    debug!("process {pid}: released {leaves} pages and {} table frames", tables + 1);
    Ok(())
}

const fn identity(va: VirtualAddress) -> PhysicalPage {
    PhysicalPage::containing(PhysicalAddress::new(va.as_u64()))
}
