//! Owner-tracking physical frame allocator.

use core::fmt;
use kernel_info::memory::{NPAGES, is_allocatable};
use kernel_info::process::Pid;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_vmem::{FrameAlloc, PhysMapper, PhysMapperExt};

/// Who holds a frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum FrameOwner {
    #[default]
    Free,
    Kernel,
    Process(Pid),
}

impl FrameOwner {
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for FrameOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Kernel => f.write_str("kernel"),
            Self::Process(pid) => write!(f, "process {pid}"),
        }
    }
}

/// Invalid requests to the frame allocator.
///
/// Any of these from [`FrameAllocator::free`] means a kernel invariant was
/// broken; callers escalate them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("physical address {0} is not page aligned")]
    Unaligned(PhysicalAddress),
    #[error("physical address {0} is reserved or outside allocatable memory")]
    NotAllocatable(PhysicalAddress),
    #[error("frame at {0} is not owned (double free?)")]
    NotOwned(PhysicalAddress),
    #[error("frame at {0} is already owned by {1}")]
    InUse(PhysicalAddress, FrameOwner),
}

/// Ownership table over every frame of installed memory.
///
/// Search order is first-fit from the lowest address, so results are
/// deterministic for a given sequence of calls.
pub struct FrameAllocator {
    owners: [FrameOwner; NPAGES],
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAllocator {
    /// All frames free.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owners: [FrameOwner::Free; NPAGES],
        }
    }

    /// Take the lowest free allocatable frame for `owner` and zero it.
    ///
    /// Returns `None` when memory is exhausted.
    pub fn alloc<M: PhysMapper + ?Sized>(
        &mut self,
        mem: &mut M,
        owner: FrameOwner,
    ) -> Option<PhysicalPage> {
        debug_assert!(!owner.is_free(), "allocating on behalf of nobody");
        let number = (0..NPAGES).find(|&n| {
            self.owners[n].is_free() && is_allocatable(PhysicalPage::from_number(n).base())
        })?;
        let page = PhysicalPage::from_number(number);
        self.claim(mem, page, owner);
        Some(page)
    }

    /// Take the frame at `pa` for `owner` and zero it.
    ///
    /// # Errors
    /// - [`FrameError::Unaligned`] if `pa` is not a frame base.
    /// - [`FrameError::NotAllocatable`] for reserved or kernel frames.
    /// - [`FrameError::InUse`] if somebody already owns it.
    pub fn alloc_at<M: PhysMapper + ?Sized>(
        &mut self,
        mem: &mut M,
        pa: PhysicalAddress,
        owner: FrameOwner,
    ) -> Result<PhysicalPage, FrameError> {
        let page = Self::checked_page(pa)?;
        let current = self.owners[page.number()];
        if !current.is_free() {
            return Err(FrameError::InUse(pa, current));
        }
        self.claim(mem, page, owner);
        Ok(page)
    }

    /// Release the frame at `pa` and return its previous owner.
    ///
    /// # Errors
    /// Freeing an unaligned, reserved or unowned address is reported; the
    /// table is left untouched.
    pub fn free(&mut self, pa: PhysicalAddress) -> Result<FrameOwner, FrameError> {
        let page = Self::checked_page(pa)?;
        let slot = &mut self.owners[page.number()];
        if slot.is_free() {
            return Err(FrameError::NotOwned(pa));
        }
        Ok(core::mem::take(slot))
    }

    /// Current owner of `page`; frames beyond installed memory read as free.
    #[must_use]
    pub fn owner(&self, page: PhysicalPage) -> FrameOwner {
        self.owners
            .get(page.number())
            .copied()
            .unwrap_or(FrameOwner::Free)
    }

    /// Number of frames `alloc` could still hand out.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.iter()
            .filter(|(page, owner)| owner.is_free() && is_allocatable(page.base()))
            .count()
    }

    #[must_use]
    pub fn count_owned_by(&self, owner: FrameOwner) -> usize {
        self.owners.iter().filter(|&&o| o == owner).count()
    }

    /// Every frame with its owner, in address order.
    pub fn iter(&self) -> impl Iterator<Item = (PhysicalPage, FrameOwner)> + '_ {
        self.owners
            .iter()
            .enumerate()
            .map(|(n, &owner)| (PhysicalPage::from_number(n), owner))
    }

    /// A [`FrameAlloc`] that charges every frame to `owner`.
    pub const fn for_owner(&mut self, owner: FrameOwner) -> OwnedFrames<'_> {
        OwnedFrames {
            frames: self,
            owner,
        }
    }

    fn checked_page(pa: PhysicalAddress) -> Result<PhysicalPage, FrameError> {
        let page = PhysicalPage::try_from_addr(pa).ok_or(FrameError::Unaligned(pa))?;
        if !is_allocatable(pa) {
            return Err(FrameError::NotAllocatable(pa));
        }
        Ok(page)
    }

    fn claim<M: PhysMapper + ?Sized>(&mut self, mem: &mut M, page: PhysicalPage, owner: FrameOwner) {
        self.owners[page.number()] = owner;
        mem.zero_frame(page);
    }
}

/// Frame allocator view that charges frames to a fixed owner.
pub struct OwnedFrames<'a> {
    frames: &'a mut FrameAllocator,
    owner: FrameOwner,
}

impl FrameAlloc for OwnedFrames<'_> {
    fn alloc_4k<M: PhysMapper + ?Sized>(&mut self, mem: &mut M) -> Option<PhysicalPage> {
        self.frames.alloc(mem, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::{KERNEL_START_ADDR, KERNEL_STACK_TOP, MEMSIZE_PHYSICAL};
    use kernel_vmem::PageFrame;

    struct Ram(Vec<PageFrame>);

    impl Ram {
        fn new() -> Self {
            Self(vec![PageFrame::zeroed(); NPAGES])
        }
    }

    impl PhysMapper for Ram {
        fn frame(&self, page: PhysicalPage) -> &PageFrame {
            &self.0[page.number()]
        }

        fn frame_mut(&mut self, page: PhysicalPage) -> &mut PageFrame {
            &mut self.0[page.number()]
        }
    }

    fn pid(n: usize) -> FrameOwner {
        FrameOwner::Process(Pid::new(n).expect("valid pid"))
    }

    #[test]
    fn alloc_zero_fills_and_records_owner() {
        let mut ram = Ram::new();
        let mut frames = FrameAllocator::new();

        // Dirty the first allocatable frame.
        ram.0[1].0.fill(0xAA);

        let page = frames.alloc(&mut ram, pid(2)).expect("frame");
        assert_eq!(page, PhysicalPage::from_number(1));
        assert!(ram.frame(page).0.iter().all(|&b| b == 0));
        assert_eq!(frames.owner(page), pid(2));
    }

    #[test]
    fn freed_frames_are_reused() {
        let mut ram = Ram::new();
        let mut frames = FrameAllocator::new();
        let a = frames.alloc(&mut ram, pid(1)).expect("a");
        let b = frames.alloc(&mut ram, pid(1)).expect("b");
        assert_ne!(a, b);

        assert_eq!(frames.free(a.base()), Ok(pid(1)));
        assert_eq!(frames.alloc(&mut ram, pid(3)), Some(a));
        assert_eq!(frames.owner(a), pid(3));
    }

    #[test]
    fn invalid_frees_are_rejected() {
        let mut ram = Ram::new();
        let mut frames = FrameAllocator::new();
        let page = frames.alloc(&mut ram, FrameOwner::Kernel).expect("frame");

        assert_eq!(
            frames.free(page.base() + 8),
            Err(FrameError::Unaligned(page.base() + 8))
        );
        let kernel = PhysicalAddress::new(KERNEL_START_ADDR);
        assert_eq!(frames.free(kernel), Err(FrameError::NotAllocatable(kernel)));
        let beyond = PhysicalAddress::new(MEMSIZE_PHYSICAL);
        assert_eq!(frames.free(beyond), Err(FrameError::NotAllocatable(beyond)));

        assert_eq!(frames.free(page.base()), Ok(FrameOwner::Kernel));
        assert_eq!(
            frames.free(page.base()),
            Err(FrameError::NotOwned(page.base()))
        );
    }

    #[test]
    fn alloc_at_honours_ownership_and_reservations() {
        let mut ram = Ram::new();
        let mut frames = FrameAllocator::new();
        let pa = PhysicalAddress::new(0x15_0000);

        assert_eq!(
            frames.alloc_at(&mut ram, pa, pid(4)),
            Ok(PhysicalPage::from_number(0x150))
        );
        assert_eq!(
            frames.alloc_at(&mut ram, pa, pid(5)),
            Err(FrameError::InUse(pa, pid(4)))
        );
        let stack = PhysicalAddress::new(KERNEL_STACK_TOP - 0x1000);
        assert_eq!(
            frames.alloc_at(&mut ram, stack, pid(5)),
            Err(FrameError::NotAllocatable(stack))
        );
        assert_eq!(
            frames.alloc_at(&mut ram, PhysicalAddress::new(0xB_8000), pid(5)),
            Err(FrameError::NotAllocatable(PhysicalAddress::new(0xB_8000)))
        );
    }

    #[test]
    fn exhaustion_then_recovery() {
        let mut ram = Ram::new();
        let mut frames = FrameAllocator::new();
        let total = frames.free_count();

        let mut taken = Vec::new();
        while let Some(page) = frames.alloc(&mut ram, pid(1)) {
            assert!(is_allocatable(page.base()));
            taken.push(page);
        }
        assert_eq!(taken.len(), total);
        assert_eq!(frames.free_count(), 0);
        assert_eq!(frames.count_owned_by(pid(1)), total);

        for page in &taken {
            frames.free(page.base()).expect("owned");
        }
        assert_eq!(frames.free_count(), total);
        assert_eq!(frames.count_owned_by(pid(1)), 0);
    }

    #[test]
    fn owned_frames_charge_the_owner() {
        let mut ram = Ram::new();
        let mut frames = FrameAllocator::new();
        let page = frames
            .for_owner(pid(7))
            .alloc_4k(&mut ram)
            .expect("frame");
        assert_eq!(frames.owner(page), pid(7));
    }
}
