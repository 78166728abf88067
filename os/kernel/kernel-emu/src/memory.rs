//! Installed physical memory.

use kernel_info::memory::NPAGES;
use kernel_memory_addresses::PhysicalPage;
use kernel_vmem::{PageFrame, PhysMapper};

/// [`NPAGES`] frames of RAM on the host heap, identity indexed by frame
/// number.
pub struct PhysicalMemory {
    frames: Vec<PageFrame>,
}

impl Default for PhysicalMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalMemory {
    /// All-zero memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: vec![PageFrame::zeroed(); NPAGES],
        }
    }
}

impl PhysMapper for PhysicalMemory {
    /// # Panics
    /// Accesses beyond installed memory are a bug in the page tables and
    /// panic like a machine check would stop real hardware.
    fn frame(&self, page: PhysicalPage) -> &PageFrame {
        &self.frames[page.number()]
    }

    fn frame_mut(&mut self, page: PhysicalPage) -> &mut PageFrame {
        &mut self.frames[page.number()]
    }
}
