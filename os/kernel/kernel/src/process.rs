//! # Process Table

use core::ops::{Index, IndexMut};
use kernel_info::process::{NPROC, Pid};
use kernel_syscall::RegisterState;
use kernel_vmem::AddressSpace;

/// Lifecycle state of a process slot.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum ProcState {
    /// Unused slot.
    #[default]
    Free,
    /// Ready to run.
    Runnable,
    /// Waiting; nothing blocks yet.
    Blocked,
    /// Took a fault; never scheduled again.
    Broken,
}

/// A process descriptor.
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    /// Address space; `None` for free slots.
    pub space: Option<AddressSpace>,
    /// Registers saved at the last trap.
    pub regs: RegisterState,
    pub state: ProcState,
}

impl Process {
    fn free(pid: Pid) -> Self {
        Self {
            pid,
            space: None,
            regs: RegisterState::default(),
            state: ProcState::Free,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.state == ProcState::Runnable
    }

    #[inline]
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == ProcState::Free
    }
}

/// Fixed registry of [`NPROC`] descriptors. Slot 0 is never used.
pub struct ProcessTable {
    procs: [Process; NPROC],
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// All slots free.
    #[must_use]
    pub fn new() -> Self {
        Self {
            procs: core::array::from_fn(|slot| {
                Process::free(Pid::new(slot).unwrap_or(Pid::NONE))
            }),
        }
    }

    /// Lowest free slot, if any.
    #[must_use]
    pub fn first_free(&self) -> Option<Pid> {
        Pid::all().find(|&pid| self[pid].is_free())
    }

    /// Descriptors of every non-free slot.
    pub fn live(&self) -> impl Iterator<Item = &Process> + '_ {
        self.procs[1..].iter().filter(|p| !p.is_free())
    }

    #[must_use]
    pub fn count(&self, state: ProcState) -> usize {
        self.procs[1..].iter().filter(|p| p.state == state).count()
    }
}

impl Index<Pid> for ProcessTable {
    type Output = Process;

    fn index(&self, pid: Pid) -> &Self::Output {
        &self.procs[pid.index()]
    }
}

impl IndexMut<Pid> for ProcessTable {
    fn index_mut(&mut self, pid: Pid) -> &mut Self::Output {
        &mut self.procs[pid.index()]
    }
}
