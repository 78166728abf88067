//! The boundary between the kernel and the processor.

use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_syscall::RegisterState;
use kernel_vmem::PhysMapper;

/// What the processor reports when user code stops running.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Trap {
    /// Registers at trap time, with `intno` and `err` filled in.
    pub regs: RegisterState,
    /// Faulting linear address (CR2); only meaningful for page faults.
    pub cr2: VirtualAddress,
}

/// A processor the kernel can hand control to.
///
/// This is the `exception_return` / trap-entry pair of a hardware kernel:
/// [`resume`](Cpu::resume) loads `root` into CR3, restores `regs`, drops to
/// user mode and comes back with the next trap.
pub trait Cpu {
    /// Run user code until the next trap.
    fn resume<M: PhysMapper + ?Sized>(
        &mut self,
        mem: &mut M,
        root: PhysicalPage,
        regs: &RegisterState,
    ) -> Trap;

    /// Polled after every trap and on every idle scheduler spin; `true` means
    /// the operator asked for the machine to be switched off.
    fn poweroff_requested(&mut self) -> bool;
}

/// What to do after a trap has been handled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Dispatch {
    /// Return to the current process.
    Resume,
    /// Pick the next runnable process.
    Schedule,
}

/// Why [`Kernel::run`](crate::Kernel::run) returned without an error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Shutdown {
    PowerOff,
}
