//! # Kernel Core
//!
//! A single-CPU kernel for cooperating user processes: it owns physical
//! memory, builds one x86-64 address space per process, and turns every trap
//! (system call, timer tick, page fault) into a decision about which process
//! runs next.
//!
//! ## Structure
//!
//! ```text
//!              ┌────────────┐  resume(root, regs)   ┌───────────────┐
//!   Kernel ────►  run loop  ├───────────────────────►  Cpu (seam)   │
//!              │            ◄───────────────────────┤               │
//!              └─────┬──────┘        Trap           └───────────────┘
//!                    │ exception()
//!        ┌───────────┼──────────────┬──────────────┐
//!        ▼           ▼              ▼              ▼
//!     syscall     timer tick    page fault     anything else
//!   (lifecycle)   (schedule)    (BROKEN or      (fatal)
//!                                 fatal)
//! ```
//!
//! Everything the kernel mutates lives in one [`Kernel`] value: physical
//! memory (behind a [`PhysMapper`](kernel_vmem::PhysMapper)), the
//! [`FrameAllocator`](kernel_alloc::FrameAllocator), the kernel address space
//! and the [`ProcessTable`]. A trap handler borrows it exclusively for the
//! duration of the trap; `current` is a [`Pid`](kernel_info::process::Pid),
//! never a reference.
//!
//! ## Halting
//!
//! Conditions a bare-metal kernel would `panic` on are returned as
//! [`KernelError`] from [`Kernel::run`]. The embedding decides what halting
//! means; a user-level fault only marks the faulting process
//! [`ProcState::Broken`].

#![cfg_attr(not(test), no_std)]

mod config;
mod cpu;
pub mod elf;
mod error;
mod lifecycle;
pub mod memusage;
mod process;
pub mod program;
mod scheduler;
mod syscall;
mod trap;
mod vm;

#[cfg(test)]
mod testing;

pub use crate::config::KernelConfig;
pub use crate::cpu::{Cpu, Dispatch, Shutdown, Trap};
pub use crate::elf::{ElfError, ElfProgram};
pub use crate::error::{KernelError, PanicMessage};
pub use crate::memusage::{MemoryUsage, PageError, UsageFlags};
pub use crate::process::{ProcState, Process, ProcessTable};
pub use crate::program::{ProgramError, ProgramImage, Segment, Segments};
pub use crate::scheduler::next_runnable;

use core::time::Duration;
use kernel_alloc::FrameAllocator;
use kernel_info::process::{NPROC, Pid};
use kernel_vmem::{AddressSpace, PhysMapper};
use log::info;

/// The whole mutable state of the machine, as far as the kernel is concerned.
pub struct Kernel<M: PhysMapper> {
    mem: M,
    frames: FrameAllocator,
    kernel_space: AddressSpace,
    procs: ProcessTable,
    current: Pid,
    ticks: u64,
    config: KernelConfig,
    last_audit_tick: u64,
    audit_errors: usize,
}

impl<M: PhysMapper> Kernel<M> {
    /// Build the kernel address space and load one process per program.
    ///
    /// Programs get pids `1..=programs.len()` in order.
    ///
    /// # Errors
    /// - [`KernelError::TooManyPrograms`] if the programs do not fit in the
    ///   process table.
    /// - [`KernelError::KernelMapping`] if the kernel page table cannot be
    ///   built.
    /// - Any loading error from [`KernelError::Program`] or
    ///   [`KernelError::OutOfMemory`].
    pub fn boot(
        mut mem: M,
        config: KernelConfig,
        programs: &[&dyn ProgramImage],
    ) -> Result<Self, KernelError> {
        if programs.len() >= NPROC {
            return Err(KernelError::TooManyPrograms(programs.len()));
        }

        info!("Building kernel page table ...");
        let kernel_space = vm::build_kernel_space(&mut mem)?;
        info!("Kernel page table at {}", kernel_space.root_page());

        let mut kernel = Self {
            mem,
            frames: FrameAllocator::new(),
            kernel_space,
            procs: ProcessTable::new(),
            current: Pid::NONE,
            ticks: 1,
            config,
            last_audit_tick: 0,
            audit_errors: 0,
        };

        for (pid, image) in Pid::all().zip(programs) {
            kernel.process_setup(pid, *image)?;
        }
        info!(
            "Loaded {} programs; {} frames free",
            programs.len(),
            kernel.frames.free_count()
        );
        Ok(kernel)
    }

    #[must_use]
    pub const fn mem(&self) -> &M {
        &self.mem
    }

    pub const fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    #[must_use]
    pub const fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace {
        self.kernel_space
    }

    #[must_use]
    pub const fn processes(&self) -> &ProcessTable {
        &self.procs
    }

    #[must_use]
    pub fn process(&self, pid: Pid) -> &Process {
        &self.procs[pid]
    }

    /// The process that took the last trap, or [`Pid::NONE`] before the
    /// first one ran.
    #[must_use]
    pub const fn current(&self) -> Pid {
        self.current
    }

    /// Timer interrupts so far (starts at 1).
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Time since boot as counted by timer interrupts.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        let hz = u64::from(self.config.hz.max(1));
        Duration::from_millis((self.ticks - 1) * 1000 / hz)
    }

    /// Page-table errors reported by the memory-usage audit so far.
    #[must_use]
    pub const fn audit_errors(&self) -> usize {
        self.audit_errors
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Give back physical memory, e.g. to inspect it after shutdown.
    pub fn into_mem(self) -> M {
        self.mem
    }
}
