//! Fatal kernel conditions.

use crate::program::ProgramError;
use core::fmt;
use kernel_alloc::FrameError;
use kernel_info::process::Pid;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_syscall::PageFaultError;
use kernel_vmem::MapError;

/// Longest panic message read from user memory.
pub const PANIC_MESSAGE_MAX: usize = 80;

/// Everything that halts the machine.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("invalid frame operation: {0}")]
    Frame(#[from] FrameError),
    #[error("bad page table {root}: {reason}")]
    BadPageTable {
        root: PhysicalPage,
        reason: &'static str,
    },
    #[error(
        "kernel page fault for {addr} ({} {}, rip={rip:#x})",
        .err.operation(),
        .err.problem()
    )]
    KernelPageFault {
        addr: VirtualAddress,
        rip: u64,
        err: PageFaultError,
    },
    #[error("unexpected exception {0}")]
    UnexpectedTrap(u64),
    #[error("unexpected system call {number} from process {pid}")]
    UnexpectedSyscall { pid: Pid, number: u64 },
    #[error("cannot allocate memory for process {pid}")]
    OutOfMemory { pid: Pid },
    #[error("process {pid} panicked: {message}")]
    UserPanic { pid: Pid, message: PanicMessage },
    #[error("cannot load program for process {pid}")]
    Program { pid: Pid, source: ProgramError },
    #[error("cannot build the kernel page table")]
    KernelMapping(#[from] MapError),
    #[error("{0} programs do not fit in the process table")]
    TooManyPrograms(usize),
}

/// A NUL-terminated message copied out of user memory, truncated to
/// [`PANIC_MESSAGE_MAX`] bytes.
#[derive(Clone, Eq, PartialEq)]
pub struct PanicMessage {
    buf: [u8; PANIC_MESSAGE_MAX],
    len: usize,
}

impl PanicMessage {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            buf: [0; PANIC_MESSAGE_MAX],
            len: 0,
        }
    }

    /// Append a byte; returns `false` once the buffer is full.
    pub(crate) const fn push(&mut self, byte: u8) -> bool {
        if self.len == PANIC_MESSAGE_MAX {
            return false;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        true
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The message up to the first byte that is not valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.as_bytes()[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for PanicMessage {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("(no message)")
        } else {
            f.write_str(self.as_str())
        }
    }
}

impl fmt::Debug for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
