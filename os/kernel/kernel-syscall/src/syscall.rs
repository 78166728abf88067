//! # System Call Numbers

/// Return value of a failed system call (−1 as seen by user code).
pub const SYSCALL_FAILED: u64 = u64::MAX;

/// System calls, selected by `rax`.
#[repr(u64)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Sysno {
    /// Returns the caller's pid.
    GetPid = 1,
    /// Gives up the CPU; returns 0.
    Yield = 2,
    /// Halts the machine with the NUL-terminated message at `rdi`.
    Panic = 3,
    /// Maps a fresh zeroed page at the page-aligned address in `rdi`.
    /// Returns 0, or [`SYSCALL_FAILED`].
    PageAlloc = 4,
    /// Duplicates the caller. Returns the child pid in the parent, 0 in the
    /// child, or [`SYSCALL_FAILED`].
    Fork = 5,
    /// Terminates the caller. Does not return.
    Exit = 6,
}

/// A system call number nobody implements.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown system call {0}")]
pub struct UnknownSyscall(pub u64);

impl TryFrom<u64> for Sysno {
    type Error = UnknownSyscall;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::GetPid,
            2 => Self::Yield,
            3 => Self::Panic,
            4 => Self::PageAlloc,
            5 => Self::Fork,
            6 => Self::Exit,
            other => return Err(UnknownSyscall(other)),
        })
    }
}

impl From<Sysno> for u64 {
    fn from(value: Sysno) -> Self {
        value as Self
    }
}
