//! # Trap ABI
//!
//! Everything both sides of the user/kernel boundary have to agree on:
//!
//! - [`RegisterState`]: the register file saved at trap entry and restored on
//!   return to user mode,
//! - the trap numbers in [`trap`] and the [`PageFaultError`] word,
//! - the system call numbers in [`Sysno`] and their return conventions.
//!
//! ## Calling convention
//!
//! ```text
//!   rax  ← system call number        rax → result (or SYSCALL_FAILED)
//!   rdi  ← first argument
//!   `syscall` instruction → trap INT_SYSCALL, rip already past the instruction
//! ```

#![cfg_attr(not(test), no_std)]

pub mod regs;
pub mod syscall;
pub mod trap;

pub use crate::regs::{Reg, RegisterState};
pub use crate::syscall::{SYSCALL_FAILED, Sysno, UnknownSyscall};
pub use crate::trap::PageFaultError;
