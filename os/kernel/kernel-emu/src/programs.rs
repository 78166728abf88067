//! # Demo Programs
//!
//! User programs for the emulator, assembled at run time and packed as ELF
//! executables. Each function returns the image bytes; parse them with
//! [`ElfProgram::parse`](kernel::ElfProgram::parse) to boot them.
//!
//! All programs start at [`PROC_START_ADDR`] and keep their state in
//! callee-saved registers (`rbx`, `r12`..`r15`), which system calls leave
//! untouched.

use crate::asm::{AsmError, Assembler};
use crate::elf::ElfWriter;
use core::fmt;
use core::str::FromStr;
use kernel_info::memory::PROC_START_ADDR;
use kernel_syscall::{Reg, Sysno};
use kernel_vmem::PAGE_SIZE;

/// First code byte of every program.
pub const CODE_ADDR: u64 = PROC_START_ADDR;

/// Read-only strings.
pub const RODATA_ADDR: u64 = PROC_START_ADDR + PAGE_SIZE;

/// Writable page of [`counter`].
pub const COUNTER_ADDR: u64 = PROC_START_ADDR + 2 * PAGE_SIZE;

/// First heap page requested by the allocators.
pub const HEAP_ADDR: u64 = PROC_START_ADDR + 4 * PAGE_SIZE;

/// Page [`fork_writer`] allocates and writes before forking.
pub const SHARED_ADDR: u64 = PROC_START_ADDR + 0x8_0000;

/// What a program does once it is done.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Finish {
    /// Call `exit`.
    Exit,
    /// Yield forever.
    Spin,
}

/// Allocate and touch up to `max_pages` heap pages, yielding after each;
/// stop early when `page_alloc` fails. Each page's first byte is the pid.
///
/// # Errors
/// Only if the generated code is malformed.
pub fn allocator(max_pages: u32, finish: Finish) -> Result<Vec<u8>, AsmError> {
    let mut a = Assembler::new();
    allocate_loop(&mut a, max_pages, finish);
    Ok(ElfWriter::new(CODE_ADDR).text(CODE_ADDR, &a.finish()?).write())
}

/// Fork twice, then run [`allocator`] in all four processes.
///
/// # Errors
/// Only if the generated code is malformed.
pub fn fork_allocator(max_pages: u32, finish: Finish) -> Result<Vec<u8>, AsmError> {
    let mut a = Assembler::new();
    let failed = a.label();
    for _ in 0..2 {
        a.sys(Sysno::Fork);
        a.js(Reg::Rax, failed);
    }
    allocate_loop(&mut a, max_pages, finish);
    a.bind(failed);
    panic_with(&mut a, RODATA_ADDR);

    Ok(ElfWriter::new(CODE_ADDR)
        .text(CODE_ADDR, &a.finish()?)
        .text(RODATA_ADDR, b"fork failed\0")
        .write())
}

/// Allocate [`SHARED_ADDR`], write `P` to it and fork; the child then
/// overwrites its copy with `C`. Both spin afterwards.
///
/// # Errors
/// Only if the generated code is malformed.
pub fn fork_writer() -> Result<Vec<u8>, AsmError> {
    let mut a = Assembler::new();
    let parent = a.label();
    let failed = a.label();
    let spin = a.label();

    a.mov_imm(Reg::R12, SHARED_ADDR);
    a.sys1(Sysno::PageAlloc, Reg::R12);
    a.js(Reg::Rax, failed);
    a.mov_imm(Reg::R13, u64::from(b'P'));
    a.store8(Reg::R12, Reg::R13);
    a.sys(Sysno::Fork);
    a.js(Reg::Rax, failed);
    a.jnz(Reg::Rax, parent);
    a.mov_imm(Reg::R13, u64::from(b'C'));
    a.store8(Reg::R12, Reg::R13);
    a.bind(parent);
    a.bind(spin);
    a.sys(Sysno::Yield);
    a.jmp(spin);
    a.bind(failed);
    panic_with(&mut a, RODATA_ADDR);

    Ok(ElfWriter::new(CODE_ADDR)
        .text(CODE_ADDR, &a.finish()?)
        .text(RODATA_ADDR, b"fork_writer: system call failed\0")
        .write())
}

/// Increment the byte at [`COUNTER_ADDR`] and yield, forever. The counter
/// lives in a zero-initialized writable segment.
///
/// # Errors
/// Only if the generated code is malformed.
pub fn counter() -> Result<Vec<u8>, AsmError> {
    let mut a = Assembler::new();
    let top = a.label();
    a.mov_imm(Reg::R12, COUNTER_ADDR);
    a.bind(top);
    a.load8(Reg::Rbx, Reg::R12);
    a.add_imm(Reg::Rbx, 1);
    a.store8(Reg::R12, Reg::Rbx);
    a.sys(Sysno::Yield);
    a.jmp(top);

    Ok(ElfWriter::new(CODE_ADDR)
        .text(CODE_ADDR, &a.finish()?)
        .data(COUNTER_ADDR, &[], PAGE_SIZE)
        .write())
}

/// Yield `yields` times, then touch `addr` (a write if `write`).
///
/// # Errors
/// Only if the generated code is malformed.
pub fn faulter(yields: u32, addr: u64, write: bool) -> Result<Vec<u8>, AsmError> {
    let mut a = Assembler::new();
    let top = a.label();
    let touch = a.label();
    a.mov_imm(Reg::R14, u64::from(yields));
    a.bind(top);
    a.jz(Reg::R14, touch);
    a.sys(Sysno::Yield);
    a.add_imm(Reg::R14, -1);
    a.jmp(top);
    a.bind(touch);
    a.mov_imm(Reg::R12, addr);
    if write {
        a.store8(Reg::R12, Reg::R12);
    } else {
        a.load8(Reg::Rbx, Reg::R12);
    }
    // Never reached once the fault breaks the process.
    a.sys(Sysno::Exit);

    Ok(ElfWriter::new(CODE_ADDR).text(CODE_ADDR, &a.finish()?).write())
}

/// `rounds` times: fork a child that allocates `child_pages` pages and
/// exits, then yield. Exits afterwards. Failed forks are skipped.
///
/// # Errors
/// Only if the generated code is malformed.
pub fn forkexit(rounds: u32, child_pages: u32) -> Result<Vec<u8>, AsmError> {
    let mut a = Assembler::new();
    let round = a.label();
    let child = a.label();

    a.mov_imm(Reg::R14, u64::from(rounds));
    a.bind(round);
    a.sys(Sysno::Fork);
    a.jz(Reg::Rax, child);
    a.sys(Sysno::Yield);
    a.add_imm(Reg::R14, -1);
    a.jnz(Reg::R14, round);
    a.sys(Sysno::Exit);

    a.bind(child);
    allocate_loop(&mut a, child_pages, Finish::Exit);

    Ok(ElfWriter::new(CODE_ADDR).text(CODE_ADDR, &a.finish()?).write())
}

/// Shared body of the allocating programs.
fn allocate_loop(a: &mut Assembler, max_pages: u32, finish: Finish) {
    let top = a.label();
    let done = a.label();

    a.sys(Sysno::GetPid);
    a.mov(Reg::R13, Reg::Rax);
    a.mov_imm(Reg::R12, HEAP_ADDR);
    a.mov_imm(Reg::R15, u64::from(max_pages));
    a.jz(Reg::R15, done);
    a.bind(top);
    a.sys1(Sysno::PageAlloc, Reg::R12);
    a.js(Reg::Rax, done);
    a.store8(Reg::R12, Reg::R13);
    a.add_imm(Reg::R12, 0x1000);
    a.sys(Sysno::Yield);
    a.add_imm(Reg::R15, -1);
    a.jnz(Reg::R15, top);
    a.bind(done);
    match finish {
        Finish::Exit => a.sys(Sysno::Exit),
        Finish::Spin => {
            let spin = a.label();
            a.bind(spin);
            a.sys(Sysno::Yield);
            a.jmp(spin);
        }
    }
}

fn panic_with(a: &mut Assembler, message: u64) {
    a.mov_imm(Reg::Rbx, message);
    a.sys1(Sysno::Panic, Reg::Rbx);
}

/// The program sets the `weensy` binary can boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Demo {
    /// Four allocators that fill memory, then idle.
    Alloc,
    /// One process forks into four allocators.
    Fork,
    /// A process that keeps forking short-lived allocating children.
    ForkExit,
}

impl Demo {
    pub const ALL: [Self; 3] = [Self::Alloc, Self::Fork, Self::ForkExit];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Alloc => "alloc",
            Self::Fork => "fork",
            Self::ForkExit => "forkexit",
        }
    }

    /// ELF images to boot, in pid order.
    ///
    /// # Errors
    /// Only if the generated code is malformed.
    pub fn images(self) -> Result<Vec<Vec<u8>>, AsmError> {
        match self {
            Self::Alloc => (0..4).map(|_| allocator(u32::MAX, Finish::Spin)).collect(),
            Self::Fork => Ok(vec![fork_allocator(u32::MAX, Finish::Spin)?]),
            Self::ForkExit => Ok(vec![forkexit(64, 8)?]),
        }
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown program set {0:?} (expected alloc, fork or forkexit)")]
pub struct UnknownDemo(pub String);

impl FromStr for Demo {
    type Err = UnknownDemo;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| UnknownDemo(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::{ElfProgram, ProgramImage};

    #[test]
    fn every_program_is_a_loadable_image() {
        let images = [
            allocator(3, Finish::Exit),
            fork_allocator(3, Finish::Spin),
            fork_writer(),
            counter(),
            faulter(2, 0x4_0000, true),
            forkexit(2, 2),
        ];
        for image in images {
            let bytes = image.expect("assembles");
            let elf = ElfProgram::parse(&bytes).expect("parses");
            let elf: &dyn ProgramImage = &elf;
            assert_eq!(elf.entry().as_u64(), CODE_ADDR);
            for segment in elf.segments() {
                segment.validate().expect("fits in application memory");
            }
        }
    }

    #[test]
    fn demo_names_round_trip() {
        for demo in Demo::ALL {
            assert_eq!(demo.name().parse::<Demo>(), Ok(demo));
        }
        assert_eq!(
            "shell".parse::<Demo>(),
            Err(UnknownDemo("shell".to_owned()))
        );
        assert_eq!(Demo::Alloc.images().expect("images").len(), 4);
    }
}
