//! # Hosted Machine
//!
//! Everything the kernel needs from hardware, provided by an ordinary
//! process: physical memory ([`PhysicalMemory`]), a CPU that interprets a
//! small user-mode instruction set through the kernel's page tables
//! ([`EmulatedCpu`]), a timer that fires every few instructions, and a
//! power button that is pressed once nothing has happened for a while.
//!
//! User programs are written with the [`Assembler`], packed as ELF files by
//! [`ElfWriter`] and loaded by the kernel's own ELF loader, exactly as a
//! boot loader would hand them over.
//!
//! ```text
//! programs ─► Assembler ─► ElfWriter ─► ElfProgram ─► Kernel::boot
//!                                                         │
//!                         EmulatedCpu ◄─── Kernel::run ◄──┘
//! ```
//!
//! ## Tracing
//!
//! [`EmuLogger`] routes `log` records to stderr through [`emu_trace!`].
//! Building without the `enabled` feature turns all of it into no-ops.

pub mod asm;
pub mod cpu;
pub mod elf;
pub mod isa;
mod logger;
pub mod memory;
pub mod programs;

pub use crate::asm::{AsmError, Assembler, Label};
pub use crate::cpu::{CpuStats, EmuConfig, EmulatedCpu};
pub use crate::elf::ElfWriter;
pub use crate::logger::EmuLogger;
pub use crate::memory::PhysicalMemory;

use kernel::{ElfError, ElfProgram, Kernel, KernelConfig, KernelError, ProgramImage};

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("program {index} is not a loadable ELF image: {source}")]
    Elf { index: usize, source: ElfError },
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Asm(#[from] AsmError),
}

/// Parse `images` as ELF executables and boot a kernel on fresh memory
/// with one process per image.
///
/// # Errors
/// [`EmuError::Elf`] for an image the loader rejects, otherwise whatever
/// [`Kernel::boot`] reports.
pub fn boot_images(
    images: &[Vec<u8>],
    config: KernelConfig,
) -> Result<Kernel<PhysicalMemory>, EmuError> {
    let programs = images
        .iter()
        .enumerate()
        .map(|(index, bytes)| {
            ElfProgram::parse(bytes).map_err(|source| EmuError::Elf { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&dyn ProgramImage> = programs.iter().map(|p| p as &dyn ProgramImage).collect();
    Ok(Kernel::boot(PhysicalMemory::new(), config, &refs)?)
}

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod emu_fmt {
    use std::fmt;
    use std::io::{self, Write};

    #[doc(hidden)]
    pub fn emu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = io::stderr().lock().write_fmt(args);
    }

    pub fn flush() {
        let _ = io::stderr().flush();
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod emu_fmt {
    use std::fmt;

    #[doc(hidden)]
    #[inline(always)]
    pub fn emu_write(_: fmt::Arguments) {}

    pub fn flush() {}
}

/// Write formatted text to the emulator's trace output (stderr).
#[macro_export]
macro_rules! emu_trace {
    ($($arg:tt)*) => {{
        $crate::emu_fmt::emu_write(core::format_args!($($arg)*));
    }};
}
