//! # Saved Register File

use core::fmt;

/// User code segment selector (GDT index 3, RPL 3).
pub const USER_CS: u64 = 0x1B;

/// User data/stack segment selector (GDT index 4, RPL 3).
pub const USER_SS: u64 = 0x23;

/// Interrupt-enable flag in RFLAGS.
pub const RFLAGS_IF: u64 = 1 << 9;

/// Bit 1 of RFLAGS always reads as one.
pub const RFLAGS_FIXED: u64 = 1 << 1;

/// General purpose registers, numbered as in the x86 ModRM encoding.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    pub const ALL: [Self; 16] = [
        Self::Rax,
        Self::Rcx,
        Self::Rdx,
        Self::Rbx,
        Self::Rsp,
        Self::Rbp,
        Self::Rsi,
        Self::Rdi,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    /// Register with encoding `n`; only the low four bits are used.
    #[must_use]
    pub const fn from_encoding(n: u8) -> Self {
        Self::ALL[(n & 0xF) as usize]
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rax => "rax",
            Self::Rcx => "rcx",
            Self::Rdx => "rdx",
            Self::Rbx => "rbx",
            Self::Rsp => "rsp",
            Self::Rbp => "rbp",
            Self::Rsi => "rsi",
            Self::Rdi => "rdi",
            Self::R8 => "r8",
            Self::R9 => "r9",
            Self::R10 => "r10",
            Self::R11 => "r11",
            Self::R12 => "r12",
            Self::R13 => "r13",
            Self::R14 => "r14",
            Self::R15 => "r15",
        }
    }
}

/// Register snapshot of an interrupted user context.
///
/// The trap entry stub pushes the general purpose registers, the trap number
/// and the error word (zero when the hardware pushes none) on top of the
/// interrupt frame; the kernel copies the whole block into the process
/// descriptor before handling the trap.
#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct RegisterState {
    pub gprs: [u64; 16],
    /// Trap number (`INT_*`).
    pub intno: u64,
    /// Hardware error word.
    pub err: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub ss: u64,
}

impl RegisterState {
    /// Fresh user-mode context starting at `rip` with stack pointer `rsp`.
    #[must_use]
    pub fn user(rip: u64, rsp: u64) -> Self {
        let mut regs = Self {
            rip,
            cs: USER_CS,
            ss: USER_SS,
            rflags: RFLAGS_FIXED | RFLAGS_IF,
            ..Self::default()
        };
        regs.set(Reg::Rsp, rsp);
        regs
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, reg: Reg) -> u64 {
        self.gprs[reg as usize]
    }

    #[inline]
    pub const fn set(&mut self, reg: Reg, value: u64) {
        self.gprs[reg as usize] = value;
    }

    #[inline]
    #[must_use]
    pub const fn rax(&self) -> u64 {
        self.get(Reg::Rax)
    }

    #[inline]
    pub const fn set_rax(&mut self, value: u64) {
        self.set(Reg::Rax, value);
    }

    #[inline]
    #[must_use]
    pub const fn rdi(&self) -> u64 {
        self.get(Reg::Rdi)
    }

    #[inline]
    #[must_use]
    pub const fn rsp(&self) -> u64 {
        self.get(Reg::Rsp)
    }

    /// Whether the snapshot was taken in user mode (RPL 3).
    #[inline]
    #[must_use]
    pub const fn is_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

impl fmt::Debug for RegisterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RegisterState");
        for reg in Reg::ALL {
            s.field(reg.name(), &format_args!("{:#x}", self.get(reg)));
        }
        s.field("intno", &self.intno)
            .field("err", &format_args!("{:#x}", self.err))
            .field("rip", &format_args!("{:#x}", self.rip))
            .field("cs", &format_args!("{:#x}", self.cs))
            .field("rflags", &format_args!("{:#x}", self.rflags))
            .field("ss", &format_args!("{:#x}", self.ss))
            .finish()
    }
}
