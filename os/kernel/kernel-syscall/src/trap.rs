//! # Trap Numbers

use bitfield_struct::bitfield;

/// Invalid opcode (#UD).
pub const INT_INVALID_OPCODE: u64 = 6;

/// General protection fault (#GP).
pub const INT_GENERAL_PROTECTION: u64 = 13;

/// Page fault (#PF); the faulting address is in CR2.
pub const INT_PAGEFAULT: u64 = 14;

/// Timer interrupt (first remapped IRQ).
pub const INT_TIMER: u64 = 32;

/// System call.
pub const INT_SYSCALL: u64 = 48;

/// Human readable name of a trap number, for diagnostics.
#[must_use]
pub const fn name(intno: u64) -> &'static str {
    match intno {
        INT_INVALID_OPCODE => "invalid opcode",
        INT_GENERAL_PROTECTION => "general protection fault",
        INT_PAGEFAULT => "page fault",
        INT_TIMER => "timer",
        INT_SYSCALL => "system call",
        _ => "unexpected trap",
    }
}

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64, // reserved / ignored bits
}

impl PageFaultError {
    /// The kind of access that faulted.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        if self.instruction_fetch() {
            "execute"
        } else if self.write() {
            "write"
        } else {
            "read"
        }
    }

    /// Why the access was refused.
    #[must_use]
    pub const fn problem(&self) -> &'static str {
        if self.present() {
            "protection problem"
        } else {
            "missing page"
        }
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}
