//! # User-Mode Instruction Set
//!
//! A byte-coded register machine over the sixteen x86-64 general purpose
//! registers. Register operands are one byte each (the x86 encoding number,
//! see [`Reg`](kernel_syscall::Reg)); immediates and branch displacements are
//! little endian. Branch targets are relative to the end of the branch.
//!
//! | Opcode | Mnemonic           | Length | Effect                              |
//! |--------|--------------------|--------|-------------------------------------|
//! | `0x01` | `mov r, imm64`     | 10     | `r = imm`                           |
//! | `0x02` | `syscall`          | 1      | trap [`INT_SYSCALL`]                |
//! | `0x03` | `store8 [a], b`    | 3      | `*(u8*)a = b`                       |
//! | `0x04` | `load8 d, [a]`     | 3      | `d = *(u8*)a`                       |
//! | `0x05` | `jmp rel32`        | 5      | `rip += rel`                        |
//! | `0x06` | `jz r, rel32`      | 6      | if `r == 0`                         |
//! | `0x07` | `js r, rel32`      | 6      | if `(r as i64) < 0`                 |
//! | `0x08` | `add r, imm32`     | 6      | `r += sign_extend(imm)`             |
//! | `0x09` | `mov d, s`         | 3      | `d = s`                             |
//! | `0x0A` | `jnz r, rel32`     | 6      | if `r != 0`                         |
//!
//! Any other opcode byte, or a register operand above 15, raises
//! [`INT_INVALID_OPCODE`].
//!
//! [`INT_SYSCALL`]: kernel_syscall::trap::INT_SYSCALL
//! [`INT_INVALID_OPCODE`]: kernel_syscall::trap::INT_INVALID_OPCODE

/// Instruction opcodes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    MovImm = 0x01,
    Syscall = 0x02,
    Store8 = 0x03,
    Load8 = 0x04,
    Jmp = 0x05,
    Jz = 0x06,
    Js = 0x07,
    AddImm = 0x08,
    Mov = 0x09,
    Jnz = 0x0A,
}

impl Opcode {
    /// Encoded length including the opcode byte.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::MovImm => 10,
            Self::Syscall => 1,
            Self::Store8 | Self::Load8 | Self::Mov => 3,
            Self::Jmp => 5,
            Self::Jz | Self::Js | Self::AddImm | Self::Jnz => 6,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x01 => Self::MovImm,
            0x02 => Self::Syscall,
            0x03 => Self::Store8,
            0x04 => Self::Load8,
            0x05 => Self::Jmp,
            0x06 => Self::Jz,
            0x07 => Self::Js,
            0x08 => Self::AddImm,
            0x09 => Self::Mov,
            0x0A => Self::Jnz,
            other => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_decode_to_themselves() {
        for byte in 0x01..=0x0A_u8 {
            let op = Opcode::try_from(byte).expect("valid opcode");
            assert_eq!(op as u8, byte);
            assert!(op.encoded_len() >= 1);
        }
        assert_eq!(Opcode::try_from(0x00), Err(0x00));
        assert_eq!(Opcode::try_from(0xFF), Err(0xFF));
    }
}
