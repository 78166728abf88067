//! # Assembler
//!
//! Builds code for the [user instruction set](crate::isa) with forward and
//! backward labels.
//!
//! ```rust
//! use kernel_emu::asm::Assembler;
//! use kernel_syscall::{Reg, Sysno};
//!
//! let mut a = Assembler::new();
//! let spin = a.label();
//! a.bind(spin);
//! a.sys(Sysno::Yield);
//! a.jmp(spin);
//! let code = a.finish().unwrap();
//! assert_eq!(code.len(), 10 + 1 + 5);
//! ```

use crate::isa::Opcode;
use kernel_syscall::{Reg, Sysno};

/// A jump target, created by [`Assembler::label`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Label(usize);

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AsmError {
    #[error("label {0} is used but never bound")]
    Unbound(usize),
    #[error("label {0} is bound twice")]
    Rebound(usize),
    #[error("branch at offset {0} is out of range")]
    OutOfRange(usize),
}

/// Code buffer with pending label fixups.
#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    /// Offset of a rel32 field and the label it refers to.
    fixups: Vec<(usize, Label)>,
    /// First error seen by [`bind`](Self::bind); reported by `finish`.
    error: Option<AsmError>,
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes emitted so far.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.code.len()
    }

    /// A fresh, unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            self.error.get_or_insert(AsmError::Rebound(label.0));
        }
        *slot = Some(self.code.len());
    }

    pub fn mov_imm(&mut self, reg: Reg, value: u64) {
        self.op(Opcode::MovImm);
        self.code.push(reg as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn mov(&mut self, dst: Reg, src: Reg) {
        self.op(Opcode::Mov);
        self.code.extend_from_slice(&[dst as u8, src as u8]);
    }

    pub fn add_imm(&mut self, reg: Reg, value: i32) {
        self.op(Opcode::AddImm);
        self.code.push(reg as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// `*(u8*)addr = value`
    pub fn store8(&mut self, addr: Reg, value: Reg) {
        self.op(Opcode::Store8);
        self.code.extend_from_slice(&[addr as u8, value as u8]);
    }

    /// `dst = *(u8*)addr`
    pub fn load8(&mut self, dst: Reg, addr: Reg) {
        self.op(Opcode::Load8);
        self.code.extend_from_slice(&[dst as u8, addr as u8]);
    }

    pub fn syscall(&mut self) {
        self.op(Opcode::Syscall);
    }

    /// `rax = sysno; syscall`
    pub fn sys(&mut self, sysno: Sysno) {
        self.mov_imm(Reg::Rax, sysno.into());
        self.syscall();
    }

    /// `rax = sysno; rdi = arg; syscall`
    pub fn sys1(&mut self, sysno: Sysno, arg: Reg) {
        self.mov(Reg::Rdi, arg);
        self.sys(sysno);
    }

    pub fn jmp(&mut self, target: Label) {
        self.op(Opcode::Jmp);
        self.rel32(target);
    }

    pub fn jz(&mut self, reg: Reg, target: Label) {
        self.branch(Opcode::Jz, reg, target);
    }

    pub fn jnz(&mut self, reg: Reg, target: Label) {
        self.branch(Opcode::Jnz, reg, target);
    }

    /// Jump if `reg` is negative, e.g. a failed system call.
    pub fn js(&mut self, reg: Reg, target: Label) {
        self.branch(Opcode::Js, reg, target);
    }

    /// Raw bytes, e.g. to provoke an invalid-opcode trap.
    pub fn bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Resolve all labels and return the code.
    ///
    /// # Errors
    /// See [`AsmError`].
    pub fn finish(mut self) -> Result<Vec<u8>, AsmError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        for &(at, label) in &self.fixups {
            let target = self.labels[label.0].ok_or(AsmError::Unbound(label.0))?;
            // Displacement is relative to the end of the 4-byte field, which
            // is the end of every branch instruction.
            let next = at + 4;
            let rel = i64::try_from(target).map_err(|_| AsmError::OutOfRange(at))?
                - i64::try_from(next).map_err(|_| AsmError::OutOfRange(at))?;
            let rel = i32::try_from(rel).map_err(|_| AsmError::OutOfRange(at))?;
            self.code[at..next].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(self.code)
    }

    fn op(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    fn branch(&mut self, op: Opcode, reg: Reg, target: Label) {
        self.op(op);
        self.code.push(reg as u8);
        self.rel32(target);
    }

    fn rel32(&mut self, target: Label) {
        self.fixups.push((self.code.len(), target));
        self.code.extend_from_slice(&[0; 4]);
    }
}
