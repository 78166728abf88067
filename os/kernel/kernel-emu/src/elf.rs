//! # ELF64 Writer
//!
//! Packs assembled code into the executables the kernel's loader reads:
//! an `ET_EXEC` x86-64 header, one program header per segment and the
//! segment bytes, in that order.

use kernel::elf::{EHDR_SIZE, EM_X86_64, ET_EXEC, PHDR_SIZE, PT_LOAD};

/// `p_flags` bits.
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

struct Section {
    va: u64,
    data: Vec<u8>,
    mem_size: u64,
    flags: u32,
}

/// Builder for a statically linked executable.
pub struct ElfWriter {
    entry: u64,
    sections: Vec<Section>,
}

impl ElfWriter {
    #[must_use]
    pub const fn new(entry: u64) -> Self {
        Self {
            entry,
            sections: Vec::new(),
        }
    }

    /// Read-only, executable segment.
    #[must_use]
    pub fn text(self, va: u64, code: &[u8]) -> Self {
        self.segment(va, code, code.len() as u64, PF_R | PF_X)
    }

    /// Writable segment of `mem_size` bytes, starting with `data`.
    #[must_use]
    pub fn data(self, va: u64, data: &[u8], mem_size: u64) -> Self {
        self.segment(va, data, mem_size, PF_R | PF_W)
    }

    fn segment(mut self, va: u64, data: &[u8], mem_size: u64, flags: u32) -> Self {
        self.sections.push(Section {
            va,
            data: data.to_vec(),
            mem_size: mem_size.max(data.len() as u64),
            flags,
        });
        self
    }

    /// Serialize the image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&self) -> Vec<u8> {
        let phnum = self.sections.len();
        let mut out = Vec::with_capacity(EHDR_SIZE + phnum * PHDR_SIZE);

        out.extend_from_slice(b"\x7FELF");
        out.extend_from_slice(&[2, 1, 1, 0]); // 64-bit, little endian, version 1, SysV
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&ET_EXEC.to_le_bytes());
        out.extend_from_slice(&EM_X86_64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(phnum as u16).to_le_bytes());
        out.extend_from_slice(&[0; 6]); // no section headers
        debug_assert_eq!(out.len(), EHDR_SIZE);

        let mut offset = (EHDR_SIZE + phnum * PHDR_SIZE) as u64;
        for s in &self.sections {
            out.extend_from_slice(&PT_LOAD.to_le_bytes());
            out.extend_from_slice(&s.flags.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&s.va.to_le_bytes()); // p_vaddr
            out.extend_from_slice(&s.va.to_le_bytes()); // p_paddr
            out.extend_from_slice(&(s.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&s.mem_size.to_le_bytes());
            out.extend_from_slice(&0x1000u64.to_le_bytes());
            offset += s.data.len() as u64;
        }
        for s in &self.sections {
            out.extend_from_slice(&s.data);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::{ElfProgram, ProgramImage};
    use kernel_memory_addresses::VirtualAddress;

    #[test]
    fn kernel_loader_accepts_written_images() {
        let bytes = ElfWriter::new(0x10_0004)
            .text(0x10_0000, b"\x02\x02\x02\x02\x05")
            .data(0x10_2000, b"seed", 0x1800)
            .write();
        let elf = ElfProgram::parse(&bytes).expect("valid image");

        assert_eq!(elf.entry(), VirtualAddress::new(0x10_0004));
        let image: &dyn ProgramImage = &elf;
        let segments: Vec<_> = image.segments().collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].data, b"\x02\x02\x02\x02\x05");
        assert!(!segments[0].writable);
        assert_eq!(segments[1].va, VirtualAddress::new(0x10_2000));
        assert_eq!(segments[1].data, b"seed");
        assert_eq!(segments[1].mem_size, 0x1800);
        assert!(segments[1].writable);
    }
}
