//! # ELF64 Program Images
//!
//! Zero-copy view over a little-endian x86-64 executable. Only what the
//! loader needs is decoded: the file header and the `PT_LOAD` program
//! headers. Every offset is bounds-checked once in [`ElfProgram::parse`], so
//! the [`ProgramImage`] accessors cannot fail afterwards.

pub mod helpers;

use crate::program::{ProgramImage, Segment};
use bitfield_struct::bitfield;
use helpers::{le16, le32, le64, segment_file_bytes};
use kernel_memory_addresses::VirtualAddress;

/// Reasons an image is rejected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("image is shorter than an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 64-bit ELF image")]
    BadClass,
    #[error("not a little-endian ELF image")]
    BadEncoding,
    #[error("unsupported ELF type {0}")]
    BadType(u16),
    #[error("unsupported machine {0}")]
    BadMachine(u16),
    #[error("bad ELF header")]
    BadHeader,
    #[error("program header table or segment data out of bounds")]
    OutOfBounds,
    #[error("segment at {0} has more file bytes than memory bytes")]
    BadSegment(VirtualAddress),
    #[error("segment at {0} has alignment {1:#x}, not a power of two")]
    BadAlignment(VirtualAddress, u64),
}

/// The ELF file header fields the loader uses.
#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
struct Eh64 {
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: VirtualAddress,
    e_phoff: u64,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
}

/// One program header.
#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
pub struct Ph64 {
    pub p_type: u32,
    pub p_flags: PFlags,
    pub p_offset: u64,
    pub p_vaddr: VirtualAddress,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// `Elf64_Phdr.p_flags` (SVr4): bit0=X, bit1=W, bit2=R.
///
/// Process pages are always readable and executable, so only `PF_W`
/// reaches the page tables.
#[bitfield(u32)]
pub struct PFlags {
    #[bits(1)]
    __execute: u8, // PF_X = 1
    #[bits(1)]
    pub write: bool, // PF_W = 2
    #[bits(1)]
    __read: u8, // PF_R = 4
    #[bits(29)]
    __: u32,
}

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const EM_X86_64: u16 = 62;
pub const PT_LOAD: u32 = 1;

/// Size of `Elf64_Ehdr`.
pub const EHDR_SIZE: usize = 64;

/// Size of `Elf64_Phdr`.
pub const PHDR_SIZE: usize = 56;

/// A validated ELF executable.
#[derive(Copy, Clone)]
pub struct ElfProgram<'a> {
    bytes: &'a [u8],
    eh: Eh64,
    ph: PhSlice<'a>,
    loads: usize,
}

impl<'a> ElfProgram<'a> {
    /// Validate `bytes` as an x86-64 executable.
    ///
    /// Position-independent (`ET_DYN`) images are accepted and loaded at
    /// their link addresses.
    ///
    /// # Errors
    /// See [`ElfError`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ElfError> {
        if bytes.len() < EHDR_SIZE {
            return Err(ElfError::TooShort);
        }
        if &bytes[0..4] != b"\x7FELF" {
            return Err(ElfError::BadMagic);
        }
        // ELFCLASS64
        if bytes[4] != 2 {
            return Err(ElfError::BadClass);
        }
        // ELFDATA2LSB
        if bytes[5] != 1 {
            return Err(ElfError::BadEncoding);
        }

        let eh = Eh64 {
            e_type: le16(&bytes[16..18]),
            e_machine: le16(&bytes[18..20]),
            e_version: le32(&bytes[20..24]),
            e_entry: VirtualAddress::new(le64(&bytes[24..32])),
            e_phoff: le64(&bytes[32..40]),
            e_ehsize: le16(&bytes[52..54]),
            e_phentsize: le16(&bytes[54..56]),
            e_phnum: le16(&bytes[56..58]),
        };

        if !(eh.e_type == ET_EXEC || eh.e_type == ET_DYN) {
            return Err(ElfError::BadType(eh.e_type));
        }
        if eh.e_machine != EM_X86_64 {
            return Err(ElfError::BadMachine(eh.e_machine));
        }
        if eh.e_version != 1 || eh.e_ehsize as usize > bytes.len() {
            return Err(ElfError::BadHeader);
        }
        if eh.e_phentsize as usize != PHDR_SIZE {
            return Err(ElfError::BadHeader);
        }

        let phoff = usize::try_from(eh.e_phoff).map_err(|_| ElfError::OutOfBounds)?;
        let phnum = eh.e_phnum as usize;
        let need = phnum
            .checked_mul(PHDR_SIZE)
            .and_then(|n| n.checked_add(phoff))
            .ok_or(ElfError::OutOfBounds)?;
        if need > bytes.len() {
            return Err(ElfError::OutOfBounds);
        }

        let ph = PhSlice {
            b: bytes,
            off: phoff,
            num: phnum,
        };

        let mut loads = 0;
        for header in (PhIter { ps: ph, i: 0 }).filter(Ph64::is_load) {
            if header.p_filesz > header.p_memsz {
                return Err(ElfError::BadSegment(header.p_vaddr));
            }
            // Segment bytes are copied, not mapped from the file, so the
            // offset need not be congruent to the address.
            if !header.p_align.is_power_of_two() {
                return Err(ElfError::BadAlignment(header.p_vaddr, header.p_align));
            }
            segment_file_bytes(bytes, &header)?;
            loads += 1;
        }

        Ok(Self {
            bytes,
            eh,
            ph,
            loads,
        })
    }

    /// Iterate all program headers.
    #[must_use]
    pub const fn iter_ph(&self) -> PhIter<'a> {
        PhIter { ps: self.ph, i: 0 }
    }

    /// Iterate only `PT_LOAD` headers.
    pub fn iter_pt_load(&self) -> impl Iterator<Item = Ph64> + 'a {
        self.iter_ph().filter(Ph64::is_load)
    }
}

impl ProgramImage for ElfProgram<'_> {
    fn entry(&self) -> VirtualAddress {
        self.eh.e_entry
    }

    fn segment_count(&self) -> usize {
        self.loads
    }

    fn segment(&self, index: usize) -> Option<Segment<'_>> {
        let ph = self.iter_pt_load().nth(index)?;
        let data = segment_file_bytes(self.bytes, &ph).ok()?;
        Some(Segment {
            va: ph.p_vaddr,
            mem_size: ph.p_memsz,
            data,
            writable: ph.p_flags.write(),
        })
    }
}

impl Ph64 {
    #[must_use]
    pub const fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

// Program-header “view” without allocations.
#[derive(Copy, Clone)]
pub struct PhSlice<'a> {
    b: &'a [u8],
    off: usize,
    num: usize,
}

impl PhSlice<'_> {
    fn get(&self, i: usize) -> Option<Ph64> {
        if i >= self.num {
            return None;
        }
        let p = self.off + i * PHDR_SIZE;
        let s = self.b.get(p..p + PHDR_SIZE)?;
        Some(Ph64 {
            p_type: le32(&s[0..4]),
            p_flags: PFlags::from_bits(le32(&s[4..8])),
            p_offset: le64(&s[8..16]),
            p_vaddr: VirtualAddress::new(le64(&s[16..24])),
            p_filesz: le64(&s[32..40]),
            p_memsz: le64(&s[40..48]),
            p_align: {
                let a = le64(&s[48..56]);
                if a == 0 { 1 } else { a } // ELF permits 0 → no alignment requirement
            },
        })
    }
}

pub struct PhIter<'a> {
    ps: PhSlice<'a>,
    i: usize,
}

impl Iterator for PhIter<'_> {
    type Item = Ph64;

    fn next(&mut self) -> Option<Self::Item> {
        let v = self.ps.get(self.i)?;
        self.i += 1;
        Some(v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.ps.num.saturating_sub(self.i);
        (r, Some(r))
    }
}

impl core::iter::FusedIterator for PhIter<'_> {}
