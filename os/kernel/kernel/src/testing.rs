//! Shared fixtures for the unit tests.

use crate::elf::{EHDR_SIZE, EM_X86_64, ET_EXEC, PHDR_SIZE, PT_LOAD};
use crate::{Cpu, Kernel, KernelConfig, ProgramImage, Segment, Trap};
use kernel_info::memory::NPAGES;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_syscall::trap::INT_SYSCALL;
use kernel_syscall::{RegisterState, Sysno};
use kernel_vmem::{PageFrame, PhysMapper};

/// All of physical memory as a heap array.
pub struct TestMemory(Vec<PageFrame>);

impl TestMemory {
    pub fn new() -> Self {
        Self(vec![PageFrame::zeroed(); NPAGES])
    }
}

impl PhysMapper for TestMemory {
    fn frame(&self, page: PhysicalPage) -> &PageFrame {
        &self.0[page.number()]
    }

    fn frame_mut(&mut self, page: PhysicalPage) -> &mut PageFrame {
        &mut self.0[page.number()]
    }
}

/// Program image assembled in code.
pub struct RawProgram {
    entry: VirtualAddress,
    segments: Vec<(VirtualAddress, u64, Vec<u8>, bool)>,
}

impl RawProgram {
    pub fn new(entry: u64) -> Self {
        Self {
            entry: VirtualAddress::new(entry),
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, va: u64, mem_size: u64, data: &[u8], writable: bool) -> Self {
        self.segments
            .push((VirtualAddress::new(va), mem_size, data.to_vec(), writable));
        self
    }
}

impl ProgramImage for RawProgram {
    fn entry(&self) -> VirtualAddress {
        self.entry
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&self, index: usize) -> Option<Segment<'_>> {
        self.segments
            .get(index)
            .map(|(va, mem_size, data, writable)| Segment {
                va: *va,
                mem_size: *mem_size,
                data,
                writable: *writable,
            })
    }
}

/// Writes minimal `ET_EXEC` images: header, program headers, then the
/// segment bytes back to back.
pub struct ElfBuilder {
    entry: u64,
    headers: Vec<(u32, u64, Vec<u8>, u64, bool)>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            headers: Vec::new(),
        }
    }

    pub fn load(mut self, va: u64, data: &[u8], memsz: u64, writable: bool) -> Self {
        self.headers.push((PT_LOAD, va, data.to_vec(), memsz, writable));
        self
    }

    /// A `PT_NOTE` header, which the loader must skip.
    pub fn note(mut self) -> Self {
        self.headers.push((4, 0, Vec::new(), 0, false));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; EHDR_SIZE];
        out[0..4].copy_from_slice(b"\x7FELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // little endian
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        out[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        out[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(self.headers.len() as u16).to_le_bytes());

        let mut data_off = EHDR_SIZE + self.headers.len() * PHDR_SIZE;
        let mut data = Vec::new();
        for (p_type, va, bytes, memsz, writable) in &self.headers {
            let flags: u32 = if *writable { 0b110 } else { 0b101 };
            let mut ph = [0u8; PHDR_SIZE];
            ph[0..4].copy_from_slice(&p_type.to_le_bytes());
            ph[4..8].copy_from_slice(&flags.to_le_bytes());
            ph[8..16].copy_from_slice(&(data_off as u64).to_le_bytes());
            ph[16..24].copy_from_slice(&va.to_le_bytes());
            ph[24..32].copy_from_slice(&va.to_le_bytes());
            ph[32..40].copy_from_slice(&(bytes.len() as u64).to_le_bytes());
            ph[40..48].copy_from_slice(&memsz.to_le_bytes());
            ph[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
            out.extend_from_slice(&ph);
            data.extend_from_slice(bytes);
            data_off += bytes.len();
        }
        out.extend_from_slice(&data);
        out
    }
}

/// Boot with default configuration on fresh memory.
pub fn boot(programs: &[&dyn ProgramImage]) -> Kernel<TestMemory> {
    Kernel::boot(TestMemory::new(), KernelConfig::default(), programs).expect("boot")
}

/// A trap `intno` taken by the current process at its saved state.
pub fn trap(k: &Kernel<TestMemory>, intno: u64, err: u64) -> Trap {
    let mut regs = k.process(k.current()).regs;
    regs.intno = intno;
    regs.err = err;
    Trap {
        regs,
        cr2: VirtualAddress::zero(),
    }
}

/// The current process calling `sysno(arg)`.
pub fn syscall_trap(k: &Kernel<TestMemory>, sysno: Sysno, arg: u64) -> Trap {
    let mut t = trap(k, INT_SYSCALL, 0);
    t.regs.set_rax(sysno.into());
    t.regs.set(kernel_syscall::Reg::Rdi, arg);
    t
}

/// A CPU that answers every resume with `step(regs)` and asks for power-off
/// once the kernel has polled it repeatedly without running anything.
pub struct ScriptCpu<F> {
    step: F,
    /// Root page of every resumed address space, in order.
    pub roots: Vec<PhysicalPage>,
    polls: usize,
}

impl<F: FnMut(&RegisterState) -> RegisterState> ScriptCpu<F> {
    /// Idle polls tolerated before power-off.
    const IDLE_POLLS: usize = 64;

    pub fn new(step: F) -> Self {
        Self {
            step,
            roots: Vec::new(),
            polls: 0,
        }
    }
}

impl<F: FnMut(&RegisterState) -> RegisterState> Cpu for ScriptCpu<F> {
    fn resume<M: PhysMapper + ?Sized>(
        &mut self,
        _mem: &mut M,
        root: PhysicalPage,
        regs: &RegisterState,
    ) -> Trap {
        self.polls = 0;
        self.roots.push(root);
        Trap {
            regs: (self.step)(regs),
            cr2: VirtualAddress::zero(),
        }
    }

    fn poweroff_requested(&mut self) -> bool {
        self.polls += 1;
        self.polls > Self::IDLE_POLLS
    }
}
