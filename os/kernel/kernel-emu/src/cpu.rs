//! # Emulated Processor
//!
//! Runs user code in the [instruction set](crate::isa) under the paging
//! rules of x86-64: every fetch, load and store is translated through the
//! page table the kernel hands to [`Cpu::resume`], a missing or forbidden
//! access becomes a page fault with the hardware error word and CR2, and a
//! timer fires every [`EmuConfig::timer_quantum`] instructions while
//! interrupts are enabled.
//!
//! There is no console: the operator's "switch off" is modelled by the
//! budgets in [`EmuConfig`], reported through [`Cpu::poweroff_requested`].

use crate::isa::Opcode;
use kernel::{Cpu, Trap};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_syscall::regs::RFLAGS_IF;
use kernel_syscall::trap::{INT_INVALID_OPCODE, INT_PAGEFAULT, INT_SYSCALL, INT_TIMER};
use kernel_syscall::{PageFaultError, Reg, RegisterState};
use kernel_vmem::{AddressSpace, PagePermissions, PhysMapper, PhysMapperExt};
use log::trace;

/// Machine parameters.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EmuConfig {
    /// Instructions between timer interrupts; 0 disables the timer.
    pub timer_quantum: u64,
    /// Consecutive power-off polls without running user code after which the
    /// machine switches off, i.e. how long the kernel may sit idle.
    pub idle_limit: u64,
    /// Total traps after which the machine switches off.
    pub trap_limit: u64,
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            timer_quantum: 64,
            idle_limit: 8192,
            trap_limit: 200_000,
        }
    }
}

/// Counters since power-on.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CpuStats {
    /// Retired instructions.
    pub instructions: u64,
    /// Returns to user mode.
    pub resumes: u64,
    /// Traps taken, of any kind.
    pub traps: u64,
    /// Timer interrupts taken.
    pub timer_ticks: u64,
}

/// The processor.
pub struct EmulatedCpu {
    config: EmuConfig,
    stats: CpuStats,
    since_tick: u64,
    polls: u64,
}

impl EmulatedCpu {
    #[must_use]
    pub const fn new(config: EmuConfig) -> Self {
        Self {
            config,
            stats: CpuStats {
                instructions: 0,
                resumes: 0,
                traps: 0,
                timer_ticks: 0,
            },
            since_tick: 0,
            polls: 0,
        }
    }

    #[must_use]
    pub const fn stats(&self) -> CpuStats {
        self.stats
    }

    #[must_use]
    pub const fn config(&self) -> &EmuConfig {
        &self.config
    }

    const fn timer_due(&self, regs: &RegisterState) -> bool {
        self.config.timer_quantum != 0
            && regs.rflags & RFLAGS_IF != 0
            && self.since_tick >= self.config.timer_quantum
    }
}

impl Cpu for EmulatedCpu {
    fn resume<M: PhysMapper + ?Sized>(
        &mut self,
        mem: &mut M,
        root: PhysicalPage,
        regs: &RegisterState,
    ) -> Trap {
        self.polls = 0;
        self.stats.resumes += 1;
        let mut mmu = Mmu {
            mem,
            space: AddressSpace::from_root(root),
        };
        let mut regs = *regs;

        let trap = loop {
            if self.timer_due(&regs) {
                self.since_tick = 0;
                self.stats.timer_ticks += 1;
                break raise(regs, INT_TIMER, 0, VirtualAddress::zero());
            }
            match execute(&mut mmu, &mut regs) {
                Ok(Flow::Next) => {}
                Ok(Flow::Syscall) => {
                    self.retire();
                    break raise(regs, INT_SYSCALL, 0, VirtualAddress::zero());
                }
                Err(Fault::Page { addr, err }) => {
                    break raise(regs, INT_PAGEFAULT, err.into_bits(), addr);
                }
                Err(Fault::InvalidOpcode) => {
                    break raise(regs, INT_INVALID_OPCODE, 0, VirtualAddress::zero());
                }
            }
            self.retire();
        };

        self.stats.traps += 1;
        trace!(
            "trap {} at rip={:#x} after {} instructions",
            trap.regs.intno,
            trap.regs.rip,
            self.stats.instructions
        );
        trap
    }

    fn poweroff_requested(&mut self) -> bool {
        self.polls += 1;
        self.stats.traps >= self.config.trap_limit || self.polls > self.config.idle_limit
    }
}

impl EmulatedCpu {
    const fn retire(&mut self) {
        self.stats.instructions += 1;
        self.since_tick += 1;
    }
}

fn raise(mut regs: RegisterState, intno: u64, err: u64, cr2: VirtualAddress) -> Trap {
    regs.intno = intno;
    regs.err = err;
    Trap { regs, cr2 }
}

/// Outcome of one instruction that did not fault.
enum Flow {
    Next,
    Syscall,
}

enum Fault {
    Page { addr: VirtualAddress, err: PageFaultError },
    InvalidOpcode,
}

#[derive(Copy, Clone)]
enum Access {
    Read,
    Write,
    Fetch,
}

/// User-mode view of memory through one page table.
struct Mmu<'m, M: PhysMapper + ?Sized> {
    mem: &'m mut M,
    space: AddressSpace,
}

impl<M: PhysMapper + ?Sized> Mmu<'_, M> {
    fn translate(&self, va: VirtualAddress, access: Access) -> Result<PhysicalAddress, Fault> {
        let found = self.space.translate(&*self.mem, va);
        let allowed = found.is_some_and(|t| {
            t.perm.contains(PagePermissions::USER)
                && (!matches!(access, Access::Write) || t.perm.contains(PagePermissions::WRITABLE))
        });
        match found {
            Some(t) if allowed => Ok(t.pa),
            _ => Err(Fault::Page {
                addr: va,
                err: PageFaultError::new()
                    .with_present(found.is_some())
                    .with_write(matches!(access, Access::Write))
                    .with_user(true)
                    .with_instruction_fetch(matches!(access, Access::Fetch)),
            }),
        }
    }

    fn read8(&self, va: VirtualAddress, access: Access) -> Result<u8, Fault> {
        let pa = self.translate(va, access)?;
        let mut byte = [0u8];
        self.mem.read_bytes(pa, &mut byte);
        Ok(byte[0])
    }

    fn write8(&mut self, va: VirtualAddress, value: u8) -> Result<(), Fault> {
        let pa = self.translate(va, Access::Write)?;
        self.mem.write_bytes(pa, &[value]);
        Ok(())
    }
}

/// Decoded operand bytes of the instruction at `rip`.
struct Fetched {
    op: Opcode,
    bytes: [u8; 10],
}

impl Fetched {
    fn reg(&self, index: usize) -> Result<Reg, Fault> {
        let n = self.bytes[index];
        if n < 16 {
            Ok(Reg::from_encoding(n))
        } else {
            Err(Fault::InvalidOpcode)
        }
    }

    fn imm32(&self, at: usize) -> i32 {
        i32::from_le_bytes([
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ])
    }

    fn imm64(&self, at: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[at..at + 8]);
        u64::from_le_bytes(raw)
    }
}

fn fetch<M: PhysMapper + ?Sized>(mmu: &Mmu<'_, M>, rip: u64) -> Result<Fetched, Fault> {
    let at = |i: u64| VirtualAddress::new(rip.wrapping_add(i));
    let first = mmu.read8(at(0), Access::Fetch)?;
    let op = Opcode::try_from(first).map_err(|_| Fault::InvalidOpcode)?;
    let mut bytes = [0u8; 10];
    bytes[0] = first;
    for i in 1..op.encoded_len() {
        bytes[i] = mmu.read8(at(i as u64), Access::Fetch)?;
    }
    Ok(Fetched { op, bytes })
}

/// Execute the instruction at `regs.rip`; on a fault `regs` is unchanged.
fn execute<M: PhysMapper + ?Sized>(
    mmu: &mut Mmu<'_, M>,
    regs: &mut RegisterState,
) -> Result<Flow, Fault> {
    let insn = fetch(mmu, regs.rip)?;
    let next = regs.rip.wrapping_add(insn.op.encoded_len() as u64);
    let branch = |taken: bool, rel: i32| {
        if taken {
            next.wrapping_add_signed(i64::from(rel))
        } else {
            next
        }
    };

    let mut flow = Flow::Next;
    let rip = match insn.op {
        Opcode::MovImm => {
            regs.set(insn.reg(1)?, insn.imm64(2));
            next
        }
        Opcode::Syscall => {
            flow = Flow::Syscall;
            next
        }
        Opcode::Store8 => {
            let addr = regs.get(insn.reg(1)?);
            let value = regs.get(insn.reg(2)?);
            mmu.write8(VirtualAddress::new(addr), value.to_le_bytes()[0])?;
            next
        }
        Opcode::Load8 => {
            let dst = insn.reg(1)?;
            let addr = regs.get(insn.reg(2)?);
            let value = mmu.read8(VirtualAddress::new(addr), Access::Read)?;
            regs.set(dst, u64::from(value));
            next
        }
        Opcode::Jmp => branch(true, insn.imm32(1)),
        Opcode::Jz => branch(regs.get(insn.reg(1)?) == 0, insn.imm32(2)),
        Opcode::Jnz => branch(regs.get(insn.reg(1)?) != 0, insn.imm32(2)),
        Opcode::Js => branch(regs.get(insn.reg(1)?).cast_signed() < 0, insn.imm32(2)),
        Opcode::AddImm => {
            let reg = insn.reg(1)?;
            let value = regs.get(reg).wrapping_add_signed(i64::from(insn.imm32(2)));
            regs.set(reg, value);
            next
        }
        Opcode::Mov => {
            let value = regs.get(insn.reg(2)?);
            regs.set(insn.reg(1)?, value);
            next
        }
    };
    regs.rip = rip;
    Ok(flow)
}
