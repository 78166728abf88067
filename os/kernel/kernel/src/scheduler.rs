//! Round-robin scheduling and the run loop.

use crate::{Cpu, Dispatch, Kernel, KernelError, ProcessTable, Shutdown, Trap, vm};
use kernel_info::process::{NPROC, Pid};
use kernel_vmem::PhysMapper;
use log::{error, info, trace};

/// Idle spins between two memory-usage audits.
const IDLE_AUDIT_SPINS: u64 = 1 << 12;

/// The next runnable process after `from` in round-robin order, wrapping
/// around and ending with `from` itself.
#[must_use]
pub fn next_runnable(procs: &ProcessTable, from: Pid) -> Option<Pid> {
    (1..=NPROC)
        .filter_map(|step| Pid::new((from.index() + step) % NPROC))
        .find(|&pid| procs[pid].is_runnable())
}

impl<M: PhysMapper> Kernel<M> {
    /// Run processes until the machine is switched off or a fatal error
    /// occurs.
    ///
    /// # Errors
    /// The first [`KernelError`]; the machine state is left as it was when
    /// the error occurred.
    pub fn run<C: Cpu>(&mut self, cpu: &mut C) -> Result<Shutdown, KernelError> {
        let mut dispatch = Dispatch::Schedule;
        loop {
            if dispatch == Dispatch::Schedule {
                let Some(pid) = self.schedule(cpu) else {
                    info!("Power off after {} ticks", self.ticks);
                    return Ok(Shutdown::PowerOff);
                };
                if pid != self.current {
                    trace!("switching to process {pid}");
                }
                self.current = pid;
            }

            let trap = self
                .resume_current(cpu)
                .inspect_err(|e| error!("PANIC: {e}"))?;
            if cpu.poweroff_requested() {
                info!("Power off requested");
                return Ok(Shutdown::PowerOff);
            }
            dispatch = self
                .exception(trap)
                .inspect_err(|e| error!("PANIC: {e}"))?;
        }
    }

    /// Pick the next runnable process after the current one.
    ///
    /// Spins while nothing is runnable, polling `cpu` for power-off every
    /// spin and auditing memory on the first idle spin and every
    /// [`IDLE_AUDIT_SPINS`] after that. Returns `None` on power-off.
    pub fn schedule<C: Cpu>(&mut self, cpu: &mut C) -> Option<Pid> {
        let mut spins: u64 = 0;
        loop {
            if let Some(pid) = next_runnable(&self.procs, self.current) {
                return Some(pid);
            }

            if cpu.poweroff_requested() {
                return None;
            }
            if spins % IDLE_AUDIT_SPINS == 0 {
                self.memshow();
            }
            spins += 1;
        }
    }

    /// Validate the current process's page table and hand it to the CPU.
    fn resume_current<C: Cpu>(&mut self, cpu: &mut C) -> Result<Trap, KernelError> {
        let proc = &self.procs[self.current];
        debug_assert!(proc.is_runnable(), "resuming process {} in state {:?}", proc.pid, proc.state);
        let space = proc.space.ok_or(KernelError::BadPageTable {
            root: self.kernel_space.root_page(),
            reason: "runnable process has no page table",
        })?;
        vm::check_pagetable(&self.mem, self.kernel_space, space)?;
        let regs = proc.regs;
        Ok(cpu.resume(&mut self.mem, space.root_page(), &regs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcState;
    use crate::testing::{RawProgram, ScriptCpu, boot};
    use kernel_alloc::FrameOwner;
    use kernel_info::memory::{KERNEL_START_ADDR, PROC_START_ADDR};
    use kernel_syscall::trap::{INT_SYSCALL, INT_TIMER};
    use kernel_syscall::{Reg, RegisterState, Sysno};
    use kernel_vmem::{PagePermissions, PhysicalAddress, PhysicalPage, VirtualAddress};

    /// A CPU that only answers power-off polls, switching off on poll
    /// number `limit`.
    struct PollCpu {
        polls: u64,
        limit: u64,
    }

    impl PollCpu {
        const fn new(limit: u64) -> Self {
            Self { polls: 0, limit }
        }
    }

    impl Cpu for PollCpu {
        fn resume<M: PhysMapper + ?Sized>(
            &mut self,
            _mem: &mut M,
            _root: PhysicalPage,
            _regs: &RegisterState,
        ) -> Trap {
            unreachable!("nothing may run while idle")
        }

        fn poweroff_requested(&mut self) -> bool {
            self.polls += 1;
            self.polls >= self.limit
        }
    }

    fn program() -> RawProgram {
        RawProgram::new(PROC_START_ADDR).segment(PROC_START_ADDR, 1, b"\x02", false)
    }

    fn pid(n: usize) -> Pid {
        Pid::new(n).expect("pid")
    }

    fn table(states: &[(usize, ProcState)]) -> ProcessTable {
        let mut procs = ProcessTable::new();
        for &(slot, state) in states {
            procs[pid(slot)].state = state;
        }
        procs
    }

    #[test]
    fn next_runnable_is_round_robin_from_the_next_slot() {
        let procs = table(&[
            (1, ProcState::Runnable),
            (2, ProcState::Broken),
            (4, ProcState::Runnable),
            (15, ProcState::Runnable),
        ]);
        assert_eq!(next_runnable(&procs, Pid::NONE), Some(pid(1)));
        assert_eq!(next_runnable(&procs, pid(1)), Some(pid(4)));
        assert_eq!(next_runnable(&procs, pid(4)), Some(pid(15)));
        assert_eq!(next_runnable(&procs, pid(15)), Some(pid(1)));
        // Only itself left.
        let alone = table(&[(7, ProcState::Runnable)]);
        assert_eq!(next_runnable(&alone, pid(7)), Some(pid(7)));
        assert_eq!(next_runnable(&ProcessTable::new(), pid(3)), None);
    }

    #[test]
    fn every_runnable_process_runs_within_one_round() {
        let procs = table(&[
            (2, ProcState::Runnable),
            (3, ProcState::Runnable),
            (9, ProcState::Runnable),
            (10, ProcState::Blocked),
        ]);
        let mut seen = Vec::new();
        let mut at = pid(9);
        for _ in 0..3 {
            at = next_runnable(&procs, at).expect("runnable");
            seen.push(at.index());
        }
        assert_eq!(seen, [2, 3, 9]);
    }

    #[test]
    fn schedule_skips_processes_that_cannot_run() {
        let (a, b, c) = (program(), program(), program());
        let mut k = boot(&[&a, &b, &c]);
        k.procs[pid(2)].state = ProcState::Broken;
        let mut cpu = PollCpu::new(u64::MAX);

        k.current = pid(1);
        assert_eq!(k.schedule(&mut cpu), Some(pid(3)));
        k.current = pid(3);
        assert_eq!(k.schedule(&mut cpu), Some(pid(1)));

        // The only runnable process is picked again.
        k.procs[pid(3)].state = ProcState::Broken;
        k.current = pid(1);
        assert_eq!(k.schedule(&mut cpu), Some(pid(1)));
        assert_eq!(cpu.polls, 0);
    }

    #[test]
    fn idle_schedule_polls_for_power_off_and_audits_memory() {
        let (a, b) = (program(), program());
        let mut k = boot(&[&a, &b]);

        // One page-table error the audit will find on every pass.
        let space = k.procs[pid(1)].space.expect("space");
        space
            .map(
                &mut k.mem,
                &mut k.frames.for_owner(FrameOwner::Process(pid(1))),
                VirtualAddress::new(PROC_START_ADDR + 0x5000),
                PhysicalPage::containing(PhysicalAddress::new(KERNEL_START_ADDR)),
                PagePermissions::USER_RW,
            )
            .expect("map");
        k.procs[pid(1)].state = ProcState::Broken;
        k.exit(pid(2)).expect("exit");
        k.current = pid(1);

        // Power-off on the first poll wins over the audit.
        let mut cpu = PollCpu::new(1);
        assert_eq!(k.schedule(&mut cpu), None);
        assert_eq!(k.audit_errors(), 0);

        // Audits run on the first idle spin and every IDLE_AUDIT_SPINS after.
        let mut cpu = PollCpu::new(IDLE_AUDIT_SPINS + 2);
        assert_eq!(k.schedule(&mut cpu), None);
        assert_eq!(cpu.polls, IDLE_AUDIT_SPINS + 2);
        assert_eq!(k.audit_errors(), 2);
        assert_eq!(k.process(pid(1)).state, ProcState::Broken);
    }

    #[test]
    fn run_loop_alternates_on_timer_and_stops_when_idle() {
        let p = || RawProgram::new(PROC_START_ADDR).segment(PROC_START_ADDR, 1, b"\x02", false);
        let (a, b) = (p(), p());
        let mut k = boot(&[&a, &b]);
        let root = |k: &Kernel<_>, n| k.process(pid(n)).space.expect("space").root_page();
        let (r1, r2) = (root(&k, 1), root(&k, 2));

        // Each process takes two timer ticks, then exits.
        let mut cpu = ScriptCpu::new(|regs: &RegisterState| {
            let runs = regs.get(Reg::R15) + 1;
            let mut out = *regs;
            out.set(Reg::R15, runs);
            if runs <= 2 {
                out.intno = INT_TIMER;
            } else {
                out.intno = INT_SYSCALL;
                out.set_rax(Sysno::Exit.into());
            }
            out
        });

        assert_eq!(k.run(&mut cpu), Ok(Shutdown::PowerOff));
        assert_eq!(cpu.roots, [r1, r2, r1, r2, r1, r2]);
        assert_eq!(k.processes().live().count(), 0);
        assert_eq!(k.ticks(), 5);
    }

    #[test]
    fn fatal_trap_stops_the_run_loop() {
        let p = RawProgram::new(PROC_START_ADDR).segment(PROC_START_ADDR, 1, b"\xFF", false);
        let mut k = boot(&[&p]);
        let mut cpu = ScriptCpu::new(|regs: &RegisterState| RegisterState {
            intno: kernel_syscall::trap::INT_INVALID_OPCODE,
            ..*regs
        });
        assert_eq!(
            k.run(&mut cpu),
            Err(KernelError::UnexpectedTrap(kernel_syscall::trap::INT_INVALID_OPCODE))
        );
        assert_eq!(cpu.roots.len(), 1);
    }
}
