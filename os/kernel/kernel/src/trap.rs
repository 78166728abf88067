//! Trap dispatch.

use crate::{Dispatch, Kernel, KernelError, ProcState, Trap};
use kernel_syscall::PageFaultError;
use kernel_syscall::trap::{self, INT_PAGEFAULT, INT_SYSCALL, INT_TIMER};
use kernel_vmem::PhysMapper;
use log::{trace, warn};

impl<M: PhysMapper> Kernel<M> {
    /// Handle one trap taken by the current process.
    ///
    /// The register snapshot is saved into the current descriptor first, so
    /// every handler works on (and every later resume restores) the state the
    /// process had at trap time.
    ///
    /// # Errors
    /// Any condition that must halt the machine; see [`KernelError`].
    pub fn exception(&mut self, trap: Trap) -> Result<Dispatch, KernelError> {
        let pid = self.current;
        let regs = trap.regs;
        self.procs[pid].regs = regs;
        trace!("process {pid}: {} at rip={:#x}", trap::name(regs.intno), regs.rip);

        let err = PageFaultError::from_bits(regs.err);
        let user_fault = err.user() && regs.is_user();
        if regs.intno != INT_PAGEFAULT || user_fault {
            self.periodic_audit();
        }

        let dispatch = match regs.intno {
            INT_SYSCALL => self.syscall()?,
            INT_TIMER => {
                self.ticks += 1;
                Dispatch::Schedule
            }
            INT_PAGEFAULT => {
                let addr = trap.cr2;
                if !user_fault {
                    return Err(KernelError::KernelPageFault {
                        addr,
                        rip: regs.rip,
                        err,
                    });
                }
                warn!(
                    "process {pid} page fault for {addr}: {} ({} {}, rip={:#x})",
                    err.explain(),
                    err.operation(),
                    err.problem(),
                    regs.rip
                );
                self.procs[pid].state = ProcState::Broken;
                Dispatch::Resume
            }
            other => return Err(KernelError::UnexpectedTrap(other)),
        };

        if dispatch == Dispatch::Resume && self.procs[pid].is_runnable() {
            Ok(Dispatch::Resume)
        } else {
            Ok(Dispatch::Schedule)
        }
    }

    fn periodic_audit(&mut self) {
        let interval = self.config.audit_interval_ticks;
        if interval != 0 && self.ticks - self.last_audit_tick >= interval {
            self.last_audit_tick = self.ticks;
            self.memshow();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{RawProgram, boot, trap};
    use crate::{Dispatch, KernelError, ProcState};
    use kernel_info::memory::PROC_START_ADDR;
    use kernel_info::process::Pid;
    use kernel_syscall::PageFaultError;
    use kernel_syscall::trap::{INT_GENERAL_PROTECTION, INT_PAGEFAULT, INT_TIMER};
    use kernel_vmem::VirtualAddress;

    fn pid(n: usize) -> Pid {
        Pid::new(n).expect("pid")
    }

    fn two_programs() -> [RawProgram; 2] {
        let p = || RawProgram::new(PROC_START_ADDR).segment(PROC_START_ADDR, 1, b"\x02", false);
        [p(), p()]
    }

    #[test]
    fn timer_counts_ticks_and_reschedules() {
        let [a, b] = two_programs();
        let mut k = boot(&[&a, &b]);
        k.current = pid(1);
        let before = k.ticks();
        let d = k.exception(trap(&k, INT_TIMER, 0)).expect("timer");
        assert_eq!(d, Dispatch::Schedule);
        assert_eq!(k.ticks(), before + 1);
        assert!(k.process(pid(1)).is_runnable());
    }

    #[test]
    fn trap_saves_registers_into_current() {
        let [a, b] = two_programs();
        let mut k = boot(&[&a, &b]);
        k.current = pid(2);
        let mut t = trap(&k, INT_TIMER, 0);
        t.regs.rip = 0x10_0123;
        t.regs.set_rax(77);
        k.exception(t).expect("timer");
        assert_eq!(k.process(pid(2)).regs.rip, 0x10_0123);
        assert_eq!(k.process(pid(2)).regs.rax(), 77);
        assert_eq!(k.process(pid(1)).regs.rip, PROC_START_ADDR);
    }

    #[test]
    fn user_page_fault_breaks_only_the_faulting_process() {
        let [a, b] = two_programs();
        let mut k = boot(&[&a, &b]);
        k.current = pid(1);
        let err = PageFaultError::new().with_user(true).with_write(true);
        let mut t = trap(&k, INT_PAGEFAULT, err.into_bits());
        t.cr2 = VirtualAddress::new(PROC_START_ADDR);

        let d = k.exception(t).expect("user fault is not fatal");
        assert_eq!(d, Dispatch::Schedule);
        assert_eq!(k.process(pid(1)).state, ProcState::Broken);
        assert_eq!(k.process(pid(2)).state, ProcState::Runnable);
    }

    #[test]
    fn kernel_page_fault_is_fatal() {
        let [a, b] = two_programs();
        let mut k = boot(&[&a, &b]);
        k.current = pid(1);
        let err = PageFaultError::new().with_present(true);
        let mut t = trap(&k, INT_PAGEFAULT, err.into_bits());
        t.cr2 = VirtualAddress::new(0x8);
        assert_eq!(
            k.exception(t),
            Err(KernelError::KernelPageFault {
                addr: VirtualAddress::new(0x8),
                rip: PROC_START_ADDR,
                err,
            })
        );
    }

    #[test]
    fn fault_taken_in_kernel_mode_is_fatal_even_with_user_bit() {
        let [a, b] = two_programs();
        let mut k = boot(&[&a, &b]);
        k.current = pid(1);
        let err = PageFaultError::new().with_user(true);
        let mut t = trap(&k, INT_PAGEFAULT, err.into_bits());
        t.regs.cs = 0x08;
        t.cr2 = VirtualAddress::new(0x10);
        assert!(matches!(
            k.exception(t),
            Err(KernelError::KernelPageFault { .. })
        ));
        assert_eq!(k.process(pid(1)).state, ProcState::Runnable);
    }

    #[test]
    fn unexpected_trap_is_fatal() {
        let [a, b] = two_programs();
        let mut k = boot(&[&a, &b]);
        k.current = pid(2);
        assert_eq!(
            k.exception(trap(&k, INT_GENERAL_PROTECTION, 0)),
            Err(KernelError::UnexpectedTrap(INT_GENERAL_PROTECTION))
        );
    }
}
