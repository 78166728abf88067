//! System call handlers.

use crate::{Dispatch, Kernel, KernelError, PanicMessage};
use kernel_alloc::FrameOwner;
use kernel_info::memory::{MEMSIZE_VIRTUAL, PROC_START_ADDR};
use kernel_info::process::Pid;
use kernel_syscall::{SYSCALL_FAILED, Sysno};
use kernel_vmem::{PagePermissions, PhysMapper, PhysMapperExt, VirtualAddress};
use log::{debug, warn};

impl<M: PhysMapper> Kernel<M> {
    /// Handle the system call in the current process's saved registers.
    ///
    /// The result goes to the caller's `rax`. Calls that give up the CPU
    /// return [`Dispatch::Schedule`].
    pub(crate) fn syscall(&mut self) -> Result<Dispatch, KernelError> {
        let pid = self.current;
        let regs = self.procs[pid].regs;
        let number = regs.rax();
        let Ok(sysno) = Sysno::try_from(number) else {
            return Err(KernelError::UnexpectedSyscall { pid, number });
        };
        debug!("process {pid}: {sysno:?}({:#x})", regs.rdi());

        let result = match sysno {
            Sysno::GetPid => pid.as_u64(),
            Sysno::Yield => {
                self.procs[pid].regs.set_rax(0);
                return Ok(Dispatch::Schedule);
            }
            Sysno::Panic => {
                let message = self.read_user_string(pid, regs.rdi());
                return Err(KernelError::UserPanic { pid, message });
            }
            Sysno::PageAlloc => self.sys_page_alloc(pid, regs.rdi())?,
            Sysno::Fork => self.fork(pid)?,
            Sysno::Exit => {
                self.exit(pid)?;
                return Ok(Dispatch::Schedule);
            }
        };

        self.procs[pid].regs.set_rax(result);
        Ok(Dispatch::Resume)
    }

    /// Map a fresh zeroed page at `addr` in `pid`'s address space.
    ///
    /// Fails with [`SYSCALL_FAILED`] for unaligned addresses, addresses
    /// outside application memory, addresses that are already mapped, and
    /// when memory runs out.
    fn sys_page_alloc(&mut self, pid: Pid, addr: u64) -> Result<u64, KernelError> {
        let va = VirtualAddress::new(addr);
        if !va.is_page_aligned() || !(PROC_START_ADDR..MEMSIZE_VIRTUAL).contains(&addr) {
            warn!("process {pid}: page_alloc({va}) outside application memory");
            return Ok(SYSCALL_FAILED);
        }
        let Some(space) = self.procs[pid].space else {
            return Ok(SYSCALL_FAILED);
        };

        let mut it = space.cursor(&self.mem, va);
        if it.present() {
            warn!("process {pid}: page_alloc({va}) already mapped");
            return Ok(SYSCALL_FAILED);
        }

        let owner = FrameOwner::Process(pid);
        let Some(page) = self.frames.alloc(&mut self.mem, owner) else {
            warn!("process {pid}: page_alloc({va}) out of physical memory");
            return Ok(SYSCALL_FAILED);
        };
        let mapped = it.map(
            &mut self.mem,
            &mut self.frames.for_owner(owner),
            page,
            PagePermissions::USER_RW,
        );
        if mapped.is_err() {
            self.frames.free(page.base())?;
            warn!("process {pid}: page_alloc({va}) out of memory for page table");
            return Ok(SYSCALL_FAILED);
        }
        Ok(0)
    }

    /// Copy a NUL-terminated string out of user memory, stopping at the
    /// first byte user code could not read itself.
    fn read_user_string(&self, pid: Pid, addr: u64) -> PanicMessage {
        let mut message = PanicMessage::empty();
        let Some(space) = self.procs[pid].space else {
            return message;
        };
        let mut va = VirtualAddress::new(addr);
        loop {
            let Some(t) = space
                .translate(&self.mem, va)
                .filter(|t| t.perm.contains(PagePermissions::USER))
            else {
                break;
            };
            let mut byte = [0u8];
            self.mem.read_bytes(t.pa, &mut byte);
            if byte[0] == 0 || !message.push(byte[0]) {
                break;
            }
            match va.checked_add(1) {
                Some(next) => va = next,
                None => break,
            }
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{RawProgram, boot, syscall_trap};
    use crate::{Dispatch, KernelError, ProcState};
    use kernel_alloc::{FrameAllocator, FrameOwner};
    use kernel_info::memory::{MEMSIZE_VIRTUAL, PROC_STACK_ADDR, PROC_START_ADDR};
    use kernel_info::process::{NPROC, Pid};
    use kernel_syscall::{Reg, SYSCALL_FAILED, Sysno};
    use kernel_vmem::{PAGE_SIZE, PagePermissions, VirtualAddress};

    fn pid(n: usize) -> Pid {
        Pid::new(n).expect("pid")
    }

    fn one_page_program() -> RawProgram {
        RawProgram::new(PROC_START_ADDR).segment(PROC_START_ADDR, 0x1000, b"\x02", false)
    }

    #[test]
    fn getpid_and_yield() {
        let mut k = boot(&[&one_page_program(), &one_page_program()]);
        k.current = pid(2);

        let d = k.exception(syscall_trap(&k, Sysno::GetPid, 0)).expect("getpid");
        assert_eq!(d, Dispatch::Resume);
        assert_eq!(k.process(pid(2)).regs.rax(), 2);

        let d = k.exception(syscall_trap(&k, Sysno::Yield, 0)).expect("yield");
        assert_eq!(d, Dispatch::Schedule);
        assert_eq!(k.process(pid(2)).regs.rax(), 0);
        assert!(k.process(pid(2)).is_runnable());
    }

    #[test]
    fn page_alloc_maps_a_fresh_user_page_once() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        let owned = k.frames().count_owned_by(FrameOwner::Process(pid(1)));
        let addr = PROC_START_ADDR + 0x10_000;

        k.exception(syscall_trap(&k, Sysno::PageAlloc, addr)).expect("alloc");
        assert_eq!(k.process(pid(1)).regs.rax(), 0);
        let space = k.process(pid(1)).space.expect("space");
        let t = space
            .translate(k.mem(), VirtualAddress::new(addr))
            .expect("mapped");
        assert_eq!(t.perm, PagePermissions::USER_RW);
        assert_eq!(
            k.frames().owner(t.pa.page()),
            FrameOwner::Process(pid(1))
        );
        assert_eq!(
            k.frames().count_owned_by(FrameOwner::Process(pid(1))),
            owned + 1
        );

        // Same address again: rejected, nothing allocated.
        k.exception(syscall_trap(&k, Sysno::PageAlloc, addr)).expect("again");
        assert_eq!(k.process(pid(1)).regs.rax(), SYSCALL_FAILED);
        assert_eq!(
            k.frames().count_owned_by(FrameOwner::Process(pid(1))),
            owned + 1
        );
    }

    #[test]
    fn page_alloc_rejects_bad_addresses() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        let free = k.frames().free_count();
        for addr in [
            PROC_START_ADDR + 1,
            PROC_START_ADDR - PAGE_SIZE,
            0x4_0000,
            MEMSIZE_VIRTUAL,
            PROC_STACK_ADDR,
            PROC_START_ADDR,
        ] {
            k.exception(syscall_trap(&k, Sysno::PageAlloc, addr)).expect("syscall");
            assert_eq!(k.process(pid(1)).regs.rax(), SYSCALL_FAILED, "{addr:#x}");
        }
        assert_eq!(k.frames().free_count(), free);
    }

    #[test]
    fn page_alloc_fails_cleanly_when_memory_runs_out() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        let mut addr = PROC_START_ADDR + PAGE_SIZE;
        let mut granted = 0;
        loop {
            k.exception(syscall_trap(&k, Sysno::PageAlloc, addr)).expect("syscall");
            if k.process(pid(1)).regs.rax() == SYSCALL_FAILED {
                break;
            }
            granted += 1;
            addr += PAGE_SIZE;
        }
        assert!(granted > 0);
        assert_eq!(k.frames().free_count(), 0);
        assert!(k.process(pid(1)).is_runnable());
    }

    #[test]
    fn fork_copies_memory_and_sets_return_values() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        let parent_space = k.process(pid(1)).space.expect("space");
        let data = VirtualAddress::new(PROC_START_ADDR + 0x8000);
        k.exception(syscall_trap(&k, Sysno::PageAlloc, data.as_u64())).expect("alloc");
        parent_space.copy_to(k.mem_mut(), data, b"parent").expect("write");

        let mut trap = syscall_trap(&k, Sysno::Fork, 0);
        trap.regs.set(Reg::Rbx, 0xB0B);
        k.exception(trap).expect("fork");
        assert_eq!(k.process(pid(1)).regs.rax(), 2);

        let child = k.process(pid(2));
        assert_eq!(child.state, ProcState::Runnable);
        assert_eq!(child.regs.rax(), 0);
        assert_eq!(child.regs.get(Reg::Rbx), 0xB0B);
        assert_eq!(child.regs.rip, k.process(pid(1)).regs.rip);

        let child_space = child.space.expect("child space");
        let mut buf = [0u8; 6];
        child_space.copy_from(k.mem(), data, &mut buf).expect("read");
        assert_eq!(&buf, b"parent");

        // Distinct frames behind every user page, same permissions.
        for va in [PROC_START_ADDR, data.as_u64(), PROC_STACK_ADDR] {
            let va = VirtualAddress::new(va);
            let p = parent_space.translate(k.mem(), va).expect("parent");
            let c = child_space.translate(k.mem(), va).expect("child");
            assert_ne!(p.pa, c.pa);
            assert_eq!(p.perm, c.perm);
            assert_eq!(k.frames().owner(c.pa.page()), FrameOwner::Process(pid(2)));
        }

        // Writes stay private.
        child_space.copy_to(k.mem_mut(), data, b"child!").expect("write");
        parent_space.copy_from(k.mem(), data, &mut buf).expect("read");
        assert_eq!(&buf, b"parent");
    }

    #[test]
    fn fork_with_full_table_fails() {
        let programs: Vec<RawProgram> = (1..NPROC).map(|_| one_page_program()).collect();
        let refs: Vec<&dyn crate::ProgramImage> =
            programs.iter().map(|p| p as &dyn crate::ProgramImage).collect();
        let mut k = boot(&refs);
        k.current = pid(1);
        let free = k.frames().free_count();

        k.exception(syscall_trap(&k, Sysno::Fork, 0)).expect("fork");
        assert_eq!(k.process(pid(1)).regs.rax(), SYSCALL_FAILED);
        assert_eq!(k.frames().free_count(), free);
    }

    #[test]
    fn fork_out_of_memory_leaves_nothing_behind() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        // Grab memory until only a couple of frames are left.
        let mut addr = PROC_START_ADDR + PAGE_SIZE;
        while k.frames().free_count() > 6 {
            k.exception(syscall_trap(&k, Sysno::PageAlloc, addr)).expect("alloc");
            addr += PAGE_SIZE;
        }
        let free = k.frames().free_count();

        k.exception(syscall_trap(&k, Sysno::Fork, 0)).expect("fork");
        assert_eq!(k.process(pid(1)).regs.rax(), SYSCALL_FAILED);
        assert_eq!(k.frames().free_count(), free);
        assert_eq!(k.frames().count_owned_by(FrameOwner::Process(pid(2))), 0);
        assert!(k.process(pid(2)).is_free());
    }

    #[test]
    fn exit_frees_everything_and_the_slot() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        k.exception(syscall_trap(&k, Sysno::PageAlloc, PROC_START_ADDR + 0x4000))
            .expect("alloc");
        k.exception(syscall_trap(&k, Sysno::Fork, 0)).expect("fork");

        let d = k.exception(syscall_trap(&k, Sysno::Exit, 0)).expect("exit");
        assert_eq!(d, Dispatch::Schedule);
        assert!(k.process(pid(1)).is_free());
        assert_eq!(k.frames().count_owned_by(FrameOwner::Process(pid(1))), 0);

        k.current = pid(2);
        k.exception(syscall_trap(&k, Sysno::Exit, 0)).expect("exit");
        assert_eq!(k.processes().live().count(), 0);
        assert_eq!(k.frames().free_count(), FrameAllocator::new().free_count());
        assert_eq!(k.memory_usage().errors().count(), 0);
    }

    #[test]
    fn panic_reads_the_message_from_user_memory() {
        let program = RawProgram::new(PROC_START_ADDR)
            .segment(PROC_START_ADDR, 0x1000, b"\x02", false)
            .segment(PROC_START_ADDR + 0x1FF8, 16, b"bad thing\0", true);
        let mut k = boot(&[&program]);
        k.current = pid(1);

        let err = k
            .exception(syscall_trap(&k, Sysno::Panic, PROC_START_ADDR + 0x1FF8))
            .expect_err("panic is fatal");
        match err {
            KernelError::UserPanic { pid: p, message } => {
                assert_eq!(p, pid(1));
                assert_eq!(message.as_str(), "bad thing");
            }
            other => panic!("unexpected {other:?}"),
        }

        // Kernel memory is not readable through the syscall.
        let err = k
            .exception(syscall_trap(&k, Sysno::Panic, 0x4_0000))
            .expect_err("panic is fatal");
        assert!(matches!(err, KernelError::UserPanic { message, .. } if message.is_empty()));
    }

    #[test]
    fn unknown_syscall_is_fatal() {
        let mut k = boot(&[&one_page_program()]);
        k.current = pid(1);
        let mut trap = syscall_trap(&k, Sysno::GetPid, 0);
        trap.regs.set_rax(99);
        assert_eq!(
            k.exception(trap),
            Err(KernelError::UnexpectedSyscall {
                pid: pid(1),
                number: 99
            })
        );
    }
}
