//! # Process Lifecycle
//!
//! Creation from a program image, fork and exit. All three charge or release
//! frames on behalf of exactly one process; nothing here leaves a frame
//! without an owner or with two.

use crate::program::ProgramImage;
use crate::{Kernel, KernelError, ProcState, vm};
use kernel_alloc::FrameOwner;
use kernel_info::memory::{MEMSIZE_VIRTUAL, PROC_STACK_ADDR, PROC_START_ADDR};
use kernel_info::process::Pid;
use kernel_syscall::{RegisterState, SYSCALL_FAILED};
use kernel_vmem::{
    AddressSpace, FRAME_BYTES, PagePermissions, PhysMapper, PhysMapperExt, VirtualAddress,
};
use log::{debug, info, warn};

impl<M: PhysMapper> Kernel<M> {
    /// Load `image` as process `pid` and make it runnable.
    ///
    /// Every page a segment touches gets its own zeroed frame; segments that
    /// share a page share its frame, writable if either one is. The process
    /// starts at the image entry with an empty stack page just below
    /// [`MEMSIZE_VIRTUAL`].
    pub(crate) fn process_setup(
        &mut self,
        pid: Pid,
        image: &dyn ProgramImage,
    ) -> Result<(), KernelError> {
        let owner = FrameOwner::Process(pid);
        let oom = |_| KernelError::OutOfMemory { pid };
        let space = vm::new_process_space(&mut self.mem, &mut self.frames, self.kernel_space, pid)
            .map_err(|(_, e)| oom(e))?;
        self.procs[pid].space = Some(space);

        for segment in image.segments() {
            segment
                .validate()
                .map_err(|source| KernelError::Program { pid, source })?;
            if segment.mem_size == 0 {
                continue;
            }

            let perm = if segment.writable {
                PagePermissions::USER_RW
            } else {
                PagePermissions::USER_RO
            };
            let first = segment.va.page().base().as_u64();
            let end = segment.va.as_u64() + segment.mem_size;
            for va in (first..end).step_by(FRAME_BYTES) {
                let mut it = space.cursor(&self.mem, VirtualAddress::new(va));
                let page = match it.page() {
                    Some(_) if it.perm().contains(perm) => continue,
                    Some(page) => page,
                    None => self
                        .frames
                        .alloc(&mut self.mem, owner)
                        .ok_or(KernelError::OutOfMemory { pid })?,
                };
                let perm = perm | it.perm();
                it.map(&mut self.mem, &mut self.frames.for_owner(owner), page, perm)
                    .map_err(oom)?;
            }

            space
                .copy_to(&mut self.mem, segment.va, segment.data)
                .map_err(|_| KernelError::BadPageTable {
                    root: space.root_page(),
                    reason: "segment pages vanished while loading",
                })?;
        }

        let stack = self
            .frames
            .alloc(&mut self.mem, owner)
            .ok_or(KernelError::OutOfMemory { pid })?;
        space
            .map(
                &mut self.mem,
                &mut self.frames.for_owner(owner),
                VirtualAddress::new(PROC_STACK_ADDR),
                stack,
                PagePermissions::USER_RW,
            )
            .map_err(oom)?;

        let proc = &mut self.procs[pid];
        proc.regs = RegisterState::user(image.entry().as_u64(), MEMSIZE_VIRTUAL);
        proc.state = ProcState::Runnable;
        info!(
            "process {pid}: entry {}, {} frames",
            image.entry(),
            self.frames.count_owned_by(owner)
        );
        Ok(())
    }

    /// Duplicate `parent` into the lowest free slot.
    ///
    /// Returns the child's pid, or [`SYSCALL_FAILED`] if there is no free
    /// slot or not enough memory; in that case nothing the attempt allocated
    /// stays allocated.
    pub(crate) fn fork(&mut self, parent: Pid) -> Result<u64, KernelError> {
        let Some(child) = self.procs.first_free() else {
            warn!("process {parent}: fork failed, process table full");
            return Ok(SYSCALL_FAILED);
        };
        let Some(parent_space) = self.procs[parent].space else {
            return Err(KernelError::BadPageTable {
                root: self.kernel_space.root_page(),
                reason: "running process has no page table",
            });
        };

        let space = match vm::new_process_space(
            &mut self.mem,
            &mut self.frames,
            self.kernel_space,
            child,
        ) {
            Ok(space) => space,
            Err((partial, _)) => {
                if let Some(space) = partial {
                    vm::release_space(&self.mem, &mut self.frames, space, child)?;
                }
                warn!("process {parent}: fork failed, out of memory for page table");
                return Ok(SYSCALL_FAILED);
            }
        };

        if !self.copy_user_pages(parent_space, space, child)? {
            vm::release_space(&self.mem, &mut self.frames, space, child)?;
            warn!("process {parent}: fork failed, out of memory");
            return Ok(SYSCALL_FAILED);
        }

        let mut regs = self.procs[parent].regs;
        regs.set_rax(0);
        let proc = &mut self.procs[child];
        proc.space = Some(space);
        proc.regs = regs;
        proc.state = ProcState::Runnable;
        debug!("process {parent}: forked process {child}");
        Ok(child.as_u64())
    }

    /// Give `child` a private copy of every user page of `parent` above
    /// [`PROC_START_ADDR`]. Returns `false` when memory runs out.
    fn copy_user_pages(
        &mut self,
        parent: AddressSpace,
        child_space: AddressSpace,
        child: Pid,
    ) -> Result<bool, KernelError> {
        let owner = FrameOwner::Process(child);
        let mut src = parent.cursor(&self.mem, VirtualAddress::new(PROC_START_ADDR));
        while src.va().as_u64() < MEMSIZE_VIRTUAL {
            if let Some(page) = src.page().filter(|_| src.user()) {
                let Some(copy) = self.frames.alloc(&mut self.mem, owner) else {
                    return Ok(false);
                };
                self.mem.copy_frame(page, copy);
                let mapped = child_space.map(
                    &mut self.mem,
                    &mut self.frames.for_owner(owner),
                    src.va(),
                    copy,
                    src.perm(),
                );
                if mapped.is_err() {
                    // Not reachable from the child's tables yet.
                    self.frames.free(copy.base())?;
                    return Ok(false);
                }
            }
            if !src.advance(&self.mem) {
                break;
            }
        }
        Ok(true)
    }

    /// Tear down `pid` and free its slot.
    pub(crate) fn exit(&mut self, pid: Pid) -> Result<(), KernelError> {
        let proc = &mut self.procs[pid];
        let space = proc.space.take();
        proc.state = ProcState::Free;
        if let Some(space) = space {
            vm::release_space(&self.mem, &mut self.frames, space, pid)?;
        }
        debug!("process {pid}: exited, {} frames free", self.frames.free_count());
        Ok(())
    }
}
