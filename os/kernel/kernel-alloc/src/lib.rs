//! # Physical Frame Allocation
//!
//! This crate owns the answer to "who holds this 4 KiB frame?". Every frame of
//! installed memory has exactly one [`FrameOwner`]: free, the kernel, or one
//! process. All ownership transitions go through [`FrameAllocator`].
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Address spaces (kernel-vmem)                 │
//! │    • need frames for intermediate tables            │
//! └───────────┬─────────────────────────┬───────────────┘
//!             │ FrameAlloc              │ FrameAlloc
//! ┌───────────▼────────────┐ ┌──────────▼──────────────┐
//! │    KernelTablePool     │ │      OwnedFrames        │
//! │  • reserved frames in  │ │  • borrows the frame    │
//! │    the kernel image    │ │    table for one owner  │
//! │  • boot only, bump     │ │                         │
//! └────────────────────────┘ └──────────┬──────────────┘
//!                                       │
//! ┌─────────────────────────────────────▼───────────────┐
//! │              FrameAllocator                         │
//! │    • one owner slot per physical frame              │
//! │    • first-fit, zero-filling, reusing               │
//! │    • invalid frees are reported, never ignored      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Allocatable frames
//!
//! [`kernel_info::memory::is_allocatable`] decides which frames may ever be
//! handed out: not the null page, not the legacy I/O hole, not kernel code,
//! data or stack, and nothing beyond installed memory. Kernel page tables are
//! carved out of the kernel data range by [`KernelTablePool`] and therefore
//! never appear in the general allocator.
//!
//! ## Example
//!
//! ```rust
//! # use kernel_alloc::{FrameAllocator, FrameOwner};
//! # use kernel_info::process::Pid;
//! # use kernel_vmem::{PageFrame, PhysMapper, PhysicalPage};
//! # struct Ram(Vec<PageFrame>);
//! # impl PhysMapper for Ram {
//! #     fn frame(&self, p: PhysicalPage) -> &PageFrame { &self.0[p.number()] }
//! #     fn frame_mut(&mut self, p: PhysicalPage) -> &mut PageFrame { &mut self.0[p.number()] }
//! # }
//! let mut ram = Ram(vec![PageFrame::zeroed(); 512]);
//! let mut frames = FrameAllocator::new();
//! let pid = Pid::new(1).unwrap();
//!
//! let page = frames.alloc(&mut ram, FrameOwner::Process(pid)).unwrap();
//! assert_eq!(frames.owner(page), FrameOwner::Process(pid));
//!
//! frames.free(page.base()).unwrap();
//! assert!(frames.free(page.base()).is_err()); // double free
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod frame_alloc;
pub mod kernel_pool;

pub use crate::frame_alloc::{FrameAllocator, FrameError, FrameOwner, OwnedFrames};
pub use crate::kernel_pool::KernelTablePool;
