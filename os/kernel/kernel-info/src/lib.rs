//! # Machine Layout and Kernel Limits
//!
//! This crate is the single source of truth for the fixed facts every other
//! kernel crate agrees on: where the kernel image, its page tables and its
//! stack live in physical memory, which physical ranges are off limits for the
//! frame allocator, where process address spaces begin and end, and how large
//! the process table is.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x000000 ┌──────────────────────────────┐
//!          │ null page (reserved)         │
//! 0x001000 ├──────────────────────────────┤
//!          │ allocatable                  │
//! 0x040000 ├──────────────────────────────┤ KERNEL_START_ADDR (trap entry page)
//!          │ kernel code + data           │
//! 0x05B000 │   kernel page tables (5)     │ KERNEL_PAGETABLE_ADDR
//! 0x060000 ├──────────────────────────────┤ KERNEL_END_ADDR
//!          │ allocatable                  │
//! 0x07F000 ├──────────────────────────────┤
//!          │ kernel stack page            │
//! 0x080000 ├──────────────────────────────┤ KERNEL_STACK_TOP
//!          │ allocatable                  │
//! 0x0A0000 ├──────────────────────────────┤ IO_PHYS_MEM
//!          │ legacy I/O hole (reserved)   │
//! 0x100000 ├──────────────────────────────┤ EXT_PHYS_MEM
//!          │ allocatable                  │
//! 0x200000 └──────────────────────────────┘ MEMSIZE_PHYSICAL
//! ```
//!
//! ## Process Virtual Layout
//!
//! ```text
//! 0x000000 ┌──────────────────────────────┐
//!          │ kernel mappings (supervisor) │ shared with the kernel address space
//! 0x100000 ├──────────────────────────────┤ PROC_START_ADDR
//!          │ program segments, heap       │ owned by the process
//! 0x2FF000 ├──────────────────────────────┤ PROC_STACK_ADDR
//!          │ stack page                   │
//! 0x300000 └──────────────────────────────┘ MEMSIZE_VIRTUAL
//! ```

#![cfg_attr(not(test), no_std)]

pub mod memory;
pub mod process;
