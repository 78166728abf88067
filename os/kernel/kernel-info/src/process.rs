//! # Process Limits

use core::fmt;

/// Size of the process table. Slot 0 is never used.
pub const NPROC: usize = 16;

/// Default timer interrupt frequency.
pub const HZ: u32 = 100;

/// Process identifier: an index into the process table in `1..NPROC`.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u16);

impl Pid {
    /// The unused slot 0. Never names a process.
    pub const NONE: Self = Self(0);

    /// Pid for a table slot, `None` for slot 0 and out-of-range slots.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(slot: usize) -> Option<Self> {
        if slot == 0 || slot >= NPROC {
            None
        } else {
            Some(Self(slot as u16))
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// All process slots in table order, `1..NPROC`.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..NPROC).filter_map(Self::new)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
