use crate::PagePermissions;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// A single 64-bit x86-64 page table entry in its raw bitfield form.
///
/// This models the **common superset** of fields found in all four paging
/// levels (PML4E, PDPTE, PDE, PTE).
///
/// ### Bit layout (canonical)
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page flag |
/// | 8         | `G`               | Global (leaf only) |
/// | 9–11      | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntryBits, PagePermissions, PhysicalPage};
/// let e = PageEntryBits::leaf(PhysicalPage::from_number(0x12), PagePermissions::USER_RO);
/// assert!(e.present());
/// assert!(!e.writable());
/// assert_eq!(e.page(), PhysicalPage::from_number(0x12));
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Set allows CPL 3 access.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6), leaf only. Set by the CPU on first write.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// In a PDPTE or PDE a set bit makes the entry a 1 GiB / 2 MiB leaf. The
    /// kernel never creates such entries; walkers treat them as leaves.
    pub large_page: bool,

    /// Global (G, bit 8), leaf only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (PKU, bits 59..=62) if supported; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    /// A leaf entry mapping `page` with `perm`.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPage, perm: PagePermissions) -> Self {
        let mut e = Self::from_bits(perm.bits());
        e.set_physical_address(page.base());
        e
    }

    /// A non-leaf entry pointing at the next-level table in `page`.
    ///
    /// Present, writable and user: the leaf decides the final permissions.
    #[inline]
    #[must_use]
    pub const fn table(page: PhysicalPage) -> Self {
        Self::leaf(page, PagePermissions::USER_RW)
    }

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// The frame this entry points at (table or leaf).
    #[inline]
    #[must_use]
    pub const fn page(&self) -> PhysicalPage {
        PhysicalPage::containing(self.physical_address())
    }

    /// The P/W/U bits of this entry.
    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> PagePermissions {
        PagePermissions::from_bits_truncate(self.into_bits())
    }
}
