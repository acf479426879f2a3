//! The hardware page-table entry format.
//!
//! Both levels of the two-level structure use the same 32-bit entry word:
//! flag bits in the low 12 bits, a 20-bit frame number above them.

use bitflags::bitflags;

use super::{PhysAddr, PAGE_SIZE};

bitflags! {
    /// Entry bits as the paging unit reads them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
    }
}

const FRAME_MASK: u32 = 0xFFFF_F000;

/// One page-table (or page-directory) entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    /// Frame number, i.e. physical address divided by the page size.
    pub const fn frame(self) -> u32 {
        (self.0 & FRAME_MASK) >> 12
    }

    pub const fn frame_addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & FRAME_MASK)
    }

    /// Point the entry at `frame` with `flags`; PRESENT must be part of
    /// `flags` for the mapping to take effect.
    pub fn set(&mut self, frame: PhysAddr, flags: PteFlags) {
        debug_assert!(frame.is_page_aligned());
        self.0 = (frame.as_u32() & FRAME_MASK) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Entries per table; also the number of directory slots.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// One 4 KiB table of 1024 entries, page-aligned as the MMU requires.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE as usize);

impl PageTable {
    pub fn zero(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_fields() {
        let mut e = PageTableEntry::empty();
        assert!(!e.is_present());

        e.set(
            PhysAddr::new(0x1234_5000),
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        );
        assert!(e.is_present());
        assert_eq!(e.frame(), 0x1234_5000 / 4096);
        assert_eq!(e.frame_addr(), PhysAddr::new(0x1234_5000));
        assert!(e.flags().contains(PteFlags::WRITABLE));
        assert!(e.flags().contains(PteFlags::USER));

        e.clear();
        assert_eq!(e.raw(), 0);
    }

    #[test]
    fn frame_field_does_not_bleed_into_flags() {
        let mut e = PageTableEntry::empty();
        e.set(PhysAddr::new(0xFFFF_F000), PteFlags::PRESENT);
        assert_eq!(e.frame(), 0xFFFFF);
        assert_eq!(e.flags(), PteFlags::PRESENT);
    }
}
