//! Per-task two-level address spaces.
//!
//! An address space keeps two views of its page directory:
//!
//! * the **hardware view** — one physical page of 1024 raw entry words,
//!   exactly what gets loaded into the paging root register;
//! * the **software view** — a boxed array of the table frames backing each
//!   directory slot, which the kernel can walk without decoding raw words.
//!
//! Invariant: a software slot is `Some` iff the raw word's present bit is
//! set and both name the same frame. Every mutation of a slot goes through
//! [`AddressSpace::set_slot`], which writes both views in lock-step.
//!
//! Kernel-region slots are *shared by reference* between the boot space and
//! every user space: the same table frame and the same raw word. A mapping
//! added to the kernel region is therefore visible in all spaces at once.

use alloc::boxed::Box;

use log::trace;

use super::paging::{PageTableEntry, PteFlags, ENTRIES_PER_TABLE};
use super::pmm::FrameBitmap;
use super::{PhysAddr, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::arch::HardwareOps;
use crate::error::KernelError;

/// Index of an address space within the kernel context.
pub type SpaceId = usize;

/// Directory-entry flags used for every second-level table. Permissions are
/// enforced at the leaf entries, so tables are always reachable.
const TABLE_FLAGS: PteFlags = PteFlags::PRESENT
    .union(PteFlags::WRITABLE)
    .union(PteFlags::USER);

pub struct AddressSpace {
    /// Physical page holding the raw directory words.
    dir_phys: PhysAddr,
    /// Software view: table frame backing each directory slot. Always
    /// `ENTRIES_PER_TABLE` long; heap-built to keep it off the small
    /// per-task kernel stacks.
    tables: Box<[Option<PhysAddr>]>,
}

impl AddressSpace {
    /// A fresh, empty address space. Allocates the directory page.
    pub fn new(pmm: &mut FrameBitmap, window: &PhysWindow) -> Result<Self, KernelError> {
        let dir_phys = pmm.alloc_page()?;
        window.zero_page(dir_phys);
        Ok(Self {
            dir_phys,
            tables: alloc::vec![None; ENTRIES_PER_TABLE].into_boxed_slice(),
        })
    }

    /// A user address space sharing the first `kernel_slots` directory
    /// slots with `kernel` by reference, so kernel code and data stay
    /// reachable after any address-space switch.
    pub fn new_user(
        kernel: &AddressSpace,
        kernel_slots: usize,
        pmm: &mut FrameBitmap,
        window: &PhysWindow,
    ) -> Result<Self, KernelError> {
        let mut space = Self::new(pmm, window)?;
        let kernel_dir = window.table_mut(kernel.dir_phys);
        for slot in 0..kernel_slots {
            if let Some(table) = kernel.tables[slot] {
                space.tables[slot] = Some(table);
                window.table_mut(space.dir_phys).entries[slot] = kernel_dir.entries[slot];
            }
        }
        Ok(space)
    }

    /// Physical address of the directory page; this is what the hardware
    /// root register is loaded with.
    pub fn dir_phys(&self) -> PhysAddr {
        self.dir_phys
    }

    /// Table frame backing directory slot `slot`, if any.
    pub fn table(&self, slot: usize) -> Option<PhysAddr> {
        self.tables[slot]
    }

    /// The single mutation point for a directory slot: updates the software
    /// view and the raw hardware word together.
    fn set_slot(&mut self, window: &PhysWindow, slot: usize, table: PhysAddr) {
        self.tables[slot] = Some(table);
        window.table_mut(self.dir_phys).entries[slot].set(table, TABLE_FLAGS);
    }

    /// Find the table for `slot`, allocating and zeroing one on first use.
    fn ensure_table(
        &mut self,
        slot: usize,
        pmm: &mut FrameBitmap,
        window: &PhysWindow,
    ) -> Result<PhysAddr, KernelError> {
        if let Some(table) = self.tables[slot] {
            return Ok(table);
        }
        let table = pmm.alloc_page()?;
        window.zero_page(table);
        self.set_slot(window, slot, table);
        trace!("vmm: new table {:?} for slot {}", table, slot);
        Ok(table)
    }

    /// Install a present mapping `virt -> phys` with `flags`, then flush
    /// that one translation. Fails without touching the tables if the
    /// second-level table cannot be allocated.
    pub fn map_page(
        &mut self,
        pmm: &mut FrameBitmap,
        window: &PhysWindow,
        hw: &mut dyn HardwareOps,
        phys: PhysAddr,
        virt: VirtAddr,
        flags: PteFlags,
    ) -> Result<(), KernelError> {
        let table = self.ensure_table(virt.dir_index(), pmm, window)?;
        window.table_mut(table).entries[virt.table_index()]
            .set(phys, flags | PteFlags::PRESENT);
        hw.flush_page(virt);
        Ok(())
    }

    /// The entry covering `virt`. With `create` set, the second-level table
    /// is allocated on demand; otherwise an absent table reads as
    /// not-mapped (`Ok(None)`).
    pub fn get_page<'w>(
        &mut self,
        virt: VirtAddr,
        create: bool,
        pmm: &mut FrameBitmap,
        window: &'w PhysWindow,
    ) -> Result<Option<&'w mut PageTableEntry>, KernelError> {
        let table = match self.tables[virt.dir_index()] {
            Some(table) => table,
            None if create => self.ensure_table(virt.dir_index(), pmm, window)?,
            None => return Ok(None),
        };
        Ok(Some(
            &mut window.table_mut(table).entries[virt.table_index()],
        ))
    }

    /// Resolve `virt` to its physical address, if mapped.
    pub fn translate(&self, window: &PhysWindow, virt: VirtAddr) -> Option<PhysAddr> {
        let table = self.tables[virt.dir_index()]?;
        let entry = window.table_mut(table).entries[virt.table_index()];
        if !entry.is_present() {
            return None;
        }
        Some(PhysAddr::new(
            entry.frame_addr().as_u32() + virt.page_offset(),
        ))
    }

    /// Copy `bytes` into this space at `virt`, page by page through the
    /// physical window. Fails with `BadAddress` on the first unmapped page.
    pub fn write_bytes(
        &self,
        window: &PhysWindow,
        virt: VirtAddr,
        bytes: &[u8],
    ) -> Result<(), KernelError> {
        let mut written = 0;
        while written < bytes.len() {
            let va = VirtAddr::new(virt.as_u32() + written as u32);
            let pa = self.translate(window, va).ok_or(KernelError::BadAddress)?;
            let chunk = ((PAGE_SIZE - va.page_offset()) as usize).min(bytes.len() - written);
            window
                .bytes_mut(pa, chunk)
                .copy_from_slice(&bytes[written..written + chunk]);
            written += chunk;
        }
        Ok(())
    }

    /// Zero `len` bytes of this space starting at `virt`.
    pub fn zero_range(
        &self,
        window: &PhysWindow,
        virt: VirtAddr,
        len: usize,
    ) -> Result<(), KernelError> {
        let mut done = 0;
        while done < len {
            let va = VirtAddr::new(virt.as_u32() + done as u32);
            let pa = self.translate(window, va).ok_or(KernelError::BadAddress)?;
            let chunk = ((PAGE_SIZE - va.page_offset()) as usize).min(len - done);
            window.bytes_mut(pa, chunk).fill(0);
            done += chunk;
        }
        Ok(())
    }

    /// Copy `buf.len()` bytes out of this space starting at `virt`.
    pub fn read_bytes(
        &self,
        window: &PhysWindow,
        virt: VirtAddr,
        buf: &mut [u8],
    ) -> Result<(), KernelError> {
        let mut read = 0;
        while read < buf.len() {
            let va = VirtAddr::new(virt.as_u32() + read as u32);
            let pa = self.translate(window, va).ok_or(KernelError::BadAddress)?;
            let chunk = ((PAGE_SIZE - va.page_offset()) as usize).min(buf.len() - read);
            buf[read..read + chunk].copy_from_slice(window.bytes(pa, chunk));
            read += chunk;
        }
        Ok(())
    }

    /// Read a NUL-terminated string of at most `buf.len()` bytes starting
    /// at `virt`; returns the number of bytes before the terminator.
    pub fn read_cstr(
        &self,
        window: &PhysWindow,
        virt: VirtAddr,
        buf: &mut [u8],
    ) -> Result<usize, KernelError> {
        for i in 0..buf.len() {
            let mut byte = [0u8];
            self.read_bytes(window, VirtAddr::new(virt.as_u32() + i as u32), &mut byte)?;
            if byte[0] == 0 {
                return Ok(i);
            }
            buf[i] = byte[0];
        }
        Ok(buf.len())
    }

    /// Check the two directory views against each other. Used by tests and
    /// debug assertions; always true unless a slot was mutated outside
    /// `set_slot`.
    pub fn views_consistent(&self, window: &PhysWindow) -> bool {
        let dir = window.table_mut(self.dir_phys);
        self.tables.iter().enumerate().all(|(slot, table)| {
            let raw = dir.entries[slot];
            match table {
                Some(frame) => raw.is_present() && raw.frame_addr() == *frame,
                None => !raw.is_present(),
            }
        })
    }
}
