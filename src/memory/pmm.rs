//! Physical page allocator.
//!
//! One bit per 4 KiB page, scanned word by word from the lowest index. The
//! bitmap itself lives in physical memory just above the boot high-water
//! mark (the highest address used by the kernel image and any loaded boot
//! modules) and marks its own pages as used, so the first allocation always
//! lands above everything the boot path placed in memory.

use log::debug;

use super::{align_up, PhysAddr, PhysWindow, PAGE_SIZE};
use crate::error::KernelError;

const BITS_PER_WORD: usize = 32;

pub struct FrameBitmap {
    bits: *mut u32,
    words: usize,
    total_pages: usize,
    used: usize,
}

// SAFETY: the bitmap pointer targets memory owned by the kernel for the
// lifetime of the allocator, and all mutation happens inside the
// disabled-interrupt trap window.
unsafe impl Send for FrameBitmap {}

impl FrameBitmap {
    /// Set up the allocator over `total_bytes` of physical memory, placing
    /// the bitmap at the first page boundary at or above `high_water_mark`
    /// and reserving every page up to and including the bitmap's own.
    pub fn init(window: &PhysWindow, total_bytes: u32, high_water_mark: u32) -> Self {
        let total_pages = (total_bytes / PAGE_SIZE) as usize;
        let words = total_pages.div_ceil(BITS_PER_WORD);

        let bitmap_base = PhysAddr::new(align_up(high_water_mark, PAGE_SIZE));
        let bitmap_bytes = words * core::mem::size_of::<u32>();
        let bits = window.bytes_mut(bitmap_base, bitmap_bytes).as_mut_ptr() as *mut u32;
        unsafe { core::ptr::write_bytes(bits, 0, words) };

        let mut pmm = Self {
            bits,
            words,
            total_pages,
            used: 0,
        };

        let reserved_end = align_up(bitmap_base.as_u32() + bitmap_bytes as u32, PAGE_SIZE);
        for page in 0..(reserved_end / PAGE_SIZE) as usize {
            pmm.mark_used(page);
        }

        debug!(
            "pmm: {} pages total, {} reserved below {:#x}",
            pmm.total_pages, pmm.used, reserved_end
        );
        pmm
    }

    fn word(&self, index: usize) -> u32 {
        unsafe { *self.bits.add(index) }
    }

    fn set_bit(&mut self, page: usize) {
        unsafe { *self.bits.add(page / BITS_PER_WORD) |= 1 << (page % BITS_PER_WORD) };
    }

    fn clear_bit(&mut self, page: usize) {
        unsafe { *self.bits.add(page / BITS_PER_WORD) &= !(1 << (page % BITS_PER_WORD)) };
    }

    fn is_set(&self, page: usize) -> bool {
        self.word(page / BITS_PER_WORD) & (1 << (page % BITS_PER_WORD)) != 0
    }

    fn mark_used(&mut self, page: usize) {
        if page < self.total_pages && !self.is_set(page) {
            self.set_bit(page);
            self.used += 1;
        }
    }

    /// Hand out the lowest free page.
    pub fn alloc_page(&mut self) -> Result<PhysAddr, KernelError> {
        for word_index in 0..self.words {
            let word = self.word(word_index);
            if word == u32::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            let page = word_index * BITS_PER_WORD + bit;
            if page >= self.total_pages {
                break;
            }
            self.set_bit(page);
            self.used += 1;
            return Ok(PhysAddr::new(page as u32 * PAGE_SIZE));
        }
        Err(KernelError::OutOfMemory)
    }

    /// Release a page. Releasing a page that was never handed out is a
    /// silent no-op.
    pub fn free_page(&mut self, addr: PhysAddr) {
        let page = addr.page_index();
        if page < self.total_pages && self.is_set(page) {
            self.clear_bit(page);
            self.used -= 1;
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn used_count(&self) -> usize {
        self.used
    }

    pub fn free_count(&self) -> usize {
        self.total_pages - self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    const MIB: u32 = 1024 * 1024;

    #[test]
    fn sixteen_mib_with_one_mib_reserved() {
        // The arena only needs to back the bitmap itself; allocation never
        // touches the pages it hands out.
        let (_arena, window) = testutil::arena(260);
        let mut pmm = FrameBitmap::init(&window, 16 * MIB, MIB);

        assert_eq!(pmm.total_pages(), 4096);
        assert_eq!(pmm.free_count() + pmm.used_count(), pmm.total_pages());

        let first = pmm.alloc_page().unwrap();
        assert!(first.as_u32() >= MIB, "allocated below the reserved region");
    }

    #[test]
    fn never_hands_out_the_same_page_twice() {
        let (_arena, window) = testutil::arena(64);
        let mut pmm = FrameBitmap::init(&window, 64 * 4096, 4096);

        let mut seen = std::collections::HashSet::new();
        while let Ok(page) = pmm.alloc_page() {
            assert!(seen.insert(page.as_u32()), "page {:?} issued twice", page);
            assert_eq!(pmm.free_count() + pmm.used_count(), pmm.total_pages());
        }
        assert_eq!(pmm.free_count(), 0);
    }

    #[test]
    fn freed_pages_are_reissued_lowest_first() {
        let (_arena, window) = testutil::arena(64);
        let mut pmm = FrameBitmap::init(&window, 64 * 4096, 4096);

        let a = pmm.alloc_page().unwrap();
        let b = pmm.alloc_page().unwrap();
        assert!(a < b);

        pmm.free_page(a);
        assert_eq!(pmm.alloc_page().unwrap(), a);
    }

    #[test]
    fn free_of_unallocated_page_is_a_no_op() {
        let (_arena, window) = testutil::arena(64);
        let mut pmm = FrameBitmap::init(&window, 64 * 4096, 4096);

        let used = pmm.used_count();
        pmm.free_page(PhysAddr::new(40 * 4096));
        assert_eq!(pmm.used_count(), used);

        // Out-of-range addresses are ignored too.
        pmm.free_page(PhysAddr::new(0xFFFF_0000));
        assert_eq!(pmm.used_count(), used);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let (_arena, window) = testutil::arena(8);
        let mut pmm = FrameBitmap::init(&window, 8 * 4096, 4096);

        while pmm.free_count() > 0 {
            pmm.alloc_page().unwrap();
        }
        assert_eq!(pmm.alloc_page(), Err(KernelError::OutOfMemory));
    }
}
