//! Kernel heap.
//!
//! A `linked_list_allocator` heap over a fixed region reserved right above
//! the boot high-water mark. Host test builds use std's allocator instead,
//! so the global allocator only exists on target builds.

#[cfg(all(target_arch = "x86", not(test)))]
#[global_allocator]
static HEAP: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Hand the heap its backing region.
///
/// # Safety
/// `start..start + size` must be unused, writable memory that stays
/// reserved for the heap forever. Must be called exactly once, before the
/// first allocation.
#[cfg(all(target_arch = "x86", not(test)))]
pub unsafe fn init(start: usize, size: usize) {
    HEAP.lock().init(start as *mut u8, size);
}
