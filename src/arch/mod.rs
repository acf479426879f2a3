//! The hardware boundary.
//!
//! Core code never touches control registers, the TSS or the TLB directly;
//! it asks for those effects through [`HardwareOps`]. The real
//! implementation lives in [`x86`] and is only compiled for x86 targets;
//! tests substitute a recording fake.

use crate::memory::{PhysAddr, VirtAddr};

#[cfg(all(target_arch = "x86", not(test)))]
pub mod x86;

pub trait HardwareOps {
    /// Load the paging root register with the directory at `root`.
    /// Interrupts must be disabled; the caller updates the current-space
    /// bookkeeping immediately afterwards.
    fn load_root(&mut self, root: PhysAddr);

    /// Invalidate the cached translation for a single page.
    fn flush_page(&mut self, virt: VirtAddr);

    /// Point the task-switch descriptor's ring-0 stack slot at `stack_top`,
    /// so the next privilege-elevation trap lands on that stack.
    fn set_kernel_stack(&mut self, stack_top: VirtAddr);
}
