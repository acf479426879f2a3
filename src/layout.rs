//! Fixed memory-map and ABI constants.
//!
//! Segment selector values match the GDT built in `arch/x86/gdt.rs`; they
//! are defined here because the initial CPU state of a task is assembled by
//! the core, not by the hardware layer.

/// Ring-0 code segment selector.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Ring-0 data segment selector.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// Ring-3 code segment selector (RPL 3).
pub const USER_CODE_SELECTOR: u16 = 0x1b;
/// Ring-3 data segment selector (RPL 3).
pub const USER_DATA_SELECTOR: u16 = 0x23;
/// TSS selector, loaded once at boot.
pub const TSS_SELECTOR: u16 = 0x28;

/// EFLAGS for a freshly spawned task: IF set plus the always-one bit.
pub const EFLAGS_IF: u32 = 0x202;

/// PIT tick, after remapping the primary PIC to 32.
pub const TIMER_VECTOR: u8 = 32;
/// PS/2 keyboard, IRQ 1.
pub const KEYBOARD_VECTOR: u8 = 33;
/// Software interrupt gate for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Top of the fixed-placement user stack.
pub const USER_STACK_TOP: u32 = 0xBFC0_0000;
/// User stack size in pages.
pub const USER_STACK_PAGES: usize = 4;

/// Bytes reserved for the kernel heap right above the boot high-water mark.
pub const KERNEL_HEAP_SIZE: usize = 1024 * 1024;

/// Scheduler timeslice source: PIT programmed to this rate at boot.
pub const TIMER_HZ: u32 = 100;

/// Cap on EXEC argv entries.
pub const MAX_ARGS: usize = 16;
/// Cap on a single EXEC argument or path, bytes.
pub const MAX_ARG_LEN: usize = 256;
