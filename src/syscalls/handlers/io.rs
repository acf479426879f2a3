//! Console and keyboard syscalls.

use alloc::vec;

use crate::console::Console;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::memory::VirtAddr;
use crate::syscalls::dispatcher::{Flow, ERR_RET};
use crate::task::{CpuState, TaskState};

/// Longest string PUTS will copy out of user space in one call.
const PUTS_MAX: usize = 4096;

pub fn sys_putc(console: &mut dyn Console, ch: u32) -> u32 {
    console.write_byte(ch as u8);
    0
}

/// Write the NUL-terminated string at `ptr` in the calling task's address
/// space; returns the number of bytes written.
pub fn sys_puts(
    kernel: &mut Kernel,
    console: &mut dyn Console,
    ptr: u32,
) -> Result<u32, KernelError> {
    let space = &kernel.spaces[kernel.tasks.task(kernel.current_task).space];
    let mut buf = vec![0u8; PUTS_MAX];
    let len = space.read_cstr(&kernel.window, VirtAddr::new(ptr), &mut buf)?;
    console.write_bytes(&buf[..len]);
    Ok(len as u32)
}

/// Copy the next completed input line into `ebx`/`ecx` (buffer, capacity).
///
/// With no line buffered, the task blocks: its state becomes
/// WaitingForInput and `eip` is rolled back over the two-byte `int 0x80`,
/// so the call is retried transparently once the keyboard wakes it. This is
/// the one place the kernel gives the CPU away mid-syscall.
pub fn sys_gets(kernel: &mut Kernel, frame: &mut CpuState) -> Flow {
    let mut line = [0u8; 256];
    match kernel.input.read_line(&mut line) {
        Some(len) => {
            let wanted = (frame.ecx as usize).min(len);
            let space = &kernel.spaces[kernel.tasks.task(kernel.current_task).space];
            match space.write_bytes(&kernel.window, VirtAddr::new(frame.ebx), &line[..wanted]) {
                Ok(()) => frame.eax = wanted as u32,
                Err(_) => frame.eax = ERR_RET,
            }
            Flow::Return
        }
        None => {
            kernel.tasks.task_mut(kernel.current_task).state = TaskState::WaitingForInput;
            frame.eip -= 2;
            Flow::Reschedule
        }
    }
}
