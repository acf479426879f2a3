//! Syscall dispatch.

use log::warn;

use super::handlers;
use super::numbers::SyscallNumber;
use crate::arch::HardwareOps;
use crate::console::Console;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::task::CpuState;

/// The -1 returned to user mode on any failed call.
pub const ERR_RET: u32 = u32::MAX;

/// What the trap loop does after a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Resume the calling task with the (possibly updated) frame.
    Return,
    /// The call gave up the CPU; run the scheduler on this frame.
    Reschedule,
}

fn result_to_eax(result: Result<u32, KernelError>) -> u32 {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("syscall failed: {}", err);
            ERR_RET
        }
    }
}

/// Handle the syscall captured in `frame`. The frame is the live trap frame
/// of the calling task; `eax` is overwritten with the result for calls that
/// return.
pub fn dispatch(
    kernel: &mut Kernel,
    frame: &mut CpuState,
    hw: &mut dyn HardwareOps,
    console: &mut dyn Console,
) -> Flow {
    match SyscallNumber::from(frame.eax) {
        SyscallNumber::Exit => {
            kernel.exit_current(frame.ebx);
            Flow::Reschedule
        }
        SyscallNumber::Putc => {
            frame.eax = handlers::io::sys_putc(console, frame.ebx);
            Flow::Return
        }
        SyscallNumber::Puts => {
            frame.eax = result_to_eax(handlers::io::sys_puts(kernel, console, frame.ebx));
            Flow::Return
        }
        SyscallNumber::Gets => handlers::io::sys_gets(kernel, frame),
        SyscallNumber::Exec => {
            frame.eax =
                result_to_eax(handlers::process::sys_exec(kernel, hw, frame.ebx, frame.ecx));
            Flow::Return
        }
        SyscallNumber::Yield => Flow::Reschedule,
        SyscallNumber::Unknown => {
            warn!("unknown syscall {}", frame.eax);
            frame.eax = ERR_RET;
            Flow::Return
        }
    }
}
