//! Process syscalls.

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::HardwareOps;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::layout::{MAX_ARGS, MAX_ARG_LEN};
use crate::memory::VirtAddr;

fn read_user_str(
    kernel: &Kernel,
    space_id: usize,
    ptr: u32,
) -> Result<String, KernelError> {
    let space = &kernel.spaces[space_id];
    let mut buf = [0u8; MAX_ARG_LEN];
    let len = space.read_cstr(&kernel.window, VirtAddr::new(ptr), &mut buf)?;
    core::str::from_utf8(&buf[..len])
        .map(String::from)
        .map_err(|_| KernelError::BadAddress)
}

/// Spawn the archive entry named by the NUL-terminated string at
/// `path_ptr`. `argv_ptr`, when non-zero, points to a NULL-terminated array
/// of string pointers in the caller's address space. Returns the new task
/// id.
pub fn sys_exec(
    kernel: &mut Kernel,
    hw: &mut dyn HardwareOps,
    path_ptr: u32,
    argv_ptr: u32,
) -> Result<u32, KernelError> {
    let space_id = kernel.tasks.task(kernel.current_task).space;
    let path = read_user_str(kernel, space_id, path_ptr)?;

    let mut args: Vec<String> = Vec::new();
    if argv_ptr != 0 {
        let space = &kernel.spaces[space_id];
        while args.len() < MAX_ARGS {
            let mut word = [0u8; 4];
            space.read_bytes(
                &kernel.window,
                VirtAddr::new(argv_ptr + 4 * args.len() as u32),
                &mut word,
            )?;
            let ptr = u32::from_le_bytes(word);
            if ptr == 0 {
                break;
            }
            args.push(read_user_str(kernel, space_id, ptr)?);
        }
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let id = kernel.spawn_from_loader(&path, &arg_refs, hw)?;
    Ok(id.0)
}
