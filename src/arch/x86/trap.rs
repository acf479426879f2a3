//! Trap entry and exit.
//!
//! Every vector funnels through one stub path that lays a
//! [`CpuState`](crate::task::CpuState) out on the kernel stack, exactly in
//! field order: the stub pushes a dummy error code where the CPU did not,
//! then the vector, the data segment selectors and the general registers.
//! `trap_dispatch` gets a pointer to that frame; if it returns, the same
//! frame is popped back. Task switches never return from dispatch — the
//! scheduler's chosen state is materialized by [`resume_cpu_state`].

use core::arch::{asm, global_asm};
use core::mem::MaybeUninit;

use crate::task::CpuState;

// Stubs for the CPU exceptions, the 16 remapped IRQ lines and the syscall
// gate. Vectors 8, 10-14 and 17 push a hardware error code; the rest get a
// dummy so the frame layout is uniform.
global_asm!(
    r#"
.macro trap_stub_noerr vec
    .global trap_stub_\vec
trap_stub_\vec\():
    push 0
    push \vec
    jmp trap_common
.endm

.macro trap_stub_err vec
    .global trap_stub_\vec
trap_stub_\vec\():
    push \vec
    jmp trap_common
.endm

.irp vec, 0,1,2,3,4,5,6,7,9,15,16,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    trap_stub_noerr \vec
.endr
.irp vec, 32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,128
    trap_stub_noerr \vec
.endr
.irp vec, 8,10,11,12,13,14,17
    trap_stub_err \vec
.endr

trap_common:
    push gs
    push fs
    push es
    push ds
    pushad
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call trap_dispatch
    add esp, 4
    popad
    pop ds
    pop es
    pop fs
    pop gs
    add esp, 8
    iretd

.global TRAP_STUBS
TRAP_STUBS:
.irp vec, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    .long trap_stub_\vec
.endr
.irp vec, 32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,128
    .long trap_stub_\vec
.endr
"#
);

extern "C" {
    /// Entry addresses for vectors 0–47 followed by 0x80.
    pub static TRAP_STUBS: [u32; 49];
}

/// Index of the syscall stub within [`TRAP_STUBS`].
pub const SYSCALL_STUB_INDEX: usize = 48;

#[no_mangle]
extern "C" fn trap_dispatch(frame: &mut CpuState) {
    super::boot::handle_trap(frame);
}

/// Scratch frame used when resuming into ring 3; `iretd` switches to the
/// user stack, so the buffer's lifetime ends with the instruction.
static mut RESUME_BUF: MaybeUninit<CpuState> = MaybeUninit::uninit();

/// Restore `state` into the processor. Does not return.
///
/// # Safety
/// Must run with interrupts disabled on a trap path. `state` must describe
/// a resumable context: a ring-3 state with a valid user stack, or a ring-0
/// state whose `esp` points into that task's live kernel stack.
pub unsafe fn resume_cpu_state(state: &CpuState) -> ! {
    let target: *mut u8;
    if state.cs & 3 == 3 {
        // Privilege change: iretd pops the user esp/ss tail, so the frame
        // can live anywhere. The next trap re-enters on TSS.esp0.
        let buf = core::ptr::addr_of_mut!(RESUME_BUF) as *mut CpuState;
        unsafe { buf.write(*state) };
        target = buf as *mut u8;
    } else {
        // Same privilege: rebuild the frame on the task's own stack so
        // execution continues there after iretd. The saved esp is the
        // value pushad recorded, 32 bytes above the frame base.
        let frame_base = (state.esp - 32) as *mut u8;
        // Everything up to and including eflags; no esp/ss tail.
        unsafe {
            core::ptr::copy_nonoverlapping(
                (state as *const CpuState).cast::<u8>(),
                frame_base,
                17 * 4,
            )
        };
        target = frame_base;
    }

    unsafe {
        asm!(
            "mov esp, {0}",
            "popad",
            "pop ds",
            "pop es",
            "pop fs",
            "pop gs",
            "add esp, 8",
            "iretd",
            in(reg) target,
            options(noreturn)
        );
    }
}
