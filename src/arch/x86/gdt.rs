//! Descriptor tables: a flat 32-bit GDT with ring-0 and ring-3 code/data
//! segments and one TSS whose `esp0` slot the scheduler repoints before
//! resuming a user task.

use core::arch::asm;
use core::mem::size_of;

use spin::Mutex;

use crate::layout::{KERNEL_DATA_SELECTOR, TSS_SELECTOR};

/// 32-bit task state segment. Only `ss0`/`esp0` matter to this kernel; the
/// rest exists because the hardware defines it.
#[repr(C, packed)]
struct TaskStateSegment {
    prev_task: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            prev_task: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

/// A flat 4 GiB segment descriptor.
const fn flat_descriptor(access: u8) -> u64 {
    let limit_low = 0xffffu64;
    let access = access as u64;
    // granularity: 4 KiB units, 32-bit, limit 19:16 = 0xf
    let flags_limit_high = 0xcfu64;
    limit_low | (access << 40) | (flags_limit_high << 48)
}

fn tss_descriptor(base: u32, limit: u32) -> u64 {
    let base = base as u64;
    let limit = limit as u64;
    (limit & 0xffff)
        | ((base & 0xff_ffff) << 16)
        | (0x89u64 << 40) // present, 32-bit available TSS
        | (((limit >> 16) & 0xf) << 48)
        | (((base >> 24) & 0xff) << 56)
}

const GDT_LEN: usize = 6;

static GDT: Mutex<[u64; GDT_LEN]> = Mutex::new([
    0,
    flat_descriptor(0x9a), // kernel code
    flat_descriptor(0x92), // kernel data
    flat_descriptor(0xfa), // user code
    flat_descriptor(0xf2), // user data
    0,                     // TSS, patched at init
]);

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

/// Build and load the GDT, reload the segment registers, load the TSS.
pub fn init() {
    let mut gdt = GDT.lock();
    {
        let tss = TSS.lock();
        let base = &*tss as *const TaskStateSegment as u32;
        gdt[(TSS_SELECTOR as usize) / 8] =
            tss_descriptor(base, size_of::<TaskStateSegment>() as u32 - 1);
    }

    let pointer = DescriptorPointer {
        limit: (GDT_LEN * size_of::<u64>() - 1) as u16,
        base: gdt.as_ptr() as u32,
    };

    unsafe {
        asm!(
            "lgdt [{ptr}]",
            // Far return to reload CS, then refresh the data segments.
            "push 0x08",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "mov ds, {sel:e}",
            "mov es, {sel:e}",
            "mov fs, {sel:e}",
            "mov gs, {sel:e}",
            "mov ss, {sel:e}",
            ptr = in(reg) &pointer,
            tmp = out(reg) _,
            sel = in(reg) KERNEL_DATA_SELECTOR as u32,
        );
        asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
    }
}

/// Repoint the ring-0 stack used by the next privilege-elevation trap.
pub fn set_kernel_stack(stack_top: u32) {
    TSS.lock().esp0 = stack_top;
}
