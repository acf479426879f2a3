//! Boot path and trap routing.
//!
//! `boot_main` brings the machine from the multiboot handoff to a running
//! scheduler: descriptor tables, interrupt controllers, physical memory,
//! the identity-mapped boot address space, paging, the boot archive, and
//! finally the `init` program from the archive. The boot flow then becomes
//! task 0, the idle task, and parks in `hlt`.

use log::{error, info, warn, LevelFilter};
use spin::Mutex;

use super::{gdt, idt, pic, pit, trap, vga, X86Hardware};
use crate::arch::HardwareOps;
use crate::interrupts::Dispatch;
use crate::kernel::Kernel;
use crate::layout::{KEYBOARD_VECTOR, KERNEL_HEAP_SIZE, SYSCALL_VECTOR, TIMER_VECTOR};
use crate::memory::address_space::AddressSpace;
use crate::memory::paging::PteFlags;
use crate::memory::pmm::FrameBitmap;
use crate::memory::{align_up, PhysAddr, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::fs::tar::TarArchive;
use crate::syscalls;
use crate::task::scheduler::Decision;
use crate::task::CpuState;

/// Multiboot v1 information record, as far as this kernel reads it.
#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
}

#[repr(C)]
struct MultibootModule {
    start: u32,
    end: u32,
    string: u32,
    reserved: u32,
}

const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2badb002;

static KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);
static DISPATCH: Mutex<Dispatch> = Mutex::new(Dispatch::new());

extern "C" {
    /// Highest address of the kernel image, provided by the linker script.
    static __kernel_end: u8;
}

fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut guard = KERNEL.lock();
    match guard.as_mut() {
        Some(kernel) => f(kernel),
        None => panic!("trap before kernel initialization"),
    }
}

/// Rust entry, called by `_start` with the bootloader's handoff registers.
pub fn boot_main(magic: u32, info_addr: u32) -> ! {
    super::serial::init();
    super::logger::init(LevelFilter::Debug);
    vga::init();

    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        panic!("bad multiboot magic {magic:#x}");
    }
    let info = unsafe { &*(info_addr as *const MultibootInfo) };

    gdt::init();
    idt::init();
    pic::init();
    pit::init();
    for vector in 0u8..32 {
        DISPATCH.lock().register(vector, fault_handler);
    }

    // mem_upper counts KiB above the 1 MiB line.
    let total_bytes = (info.mem_upper * 1024) + 1024 * 1024;
    let kernel_end = unsafe { &__kernel_end as *const u8 as u32 };

    let (archive_start, archive_end) = first_module(info).unwrap_or((0, 0));
    let high_water = kernel_end.max(archive_end);
    info!(
        "boot: {} KiB of memory, kernel ends at {:#x}, archive {:#x}..{:#x}",
        total_bytes / 1024,
        kernel_end,
        archive_start,
        archive_end
    );

    // Heap first, carved directly out of the reserved low region; the page
    // allocator starts above it.
    let heap_base = align_up(high_water, PAGE_SIZE);
    unsafe { crate::memory::heap::init(heap_base as usize, KERNEL_HEAP_SIZE) };

    let window = unsafe { PhysWindow::identity() };
    let mut pmm = FrameBitmap::init(&window, total_bytes, heap_base + KERNEL_HEAP_SIZE as u32);

    // The boot address space identity-maps all of physical memory with
    // kernel permissions; every user space shares these directory slots.
    let mut hw = X86Hardware;
    let mut boot_space = AddressSpace::new(&mut pmm, &window).expect("no memory for boot space");
    let mut addr = 0u32;
    while addr < total_bytes {
        boot_space
            .map_page(
                &mut pmm,
                &window,
                &mut hw,
                PhysAddr::new(addr),
                VirtAddr::new(addr),
                PteFlags::WRITABLE,
            )
            .expect("no memory for boot mappings");
        addr += PAGE_SIZE;
    }
    let kernel_slots = (total_bytes as usize).div_ceil(4 * 1024 * 1024);

    hw.load_root(boot_space.dir_phys());
    unsafe { super::enable_paging() };
    info!("boot: paging on, {} kernel directory slots", kernel_slots);

    let archive = if archive_start != 0 {
        let bytes = unsafe {
            core::slice::from_raw_parts(
                archive_start as *const u8,
                (archive_end - archive_start) as usize,
            )
        };
        TarArchive::new(bytes)
    } else {
        warn!("boot: no module loaded, archive is empty");
        TarArchive::empty()
    };

    *KERNEL.lock() = Some(Kernel::new(window, pmm, boot_space, kernel_slots, archive));

    match with_kernel(|k| k.spawn_from_loader("init", &[], &mut X86Hardware)) {
        Ok(id) => info!("boot: init is task {:?}", id),
        Err(err) => error!("boot: cannot start init: {}", err),
    }

    super::interrupts_enable();
    // From here on this flow is task 0; the timer does the rest.
    loop {
        super::halt_once();
    }
}

fn first_module(info: &MultibootInfo) -> Option<(u32, u32)> {
    if info.flags & (1 << 3) == 0 || info.mods_count == 0 {
        return None;
    }
    let module = unsafe { &*(info.mods_addr as *const MultibootModule) };
    Some((module.start, module.end))
}

/// Common trap routing, called by the assembly stub with the live frame.
pub fn handle_trap(frame: &mut CpuState) {
    match frame.vector as u8 {
        TIMER_VECTOR => {
            pic::end_of_interrupt(TIMER_VECTOR);
            let decision = with_kernel(|k| k.schedule(frame, &mut X86Hardware));
            finish(decision);
        }
        KEYBOARD_VECTOR => {
            let scancode = pic::read_keyboard_scancode();
            with_kernel(|k| {
                if k.input.push_scancode(scancode, &mut vga::ScreenConsole) {
                    k.wake_input_waiters();
                }
            });
            pic::end_of_interrupt(KEYBOARD_VECTOR);
        }
        SYSCALL_VECTOR => {
            let flow = with_kernel(|k| {
                syscalls::dispatch(k, frame, &mut X86Hardware, &mut vga::ScreenConsole)
            });
            if flow == syscalls::Flow::Reschedule {
                let decision = with_kernel(|k| k.schedule(frame, &mut X86Hardware));
                finish(decision);
            }
        }
        _ => {
            DISPATCH.lock().handle(frame);
        }
    }
}

/// Act on a scheduling decision. The kernel lock is already released;
/// resumption never returns.
fn finish(decision: Decision) -> ! {
    match decision {
        Decision::Resume(state) => unsafe { trap::resume_cpu_state(&state) },
        Decision::Fatal => {
            error!("scheduler: no runnable tasks left, halting");
            super::halt_forever();
        }
    }
}

/// Registered for every CPU exception vector: report and stop.
fn fault_handler(frame: &mut CpuState) {
    error!(
        "cpu exception {} at {:#x}, error code {:#x}",
        frame.vector, frame.eip, frame.error_code
    );
    super::halt_forever();
}

/// Register an out-of-core handler for `vector` (0–255).
pub fn register_handler(vector: u8, handler: crate::interrupts::TrapHandler) {
    DISPATCH.lock().register(vector, handler);
}
