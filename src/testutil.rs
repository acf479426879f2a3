//! Shared helpers for the unit tests: an in-memory "physical" arena, a
//! recording hardware fake, and builders for synthetic ELF images and TAR
//! archives.

use crate::arch::HardwareOps;
use crate::console::NullConsole;
use crate::fs::tar::TarArchive;
use crate::kernel::Kernel;
use crate::layout::USER_STACK_TOP;
use crate::memory::address_space::AddressSpace;
use crate::memory::paging::PteFlags;
use crate::memory::pmm::FrameBitmap;
use crate::memory::{PhysAddr, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::task::{CpuState, TaskKind, TaskState};

/// One page of backing store, aligned the way the MMU structures expect.
#[repr(C, align(4096))]
pub struct PageBuf(pub [u8; PAGE_SIZE as usize]);

pub type Arena = Box<[PageBuf]>;

/// A page-aligned arena standing in for physical memory, with a window
/// translating "physical" addresses to offsets into it.
pub fn arena(pages: usize) -> (Arena, PhysWindow) {
    let arena: Arena = (0..pages)
        .map(|_| PageBuf([0u8; PAGE_SIZE as usize]))
        .collect();
    let base = arena.as_ptr() as usize;
    let window = unsafe { PhysWindow::new(base, pages * PAGE_SIZE as usize) };
    (arena, window)
}

/// Records every hardware side effect the core requests.
#[derive(Default)]
pub struct RecordingHardware {
    pub roots: Vec<u32>,
    pub flushes: Vec<u32>,
    pub kernel_stacks: Vec<u32>,
}

impl HardwareOps for RecordingHardware {
    fn load_root(&mut self, root: PhysAddr) {
        self.roots.push(root.as_u32());
    }

    fn flush_page(&mut self, virt: VirtAddr) {
        self.flushes.push(virt.as_u32());
    }

    fn set_kernel_stack(&mut self, stack_top: VirtAddr) {
        self.kernel_stacks.push(stack_top.as_u32());
    }
}

/// A kernel over a fresh arena, with the given files packed into its boot
/// archive. The arena must outlive the kernel.
pub fn boot_kernel(files: &[(&str, &[u8])]) -> (Arena, Kernel) {
    let (arena, window) = arena(256);
    let mut pmm = FrameBitmap::init(&window, 256 * PAGE_SIZE, PAGE_SIZE);
    let boot_space = AddressSpace::new(&mut pmm, &window).expect("arena too small");
    let archive = TarArchive::new(Box::leak(build_tar(files).into_boxed_slice()));
    let kernel = Kernel::new(window, pmm, boot_space, 0, archive);
    (arena, kernel)
}

/// Add a user task in `state` with its own address space, one mapped stack
/// page and a kernel stack page. Returns the task's slot.
pub fn add_user_task(kernel: &mut Kernel, state: TaskState) -> usize {
    let mut hw = RecordingHardware::default();

    let mut space = AddressSpace::new_user(
        &kernel.spaces[0],
        kernel.kernel_slots,
        &mut kernel.pmm,
        &kernel.window,
    )
    .unwrap();
    let stack_frame = kernel.pmm.alloc_page().unwrap();
    space
        .map_page(
            &mut kernel.pmm,
            &kernel.window,
            &mut hw,
            stack_frame,
            VirtAddr::new(USER_STACK_TOP - PAGE_SIZE),
            PteFlags::WRITABLE | PteFlags::USER,
        )
        .unwrap();
    let space_id = kernel.spaces.len();
    kernel.spaces.push(space);

    let kernel_stack = kernel.pmm.alloc_page().unwrap();
    let cpu = CpuState::user(VirtAddr::new(0x40_0000), USER_STACK_TOP - 16);
    let slot = kernel
        .tasks
        .insert(
            Some(kernel.current_task),
            TaskKind::User,
            space_id,
            cpu,
            Some(VirtAddr::new(kernel_stack.as_u32() + PAGE_SIZE)),
        )
        .unwrap();
    kernel.tasks.task_mut(slot).state = state;
    slot
}

/// Map `bytes` user-writable into the task's space at `va`; returns `va`.
pub fn map_user_bytes(kernel: &mut Kernel, slot: usize, va: u32, bytes: &[u8]) -> u32 {
    let mut hw = RecordingHardware::default();
    let space_id = kernel.tasks.task(slot).space;

    let start = crate::memory::align_down(va, PAGE_SIZE);
    let end = crate::memory::align_up(va + bytes.len() as u32, PAGE_SIZE);
    let mut page = start;
    while page < end {
        let frame = kernel.pmm.alloc_page().unwrap();
        kernel.spaces[space_id]
            .map_page(
                &mut kernel.pmm,
                &kernel.window,
                &mut hw,
                frame,
                VirtAddr::new(page),
                PteFlags::WRITABLE | PteFlags::USER,
            )
            .unwrap();
        page += PAGE_SIZE;
    }
    kernel.spaces[space_id]
        .write_bytes(&kernel.window, VirtAddr::new(va), bytes)
        .unwrap();
    va
}

/// Feed a line of text through the scancode path, waking input waiters the
/// way the keyboard interrupt glue does.
pub fn type_line(kernel: &mut Kernel, text: &str) {
    let mut echo = NullConsole;
    for ch in text.chars() {
        let code = scancode_for(ch);
        let woke = kernel.input.push_scancode(code, &mut echo);
        kernel.input.push_scancode(code | 0x80, &mut echo);
        if woke {
            kernel.wake_input_waiters();
        }
    }
}

/// Set-1 make code for a small testing alphabet.
fn scancode_for(ch: char) -> u8 {
    match ch {
        'a' => 0x1e, 'b' => 0x30, 'c' => 0x2e, 'd' => 0x20, 'e' => 0x12,
        'f' => 0x21, 'g' => 0x22, 'h' => 0x23, 'i' => 0x17, 'j' => 0x24,
        'k' => 0x25, 'l' => 0x26, 'm' => 0x32, 'n' => 0x31, 'o' => 0x18,
        'p' => 0x19, 'q' => 0x10, 'r' => 0x13, 's' => 0x1f, 't' => 0x14,
        'u' => 0x16, 'v' => 0x2f, 'w' => 0x11, 'x' => 0x2d, 'y' => 0x15,
        'z' => 0x2c, ' ' => 0x39, '\n' => 0x1c,
        _ => panic!("no scancode mapping for {ch:?}"),
    }
}

/// One loadable segment of a synthetic ELF image.
pub struct SegmentSpec<'a> {
    pub vaddr: u32,
    pub file_bytes: &'a [u8],
    pub mem_size: u32,
    pub writable: bool,
}

/// Assemble a minimal valid ELF32 `ET_EXEC` image.
pub fn build_elf(entry: u32, segments: &[SegmentSpec]) -> Vec<u8> {
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;

    let ph_count = segments.len();
    let mut image = vec![0u8; EHDR_SIZE + ph_count * PHDR_SIZE];

    image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    image[4] = 1; // ELFCLASS32
    image[5] = 1; // little-endian
    image[6] = 1; // EV_CURRENT
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image[18..20].copy_from_slice(&3u16.to_le_bytes()); // EM_386
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&entry.to_le_bytes());
    image[28..32].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    image[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    image[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    image[44..46].copy_from_slice(&(ph_count as u16).to_le_bytes()); // e_phnum

    for (i, seg) in segments.iter().enumerate() {
        let offset = image.len() as u32;
        let base = EHDR_SIZE + i * PHDR_SIZE;
        let flags = if seg.writable { 4 | 2 } else { 4 | 1 };
        image[base..base + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        image[base + 4..base + 8].copy_from_slice(&offset.to_le_bytes());
        image[base + 8..base + 12].copy_from_slice(&seg.vaddr.to_le_bytes());
        image[base + 12..base + 16].copy_from_slice(&seg.vaddr.to_le_bytes());
        image[base + 16..base + 20]
            .copy_from_slice(&(seg.file_bytes.len() as u32).to_le_bytes());
        image[base + 20..base + 24].copy_from_slice(&seg.mem_size.to_le_bytes());
        image[base + 24..base + 28].copy_from_slice(&(flags as u32).to_le_bytes());
        image[base + 28..base + 32].copy_from_slice(&0x1000u32.to_le_bytes());

        image.extend_from_slice(seg.file_bytes);
    }

    image
}

/// Assemble a ustar archive from `(name, contents)` pairs.
pub fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    const BLOCK: usize = 512;
    let mut tar = Vec::new();

    for (name, data) in entries {
        let mut header = [0u8; BLOCK];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..108].copy_from_slice(b"0000644\0");
        header[108..116].copy_from_slice(b"0000000\0");
        header[116..124].copy_from_slice(b"0000000\0");
        let size = format!("{:011o}\0", data.len());
        header[124..136].copy_from_slice(size.as_bytes());
        header[136..148].copy_from_slice(b"00000000000\0");
        header[156] = b'0';
        header[257..262].copy_from_slice(b"ustar");
        header[263..265].copy_from_slice(b"00");

        // Checksum is computed with the checksum field itself as spaces.
        header[148..156].copy_from_slice(b"        ");
        let sum: u32 = header.iter().map(|&b| u32::from(b)).sum();
        let checksum = format!("{sum:06o}\0 ");
        header[148..156].copy_from_slice(checksum.as_bytes());

        tar.extend_from_slice(&header);
        tar.extend_from_slice(data);
        let padding = data.len().div_ceil(BLOCK) * BLOCK - data.len();
        tar.extend(std::iter::repeat(0u8).take(padding));
    }

    tar.extend_from_slice(&[0u8; 2 * BLOCK]);
    tar
}
