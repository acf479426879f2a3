//! The kernel context.
//!
//! One object owns every piece of mutable kernel state: the physical
//! window, the page allocator, all address spaces, the task ring, the
//! keyboard input queue and the boot archive. Scheduler and syscall code
//! take `&mut Kernel`, so the single-owner discipline of the
//! disabled-interrupt trap window is enforced by the borrow checker instead
//! of scattered globals. On bare metal the one instance lives in a
//! `spin::Mutex` that is only ever touched from trap context.

use alloc::vec::Vec;

use log::info;

use crate::arch::HardwareOps;
use crate::error::KernelError;
use crate::fs::tar::TarArchive;
use crate::drivers::keyboard::InputQueue;
use crate::layout::{MAX_ARGS, MAX_ARG_LEN, USER_STACK_PAGES, USER_STACK_TOP};
use crate::loader;
use crate::memory::address_space::{AddressSpace, SpaceId};
use crate::memory::paging::PteFlags;
use crate::memory::pmm::FrameBitmap;
use crate::memory::{PhysWindow, VirtAddr, PAGE_SIZE};
use crate::task::{CpuState, TaskId, TaskKind, TaskRing, TaskState};

pub struct Kernel {
    pub window: PhysWindow,
    pub pmm: FrameBitmap,
    /// All address spaces; index 0 is the boot space every kernel task
    /// shares.
    pub spaces: Vec<AddressSpace>,
    /// Directory slots belonging to the shared kernel region.
    pub kernel_slots: usize,
    pub tasks: TaskRing,
    /// Slot of the task owning the CPU.
    pub current_task: usize,
    /// The hardware-active address space; updated in lock-step with the
    /// root register, since lazy table allocation decisions read it.
    pub current_space: SpaceId,
    /// Slot of the boot task (id 0), the scheduler's last resort.
    pub boot_task: usize,
    pub input: InputQueue,
    pub archive: TarArchive,
}

impl Kernel {
    /// Assemble the context around an already initialized PMM and the boot
    /// address space, and enroll the boot task (id 0, Running).
    pub fn new(
        window: PhysWindow,
        pmm: FrameBitmap,
        boot_space: AddressSpace,
        kernel_slots: usize,
        archive: TarArchive,
    ) -> Self {
        let mut spaces = Vec::new();
        spaces.push(boot_space);

        let mut tasks = TaskRing::new();
        let boot_task = tasks
            .insert(None, TaskKind::Kernel, 0, CpuState::default(), None)
            .expect("empty ring rejected the boot task");
        tasks.task_mut(boot_task).state = TaskState::Running;

        Self {
            window,
            pmm,
            spaces,
            kernel_slots,
            tasks,
            current_task: boot_task,
            current_space: 0,
            boot_task,
            input: InputQueue::new(),
            archive,
        }
    }

    /// Activate `space`: load the hardware root, then immediately update
    /// the bookkeeping pointer. Trap context only.
    pub fn switch_space(&mut self, space: SpaceId, hw: &mut dyn HardwareOps) {
        hw.load_root(self.spaces[space].dir_phys());
        self.current_space = space;
    }

    /// Mark the current task Terminated. The caller re-enters the
    /// scheduler through the trap path; the ring unlink happens on that
    /// next pass.
    ///
    /// The task's pages and tables are not reclaimed.
    pub fn exit_current(&mut self, code: u32) {
        let task = self.tasks.task_mut(self.current_task);
        info!("task {:?} exited with code {}", task.id, code);
        task.state = TaskState::Terminated;
    }

    /// Give every task blocked on keyboard input another try. Called when
    /// a completed line arrives.
    pub fn wake_input_waiters(&mut self) {
        self.tasks.for_each_mut(|task| {
            if task.state == TaskState::WaitingForInput {
                task.state = TaskState::Ready;
            }
        });
    }

    /// Turn the named archive entry into a Ready user task.
    ///
    /// Lookup, space creation, ELF load, user stack, kernel stack, initial
    /// CPU state, ring append — any failure aborts with the error and the
    /// pages already taken are not handed back.
    pub fn spawn_from_loader(
        &mut self,
        name: &str,
        argv: &[&str],
        hw: &mut dyn HardwareOps,
    ) -> Result<TaskId, KernelError> {
        let image = self.archive.find(name).ok_or(KernelError::NotFound)?;

        let mut space =
            AddressSpace::new_user(&self.spaces[0], self.kernel_slots, &mut self.pmm, &self.window)?;
        let entry = loader::load(image, &mut space, &mut self.pmm, &self.window, hw)?;

        // Fixed-placement user stack, user-writable.
        let stack_base = USER_STACK_TOP - (USER_STACK_PAGES as u32) * PAGE_SIZE;
        for page in 0..USER_STACK_PAGES as u32 {
            let frame = self.pmm.alloc_page()?;
            space.map_page(
                &mut self.pmm,
                &self.window,
                hw,
                frame,
                VirtAddr::new(stack_base + page * PAGE_SIZE),
                PteFlags::WRITABLE | PteFlags::USER,
            )?;
        }
        let esp = push_args(&space, &self.window, argv)?;

        // One page of kernel stack for traps taken while this task runs.
        let kernel_stack = self.pmm.alloc_page()?;
        let kernel_stack_top = VirtAddr::new(kernel_stack.as_u32() + PAGE_SIZE);

        let space_id = self.spaces.len();
        self.spaces.push(space);

        let cpu = CpuState::user(entry, esp);
        let slot = self
            .tasks
            .insert(
                Some(self.current_task),
                TaskKind::User,
                space_id,
                cpu,
                Some(kernel_stack_top),
            )
            .ok_or(KernelError::OutOfMemory)?;

        let id = self.tasks.task(slot).id;
        info!("spawned {:?} as task {:?}, entry {:?}", name, id, entry);
        Ok(id)
    }
}

/// Copy `argv` onto the freshly mapped user stack in the C convention:
/// string bytes at the top, then the NUL-terminated pointer array, then
/// `argv` and `argc` so the program entry finds `[esp] = argc`,
/// `[esp+4] = argv`.
fn push_args(
    space: &AddressSpace,
    window: &PhysWindow,
    argv: &[&str],
) -> Result<u32, KernelError> {
    if argv.len() > MAX_ARGS {
        return Err(KernelError::BadAddress);
    }

    let mut sp = USER_STACK_TOP;
    let mut pointers = [0u32; MAX_ARGS];
    for (i, arg) in argv.iter().enumerate() {
        if arg.len() >= MAX_ARG_LEN {
            return Err(KernelError::BadAddress);
        }
        sp -= arg.len() as u32 + 1;
        space.write_bytes(window, VirtAddr::new(sp), arg.as_bytes())?;
        space.write_bytes(window, VirtAddr::new(sp + arg.len() as u32), &[0])?;
        pointers[i] = sp;
    }

    sp &= !3;
    // Pointer array plus NULL terminator.
    sp -= 4 * (argv.len() as u32 + 1);
    let argv_base = sp;
    for (i, ptr) in pointers[..argv.len()].iter().enumerate() {
        space.write_bytes(
            window,
            VirtAddr::new(argv_base + 4 * i as u32),
            &ptr.to_le_bytes(),
        )?;
    }
    space.write_bytes(
        window,
        VirtAddr::new(argv_base + 4 * argv.len() as u32),
        &0u32.to_le_bytes(),
    )?;

    sp -= 4;
    space.write_bytes(window, VirtAddr::new(sp), &argv_base.to_le_bytes())?;
    sp -= 4;
    space.write_bytes(window, VirtAddr::new(sp), &(argv.len() as u32).to_le_bytes())?;
    Ok(sp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, RecordingHardware, SegmentSpec};

    #[test]
    fn spawn_builds_a_ready_user_task() {
        let image = testutil::build_elf(
            0x40_0000,
            &[SegmentSpec {
                vaddr: 0x40_0000,
                file_bytes: &[0xeb, 0xfe], // jmp $
                mem_size: 0x100,
                writable: false,
            }],
        );
        let (_arena, mut kernel) = testutil::boot_kernel(&[("init", &image)]);
        let mut hw = RecordingHardware::default();

        let id = kernel.spawn_from_loader("init", &[], &mut hw).unwrap();
        assert_eq!(id, TaskId(1));

        let slot = (0..crate::task::MAX_TASKS)
            .find(|&s| kernel.tasks.get(s).is_some_and(|t| t.id == id))
            .unwrap();
        let task = kernel.tasks.task(slot);
        assert_eq!(task.state, TaskState::Ready);
        assert_eq!(task.kind, TaskKind::User);
        assert_eq!(task.cpu.eip, 0x40_0000);
        assert!(task.kernel_stack_top.is_some());
        assert_eq!(task.cpu.eflags & 0x200, 0x200);

        // The user stack is mapped writable and the entry state points
        // below the stack top.
        let space = &kernel.spaces[task.space];
        assert!(task.cpu.user_esp < USER_STACK_TOP);
        assert!(space
            .translate(&kernel.window, VirtAddr::new(task.cpu.user_esp))
            .is_some());
    }

    #[test]
    fn spawn_unknown_name_is_not_found() {
        let (_arena, mut kernel) = testutil::boot_kernel(&[]);
        let mut hw = RecordingHardware::default();
        assert_eq!(
            kernel.spawn_from_loader("missing", &[], &mut hw),
            Err(KernelError::NotFound)
        );
        assert_eq!(kernel.tasks.count(), 1);
    }

    #[test]
    fn spawn_rejects_a_non_executable() {
        let (_arena, mut kernel) = testutil::boot_kernel(&[("junk", b"plain text")]);
        let mut hw = RecordingHardware::default();
        assert_eq!(
            kernel.spawn_from_loader("junk", &[], &mut hw),
            Err(KernelError::InvalidImage)
        );
        assert_eq!(kernel.tasks.count(), 1);
    }

    #[test]
    fn argv_lands_on_the_user_stack() {
        let image = testutil::build_elf(
            0x40_0000,
            &[SegmentSpec {
                vaddr: 0x40_0000,
                file_bytes: &[0xeb, 0xfe],
                mem_size: 0x100,
                writable: false,
            }],
        );
        let (_arena, mut kernel) = testutil::boot_kernel(&[("sh", &image)]);
        let mut hw = RecordingHardware::default();

        let id = kernel
            .spawn_from_loader("sh", &["sh", "-c"], &mut hw)
            .unwrap();
        let slot = (0..crate::task::MAX_TASKS)
            .find(|&s| kernel.tasks.get(s).is_some_and(|t| t.id == id))
            .unwrap();
        let task = kernel.tasks.task(slot);
        let space = &kernel.spaces[task.space];

        let mut word = [0u8; 4];
        space
            .read_bytes(&kernel.window, VirtAddr::new(task.cpu.user_esp), &mut word)
            .unwrap();
        assert_eq!(u32::from_le_bytes(word), 2, "argc");

        space
            .read_bytes(
                &kernel.window,
                VirtAddr::new(task.cpu.user_esp + 4),
                &mut word,
            )
            .unwrap();
        let argv_base = u32::from_le_bytes(word);

        space
            .read_bytes(&kernel.window, VirtAddr::new(argv_base), &mut word)
            .unwrap();
        let arg0 = u32::from_le_bytes(word);
        let mut buf = [0u8; 8];
        let len = space
            .read_cstr(&kernel.window, VirtAddr::new(arg0), &mut buf)
            .unwrap();
        assert_eq!(&buf[..len], b"sh");
    }

    #[test]
    fn exit_marks_terminated_only() {
        let (_arena, mut kernel) = testutil::boot_kernel(&[]);
        let slot = testutil::add_user_task(&mut kernel, TaskState::Running);
        kernel.current_task = slot;
        kernel.exit_current(0);
        assert_eq!(kernel.tasks.task(slot).state, TaskState::Terminated);
        // Still linked until the next scheduling pass.
        assert_eq!(kernel.tasks.count(), 2);
    }

    #[test]
    fn wake_readies_only_input_waiters() {
        let (_arena, mut kernel) = testutil::boot_kernel(&[]);
        let a = testutil::add_user_task(&mut kernel, TaskState::WaitingForInput);
        let b = testutil::add_user_task(&mut kernel, TaskState::Waiting);
        kernel.wake_input_waiters();
        assert_eq!(kernel.tasks.task(a).state, TaskState::Ready);
        assert_eq!(kernel.tasks.task(b).state, TaskState::Waiting);
    }
}
