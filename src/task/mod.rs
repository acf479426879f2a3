//! Task records and the ready ring.
//!
//! Tasks live in a fixed arena of slots; the circular doubly-linked ready
//! ring is built from explicit `next`/`prev` slot indices instead of
//! pointers, so ring surgery is plain index arithmetic and the structure is
//! trivially inspectable in tests.

pub mod scheduler;

use crate::layout::{EFLAGS_IF, USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::memory::address_space::SpaceId;
use crate::memory::VirtAddr;

/// Upper bound on live tasks; the arena is statically sized like the
/// original's fixed task table.
pub const MAX_TASKS: usize = 32;

/// Unique, monotonically assigned task id. The boot task is always id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Waiting,
    WaitingForInput,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Kernel,
    User,
}

/// CPU state captured at trap entry, in exact stack order: the eight
/// general registers as PUSHA lays them out, the four data segment
/// selectors, the vector and error code pushed by the stub, then the
/// hardware-pushed tail. `user_esp`/`user_ss` are only meaningful when the
/// trap crossed a privilege boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CpuState {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

impl CpuState {
    /// Initial state of a ring-3 task: user selectors everywhere, interrupts
    /// enabled, about to execute `entry` on `stack_top`.
    pub fn user(entry: VirtAddr, stack_top: u32) -> Self {
        let data = u32::from(USER_DATA_SELECTOR);
        Self {
            ds: data,
            es: data,
            fs: data,
            gs: data,
            eip: entry.as_u32(),
            cs: u32::from(USER_CODE_SELECTOR),
            eflags: EFLAGS_IF,
            user_esp: stack_top,
            user_ss: data,
            ..Self::default()
        }
    }
}

pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub kind: TaskKind,
    pub space: SpaceId,
    pub cpu: CpuState,
    /// Top of the per-task kernel stack, programmed into the TSS before
    /// this task runs in ring 3. Kernel tasks have none.
    pub kernel_stack_top: Option<VirtAddr>,
    next: usize,
    prev: usize,
}

/// Arena of task slots threaded into a circular ready ring.
pub struct TaskRing {
    slots: [Option<Task>; MAX_TASKS],
    next_id: u32,
    count: usize,
}

impl TaskRing {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_TASKS],
            next_id: 0,
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Add a task to the ring. The first task forms a ring of itself;
    /// later tasks are linked in just before `anchor`, i.e. at the tail of
    /// the round-robin lap that starts after `anchor`.
    pub fn insert(
        &mut self,
        anchor: Option<usize>,
        kind: TaskKind,
        space: SpaceId,
        cpu: CpuState,
        kernel_stack_top: Option<VirtAddr>,
    ) -> Option<usize> {
        let slot = self.free_slot()?;
        let id = TaskId(self.next_id);
        self.next_id += 1;

        let (next, prev) = match anchor {
            None => (slot, slot),
            Some(anchor) => (anchor, self.task(anchor).prev),
        };

        self.slots[slot] = Some(Task {
            id,
            state: TaskState::Ready,
            kind,
            space,
            cpu,
            kernel_stack_top,
            next,
            prev,
        });
        if anchor.is_some() {
            self.task_mut(prev).next = slot;
            self.task_mut(next).prev = slot;
        }
        self.count += 1;
        Some(slot)
    }

    /// Unlink `slot` from the ring and clear it. Returns `true` when the
    /// ring is now empty.
    pub fn unlink(&mut self, slot: usize) -> bool {
        let (next, prev) = {
            let t = self.task(slot);
            (t.next, t.prev)
        };
        if next != slot {
            self.task_mut(prev).next = next;
            self.task_mut(next).prev = prev;
        }
        self.slots[slot] = None;
        self.count -= 1;
        self.count == 0
    }

    pub fn next_of(&self, slot: usize) -> usize {
        self.task(slot).next
    }

    pub fn task(&self, slot: usize) -> &Task {
        self.slots[slot].as_ref().expect("vacant task slot in ring")
    }

    pub fn task_mut(&mut self, slot: usize) -> &mut Task {
        self.slots[slot].as_mut().expect("vacant task slot in ring")
    }

    pub fn get(&self, slot: usize) -> Option<&Task> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Visit every live task.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Task)) {
        for slot in self.slots.iter_mut().flatten() {
            f(slot);
        }
    }
}

impl Default for TaskRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(ring: &mut TaskRing, anchor: Option<usize>) -> usize {
        ring.insert(anchor, TaskKind::User, 0, CpuState::default(), None)
            .unwrap()
    }

    #[test]
    fn first_task_is_a_ring_of_itself() {
        let mut ring = TaskRing::new();
        let a = ready(&mut ring, None);
        assert_eq!(ring.next_of(a), a);
        assert_eq!(ring.task(a).id, TaskId(0));
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn ids_are_monotonic() {
        let mut ring = TaskRing::new();
        let a = ready(&mut ring, None);
        let b = ready(&mut ring, Some(a));
        let c = ready(&mut ring, Some(a));
        assert_eq!(ring.task(a).id, TaskId(0));
        assert_eq!(ring.task(b).id, TaskId(1));
        assert_eq!(ring.task(c).id, TaskId(2));
    }

    #[test]
    fn insertion_appends_at_the_tail_of_the_lap() {
        let mut ring = TaskRing::new();
        let a = ready(&mut ring, None);
        let b = ready(&mut ring, Some(a));
        let c = ready(&mut ring, Some(a));
        // Walking from a: b first (inserted earlier), then c, then back.
        assert_eq!(ring.next_of(a), b);
        assert_eq!(ring.next_of(b), c);
        assert_eq!(ring.next_of(c), a);
    }

    #[test]
    fn unlink_keeps_the_circle_closed() {
        let mut ring = TaskRing::new();
        let a = ready(&mut ring, None);
        let b = ready(&mut ring, Some(a));
        let c = ready(&mut ring, Some(a));

        assert!(!ring.unlink(b));
        assert_eq!(ring.next_of(a), c);
        assert_eq!(ring.next_of(c), a);

        assert!(!ring.unlink(c));
        assert_eq!(ring.next_of(a), a);
        assert!(ring.unlink(a));
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn user_cpu_state_runs_ring3_with_interrupts() {
        let cpu = CpuState::user(VirtAddr::new(0x1000), 0xBFC0_0000);
        assert_eq!(cpu.cs, u32::from(USER_CODE_SELECTOR));
        assert_eq!(cpu.user_ss, u32::from(USER_DATA_SELECTOR));
        assert_eq!(cpu.eflags & 0x200, 0x200);
        assert_eq!(cpu.eip, 0x1000);
    }
}
