//! Round-robin preemptive scheduling.
//!
//! `schedule` is entered with interrupts disabled, from the timer tick or
//! from a syscall that gave up the CPU. It never performs the low-level
//! resumption itself: it returns a [`Decision`] and only the trap dispatch
//! loop in the hardware layer is allowed to act on it. That keeps the whole
//! selection logic an ordinary function of kernel state, testable without a
//! context switch.

use log::{error, trace};

use super::{TaskKind, TaskState};
use crate::arch::HardwareOps;
use crate::kernel::Kernel;
use crate::task::CpuState;

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Restore this CPU state and resume execution; the transfer does not
    /// return to the scheduling code.
    Resume(CpuState),
    /// The ready ring ran empty. Unrecoverable; the trap loop halts.
    Fatal,
}

impl Kernel {
    /// One scheduling pass over `frame`, the CPU state captured by whatever
    /// trap caused entry.
    ///
    /// 1. A previous task that is not Terminated gets `frame` as its resume
    ///    point; a Terminated one is unlinked (empty ring is fatal).
    /// 2. A previously Running task is demoted to Ready.
    /// 3. The ring is walked starting just after the previous task; the
    ///    first Ready task wins. A full fruitless lap falls back to the
    ///    boot task.
    /// 4. The winner becomes Running; its kernel stack goes into the task
    ///    switch descriptor, its address space is activated if not already,
    ///    and its saved state is handed back for resumption.
    pub fn schedule(&mut self, frame: &CpuState, hw: &mut dyn HardwareOps) -> Decision {
        let prev = self.current_task;
        let start;
        {
            let task = self.tasks.task_mut(prev);
            if task.state == TaskState::Terminated {
                start = self.tasks.next_of(prev);
                trace!("sched: reaping task {:?}", self.tasks.task(prev).id);
                if self.tasks.unlink(prev) {
                    error!("sched: ready ring is empty");
                    return Decision::Fatal;
                }
            } else {
                task.cpu = *frame;
                if task.state == TaskState::Running {
                    task.state = TaskState::Ready;
                }
                start = self.tasks.next_of(prev);
            }
        }

        let mut cursor = start;
        let selected = loop {
            if self.tasks.task(cursor).state == TaskState::Ready {
                break cursor;
            }
            cursor = self.tasks.next_of(cursor);
            if cursor == start {
                // Nothing is ready; the boot task is the last resort.
                break self.boot_task;
            }
        };

        let (cpu, space, kind, kernel_stack) = {
            let task = self.tasks.task_mut(selected);
            task.state = TaskState::Running;
            (task.cpu, task.space, task.kind, task.kernel_stack_top)
        };
        self.current_task = selected;

        if kind == TaskKind::User {
            if let Some(top) = kernel_stack {
                hw.set_kernel_stack(top);
            }
        }
        if space != self.current_space {
            self.switch_space(space, hw);
        }

        Decision::Resume(cpu)
    }
}
