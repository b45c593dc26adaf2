//! The task data model: TCB, Application, and task state (§3).

use abi::{FaultInfo, RegionDesc};

use crate::frame::{init_tcb, StackFrame};

/// Internal representation of a task's saved machine state.
///
/// `top_of_stack` **must** be the first field: the low-level switch
/// primitive dereferences a `*mut Tcb` as `*mut u32` to reload and store the
/// process stack pointer without knowing about the rest of the struct (I1).
/// The fields after it hold the callee-saved registers the hardware does
/// *not* save automatically on exception entry (r4-r11), plus the
/// EXC_RETURN value to use when resuming this task, matching the set of
/// registers a context switch must shuffle by hand. `privileged` is read by
/// the architecture backend, not the switch asm, so it sits after
/// `exc_return` rather than disturbing those hardcoded offsets.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct Tcb {
    pub top_of_stack: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub exc_return: u32,
    /// False for user tasks, true for a kernel-level task (none exist yet).
    /// Consulted on every context switch to set the CONTROL register's
    /// privilege bit for the task being resumed (§4.D).
    pub privileged: bool,
}

/// A task's lifecycle state (§3). There is no priority here: the scheduler
/// is a flat round-robin, not a priority scan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    New,
    Ready,
    Running,
    Terminated,
}

/// One user task: its saved register state, its memory regions, and its
/// place in the scheduler's view of the world.
#[derive(Debug)]
pub struct Application {
    pub tcb: Tcb,
    pub id: u16,
    pub state: TaskState,
    pub code_region: RegionDesc,
    pub data_region: RegionDesc,
    /// Set once this task has faulted, for diagnostics; the task itself
    /// never sees this (§7: no user-visible error channel).
    pub last_fault: Option<FaultInfo>,
}

impl Application {
    pub fn new(id: u16, code_region: RegionDesc, data_region: RegionDesc, privileged: bool) -> Self {
        Self {
            tcb: Tcb {
                privileged,
                ..Tcb::default()
            },
            id,
            state: TaskState::New,
            code_region,
            data_region,
            last_fault: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// Seeds this task's stack for its first run (§4.A), from its image's
    /// initial SP/PC. `halt_trampoline` is the address a task lands on if
    /// its entry function ever returns. Returns the frame the caller must
    /// write to the task's stack memory (the architecture backend's job;
    /// this function only updates the `Tcb` and the task's state).
    pub fn seed_stack(&mut self, initial_sp: u32, entry_pc: u32, halt_trampoline: u32) -> StackFrame {
        let seeded = init_tcb(initial_sp, entry_pc, halt_trampoline);
        self.tcb.top_of_stack = seeded.top_of_stack;
        self.state = TaskState::Ready;
        seeded.frame
    }

    pub fn force_fault(&mut self, fault: FaultInfo) {
        self.last_fault = Some(fault);
        self.state = TaskState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::RegionAttributes;

    fn region(base: u32, size: u32) -> RegionDesc {
        RegionDesc::new(base, size, RegionAttributes::READ)
    }

    #[test]
    fn top_of_stack_is_first_field() {
        // I1: the TCB's address, reinterpreted as *const u32, reads
        // top_of_stack.
        let tcb = Tcb {
            top_of_stack: 0x2000_0100,
            ..Tcb::default()
        };
        let as_word = &tcb as *const Tcb as *const u32;
        assert_eq!(unsafe { *as_word }, 0x2000_0100);
    }

    #[test]
    fn new_application_starts_in_new_state() {
        let app = Application::new(0, region(0x1000, 0x1000), region(0x2000, 0x1000), false);
        assert_eq!(app.state, TaskState::New);
        assert!(!app.is_ready());
    }

    #[test]
    fn seeding_moves_to_ready() {
        let mut app = Application::new(0, region(0x1000, 0x1000), region(0x2000, 0x1000), false);
        app.seed_stack(0x2000_1000, 0x1000, 0);
        assert!(app.is_ready());
        assert_ne!(app.tcb.top_of_stack, 0);
    }

    #[test]
    fn privileged_flag_is_set_at_construction() {
        let user = Application::new(0, region(0x1000, 0x1000), region(0x2000, 0x1000), false);
        let kernel = Application::new(1, region(0x3000, 0x1000), region(0x4000, 0x1000), true);
        assert!(!user.tcb.privileged);
        assert!(kernel.tcb.privileged);
    }

    #[test]
    fn fault_terminates_the_task() {
        use abi::{FaultKind, FaultSource};
        let mut app = Application::new(0, region(0x1000, 0x1000), region(0x2000, 0x1000), false);
        app.seed_stack(0x2000_1000, 0x1000, 0);
        app.force_fault(FaultInfo {
            kind: FaultKind::DivideByZero,
            value: 0,
            source: FaultSource::User,
        });
        assert_eq!(app.state, TaskState::Terminated);
        assert!(app.last_fault.is_some());
    }
}
