//! Kernel core (§4.F): owns the task pool, the scheduler, and the policy
//! for what happens on a yield or a fault. This is the one module that ties
//! the architecture-independent pieces (`frame`, `mpu`, `fault`, `sched`,
//! `task`) together into something an architecture backend can drive.
//!
//! Everything in here is plain Rust operating on an in-memory task table;
//! the architecture backend is responsible for deciding *when* to call it
//! (on a yield trap, on a fault) and for actually moving bits in and out of
//! real task memory.

use abi::{FaultInfo, FaultSource, RegionDesc};

use crate::fault::{self, FaultRegisters, StackDump};
use crate::sched::Scheduler;
use crate::task::{Application, TaskState, Tcb};

include!(concat!(env!("OUT_DIR"), "/kernel_config.rs"));

/// What the caller (the architecture backend) must do after a scheduling
/// decision: resume `tcb`, with regions 6/7 reprogrammed to `code`/`data`,
/// and the CONTROL register's privilege bit set to `privileged` (§4.D step
/// e) before the task actually runs.
#[derive(Copy, Clone, Debug)]
pub struct Resume {
    pub tcb: *mut Tcb,
    pub code: RegionDesc,
    pub data: RegionDesc,
    pub privileged: bool,
}

/// What a hard fault's caller should do next (§4.F).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultOutcome {
    /// The fault was in kernel mode; the policy here has no recovery for
    /// that, the caller should reset the device.
    Reset,
    /// The active task was terminated; the caller should pend a context
    /// switch the same way it would for a voluntary yield.
    TaskTerminated,
}

/// The kernel's view of the system: a fixed task pool plus the scheduling
/// and fault-handling state that goes with it.
///
/// There is deliberately no dynamic allocation here (an explicit
/// non-goal): `tasks` is a `'static` slice into a build-time-sized array,
/// supplied by board startup code, never grown or shrunk at runtime.
pub struct Kernel {
    tasks: &'static mut [Application],
    scheduler: Scheduler,
    active: usize,
    dump: StackDump,
}

impl Kernel {
    /// Boots the kernel: computes regions 6/7 for task 0 and hands back the
    /// kernel ready to enter its first task. Does **not** touch hardware; that's steps the architecture backend performs around this call
    /// (enabling the MPU, setting fault priorities, and finally branching
    /// into thread mode).
    pub fn new(tasks: &'static mut [Application]) -> Self {
        assert_eq!(tasks.len(), NUM_OF_USER_TASKS, "task pool size must match the build-time configuration");
        let scheduler = Scheduler::new(tasks.len());
        let active = tasks
            .iter()
            .position(Application::is_ready)
            .expect("no task is ready to run at boot");
        tasks[active].state = TaskState::Running;
        Kernel {
            tasks,
            scheduler,
            active,
            dump: StackDump::empty(),
        }
    }

    /// The region descriptors the architecture backend should apply for the
    /// currently active task, for use at boot before the first context
    /// switch has run.
    pub fn active_regions(&self) -> (RegionDesc, RegionDesc) {
        let app = &self.tasks[self.active];
        (app.code_region, app.data_region)
    }

    pub fn active_tcb(&mut self) -> *mut Tcb {
        &mut self.tasks[self.active].tcb as *mut Tcb
    }

    /// Runs one scheduling decision: marks the current task `Ready` (it's
    /// voluntarily giving up the rest of its turn), asks the scheduler for
    /// the next `Ready` task (B3, S1), and returns what to resume.
    ///
    /// Panics if no task is ready (I6): there's nothing a cooperative
    /// kernel can usefully do at that point except stop.
    pub fn yield_active(&mut self) -> Resume {
        if self.tasks[self.active].state == TaskState::Running {
            self.tasks[self.active].state = TaskState::Ready;
        }
        self.switch_to_next()
    }

    /// Declares the currently active task faulted and not schedulable, but
    /// does **not** pick a replacement; the caller still owes the system a
    /// context switch (by pending one, the same as any other yield) since
    /// marking a task Terminated doesn't by itself move anything off its
    /// stack. Used for both synchronous user-mode faults (B2/S2) and
    /// unrecognised SVC immediates (§6, §9's `RaisePrivilege` decision).
    pub fn mark_active_faulted(&mut self, info: FaultInfo) {
        klog!("task {} terminated: {:?}", self.tasks[self.active].id, info.kind);
        self.tasks[self.active].force_fault(info);
    }

    /// Classifies a hard fault's raw registers and decides the response: a
    /// fault taken from user mode terminates that task (B2) and tells the
    /// caller to pend a switch; a fault taken from kernel mode is **not**
    /// recoverable by this policy (R2); the caller is expected to reset
    /// instead.
    pub fn handle_hard_fault(
        &mut self,
        regs: FaultRegisters,
        source: FaultSource,
        frame_addr: u32,
    ) -> FaultOutcome {
        if ENABLE_STACK_DUMP {
            self.dump.arm(frame_addr);
        }
        match source {
            FaultSource::Kernel => FaultOutcome::Reset,
            FaultSource::User => {
                let info = fault::classify(regs, source);
                self.mark_active_faulted(info);
                FaultOutcome::TaskTerminated
            }
        }
    }

    /// Consumes the one-shot stack dump capability armed by the most recent
    /// fault, if any (I5, R2).
    pub fn take_stack_dump(&mut self) -> Option<u32> {
        self.dump.take()
    }

    fn switch_to_next(&mut self) -> Resume {
        let next = self
            .scheduler
            .next_ready_by(|idx| self.tasks[idx].is_ready())
            .expect("no ready task: every task has terminated");
        self.tasks[next].state = TaskState::Running;
        self.active = next;
        let app = &mut self.tasks[next];
        Resume {
            tcb: &mut app.tcb as *mut Tcb,
            code: app.code_region,
            data: app.data_region,
            privileged: app.tcb.privileged,
        }
    }
}

/// The one kernel instance. Board startup installs it once, before
/// `start_first_task` ever runs; every exception handler thereafter reaches
/// it through the free functions below rather than threading a reference
/// through naked asm.
static mut KERNEL: Option<Kernel> = None;

/// Installs `kernel` as the system-wide kernel instance. Panics if called
/// twice.
///
/// # Safety
/// Must be called exactly once, before interrupts are enabled.
pub unsafe fn install(kernel: Kernel) {
    let prev = core::mem::replace(&mut KERNEL, Some(kernel));
    uassert!(prev.is_none());
}

fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    // Safety: exception handlers never nest (they all run at the same
    // priority, per `start_first_task`), so this is the only live borrow at
    // any given time.
    body(unsafe { KERNEL.as_mut().expect("kernel not installed") })
}

/// Entry point for the architecture backend's `PendSV` handler.
pub fn yield_active() -> Resume {
    with_kernel(Kernel::yield_active)
}

/// Entry point for the architecture backend's `HardFault` handler.
pub fn handle_hard_fault(
    regs: FaultRegisters,
    source: FaultSource,
    frame_addr: u32,
) -> FaultOutcome {
    with_kernel(|k| k.handle_hard_fault(regs, source, frame_addr))
}

/// Entry point for the architecture backend's `SVCall` handler, for an SVC
/// immediate that isn't `Yield` (§6, §9). Marks the active task terminated;
/// the caller still has to pend the actual switch.
pub fn mark_active_faulted(info: FaultInfo) {
    with_kernel(|k| k.mark_active_faulted(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::RegionAttributes;

    fn region(base: u32, size: u32) -> RegionDesc {
        RegionDesc::new(base, size, RegionAttributes::READ)
    }

    fn two_task_pool() -> [Application; 2] {
        let mut a = Application::new(0, region(0x1000, 0x1000), region(0x2000, 0x1000), false);
        let mut b = Application::new(1, region(0x3000, 0x1000), region(0x4000, 0x1000), false);
        a.seed_stack(0x2000_1000, 0x1000, 0);
        b.seed_stack(0x4000_1000, 0x3000, 0);
        [a, b]
    }

    #[test]
    fn yield_alternates_between_two_ready_tasks() {
        let mut pool = two_task_pool();
        // Safety: test-only, pool outlives the kernel built from it.
        let tasks: &'static mut [Application] =
            unsafe { core::mem::transmute::<&mut [Application], &'static mut [Application]>(&mut pool) };
        let mut k = Kernel::new(tasks);
        assert_eq!(k.active, 0);
        k.yield_active();
        assert_eq!(k.active, 1);
        k.yield_active();
        assert_eq!(k.active, 0);
    }

    #[test]
    fn faulted_task_is_skipped() {
        let mut pool = two_task_pool();
        let tasks: &'static mut [Application] =
            unsafe { core::mem::transmute::<&mut [Application], &'static mut [Application]>(&mut pool) };
        let mut k = Kernel::new(tasks);
        use abi::FaultKind;
        // Marking the fault alone doesn't move anything off task 0; a real
        // hard fault still has to pend PendSV to actually switch, just like
        // a voluntary yield does.
        k.mark_active_faulted(FaultInfo {
            kind: FaultKind::DivideByZero,
            value: 0,
            source: FaultSource::User,
        });
        assert_eq!(k.active, 0);
        k.yield_active();
        assert_eq!(k.active, 1);
        // Task 0 is terminated now; yielding from 1 must come back to 1.
        k.yield_active();
        assert_eq!(k.active, 1);
    }

    #[test]
    fn resume_carries_the_incoming_task_privilege_bit() {
        let mut a = Application::new(0, region(0x1000, 0x1000), region(0x2000, 0x1000), false);
        let mut b = Application::new(1, region(0x3000, 0x1000), region(0x4000, 0x1000), true);
        a.seed_stack(0x2000_1000, 0x1000, 0);
        b.seed_stack(0x4000_1000, 0x3000, 0);
        let mut pool = [a, b];
        let tasks: &'static mut [Application] =
            unsafe { core::mem::transmute::<&mut [Application], &'static mut [Application]>(&mut pool) };
        let mut k = Kernel::new(tasks);
        let resume = k.yield_active();
        assert!(resume.privileged, "task 1 was constructed as a privileged task");
    }

    #[test]
    fn handle_hard_fault_reports_reset_for_kernel_mode_source() {
        let mut pool = two_task_pool();
        let tasks: &'static mut [Application] =
            unsafe { core::mem::transmute::<&mut [Application], &'static mut [Application]>(&mut pool) };
        let mut k = Kernel::new(tasks);
        let regs = FaultRegisters {
            hfsr_forced: true,
            hfsr: 0,
            cfsr: crate::fault::Cfsr::empty(),
            mmfar: 0,
        };
        let outcome = k.handle_hard_fault(regs, FaultSource::Kernel, 0);
        assert_eq!(outcome, FaultOutcome::Reset);
        assert_eq!(k.active, 0, "a kernel-mode fault must not touch scheduling state");
    }
}
