//! Architecture support for ARMv{7,8}-M.
//!
//! Mostly ARMv7-M at the moment.
//!
//! # Notes on ARM-M interrupts
//!
//! This implementation uses three exception handlers:
//!
//! - `SVCall` implements the `SVC` instruction, the only way a task asks the
//!   kernel for anything (just `yield`, currently).
//! - `PendSV` performs the actual context switch, deferred out of `SVCall`
//!   so the full register save/restore sequence only runs when a switch is
//!   actually going to happen.
//! - `HardFault` catches every fault this kernel cares about. Cortex-M lets
//!   you split memory/bus/usage faults into their own vectors, but this
//!   kernel runs with them all escalated to HardFault and tells them apart
//!   by reading HFSR/CFSR in Rust (§4.C): one classifier, one place.
//!
//! `SVCall` itself does *not* save volatile state: a `yield` doesn't need to
//! inspect the caller's registers, so it just pends `PendSV` and returns.
//! `PendSV` is where the real save/restore happens, following the usual
//! Cortex-M convention: stack the callee-saved registers by hand (the
//! hardware only stacks r0-r3/r12/lr/pc/psr automatically), hand off to
//! Rust to pick the next task, then restore.

use core::ptr::NonNull;

use abi::{FaultSource, RegionDesc};

use crate::fault::{Cfsr, FaultRegisters};
use crate::kernel::{self, Resume};
use crate::mpu::{self, FixedRegions};
use crate::task::Tcb;

/// Log things from kernel context. Made visible to the rest of the kernel by
/// `#[macro_use]` on this module; its implementation is architecture-specific.
///
/// There are two ways to log: via semihosting (the "klog-semihosting"
/// feature) or via the ARM Instrumentation Trace Macrocell (the "klog-itm"
/// feature, the default). With neither enabled, `klog!` is stubbed out.
#[cfg(not(any(feature = "klog-semihosting", feature = "klog-itm")))]
macro_rules! klog {
    ($s:expr) => { };
    ($s:expr, $($tt:tt)*) => { };
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($s:expr) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::ptr()).stim[0];
            cortex_m::iprintln!(stim, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::ptr()).stim[0];
            cortex_m::iprintln!(stim, $s, $($tt)*);
        }
    };
}

#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($s:expr) => { let _ = cortex_m_semihosting::hprintln!($s); };
    ($s:expr, $($tt:tt)*) => { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); };
}

macro_rules! uassert {
    ($cond : expr) => {
        if ! $cond {
            panic!("Assertion failed!");
        }
    }
}

macro_rules! uassert_eq {
    ($cond1 : expr, $cond2 : expr) => {
        if ! ($cond1 == $cond2) {
            panic!("Assertion failed!");
        }
    }
}

/// On ARMvx-M we have to use a global to record the current task pointer,
/// since we don't have a scratch register, and the naked exception handlers
/// need to reach it by a fixed symbol name.
#[no_mangle]
static mut CURRENT_TASK_PTR: Option<NonNull<Tcb>> = None;

/// Records `tcb` as the task the next exception return resumes.
///
/// # Safety
/// Caller must ensure `tcb` stays valid (it's a `'static` reference into the
/// task pool in practice) and that this isn't called concurrently with an
/// exception handler reading it.
unsafe fn set_current_task(tcb: *mut Tcb) {
    CURRENT_TASK_PTR = Some(NonNull::new_unchecked(tcb));
}

/// Writes the CONTROL register's nPRIV bit to match `privileged` (§4.D step
/// e): 0 selects privileged thread mode, 1 unprivileged. CONTROL.SPSEL
/// (the stack pointer bit) is left alone here; the exception return
/// sequence rewrites it from EXC_RETURN regardless of what we write now.
unsafe fn set_privilege(privileged: bool) {
    let bits: u32 = if privileged { 0 } else { 1 };
    llvm_asm! { "msr CONTROL, $0"
        :
        : "r"(bits)
        :
        : "volatile"
    }
}

#[cfg(armv7m)]
fn region_attrs_to_armv7m(attrs: abi::RegionAttributes) -> (u32, u32, u32) {
    let xn = !attrs.contains(abi::RegionAttributes::EXECUTE);
    let ap = if attrs.contains(abi::RegionAttributes::WRITE) {
        0b011
    } else if attrs.contains(abi::RegionAttributes::READ) {
        0b010
    } else {
        0b001
    };
    let (tex, scb) = if attrs.contains(abi::RegionAttributes::DEVICE) {
        (0b000, 0b111)
    } else {
        (0b001, 0b111)
    };
    (xn as u32, ap, (tex << 3) | scb)
}

#[cfg(armv7m)]
fn program_region(index: u8, desc: RegionDesc) {
    let mpu = unsafe { &*cortex_m::peripheral::MPU::ptr() };
    let encoding = mpu::validate_region(desc.base, desc.size)
        .unwrap_or_else(|e| panic!("bad MPU region {}: {:?}", index, e));
    let (xn, ap, tex_scb) = region_attrs_to_armv7m(desc.attributes());
    let rbar = (index as u32) | (1 << 4) | desc.base;
    let rasr = xn << 28
        | ap << 24
        | tex_scb << 16
        | (encoding as u32) << 1
        | (1 << 0); // enable
    unsafe {
        mpu.rbar.write(rbar);
        mpu.rasr.write(rasr);
    }
}

#[cfg(armv8m)]
fn program_region(index: u8, desc: RegionDesc) {
    debug_assert_eq!(desc.base & 0x1F, 0);
    let attrs = desc.attributes();
    let xn = !attrs.contains(abi::RegionAttributes::EXECUTE);
    let ap = if attrs.contains(abi::RegionAttributes::WRITE) {
        0b01
    } else if attrs.contains(abi::RegionAttributes::READ) {
        0b11
    } else {
        0b00
    };
    let mair = if attrs.contains(abi::RegionAttributes::DEVICE) {
        0b0000_0000
    } else {
        0b1111_1111
    };
    let sh = 0b10u32;
    let rnr = index as u32;
    let rlar = (desc.base + desc.size) | (rnr << 1) | (1 << 0);
    let rbar = (xn as u32) | ap << 1 | sh << 3 | desc.base;
    unsafe {
        core::ptr::write_volatile(0xe000_ed98 as *mut u32, rnr);
        if rnr < 4 {
            let mut mair0 = (0xe000_edc0 as *const u32).read_volatile();
            mair0 |= (mair as u32) << (rnr * 8);
            core::ptr::write_volatile(0xe000_edc0 as *mut u32, mair0);
        } else {
            let mut mair1 = (0xe000_edc4 as *const u32).read_volatile();
            mair1 |= (mair as u32) << ((rnr - 4) * 8);
            core::ptr::write_volatile(0xe000_edc4 as *mut u32, mair1);
        }
        core::ptr::write_volatile(0xe000_ed9c as *mut u32, rbar);
        core::ptr::write_volatile(0xe000_eda0 as *mut u32, rlar);
    }
}

/// Programs the board-fixed portion of the MPU map (regions 0..5, §4.B) and
/// leaves the MPU disabled; called once at boot, before the first task's
/// regions 6/7 are set and the MPU enabled in `start_first_task`.
pub fn init_fixed_regions(fixed: &FixedRegions) {
    for (index, desc) in fixed.entries() {
        program_region(index, desc);
    }
}

/// Reprograms the active-task regions (6 and 7, §4.B) for `code`/`data`.
/// Called on every context switch.
pub fn set_task_regions(code: RegionDesc, data: RegionDesc) {
    program_region(mpu::REGION_TASK_CODE, code);
    program_region(mpu::REGION_TASK_DATA, data);
}

/// Writes a freshly seeded stack frame into task memory at `top_of_stack`,
/// the other half of `Application::seed_stack` (§4.A): that function
/// computes the frame and the aligned stack pointer, but has no business
/// poking task memory directly.
///
/// # Safety
/// `top_of_stack` must point to at least `StackFrame::WORDS * 4` writable
/// bytes within the task's own data region.
pub unsafe fn write_seeded_stack(top_of_stack: u32, frame: &crate::frame::StackFrame) {
    let words = frame.as_words();
    let dest = top_of_stack as *mut u32;
    for (i, word) in words.iter().enumerate() {
        core::ptr::write_volatile(dest.add(i), *word);
    }
}

/// Enables faults, pins every exception this kernel uses to a single
/// priority level (so the kernel itself is never preempted by its own entry
/// points), enables the MPU, and branches into the first task. Never
/// returns.
pub fn start_first_task(tcb: &Tcb, code: RegionDesc, data: RegionDesc) -> ! {
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::ptr();
        #[cfg(armv7m)]
        {
            scb.shcsr.modify(|x| x | 0b111 << 16);
        }
        #[cfg(armv8m)]
        {
            scb.shcsr.modify(|x| x | 0b1111 << 16);
        }
        // Usage/Bus/MemManage escalate straight to HardFault in this
        // kernel, so their individual priorities don't matter; only
        // SVCall/PendSV/SysTick need to sit at the same (low) priority so
        // none of them can preempt another.
        scb.shpr[7].write(kernel::KERNEL_INTERRUPT_PRIORITY);
        scb.shpr[10].write(kernel::KERNEL_INTERRUPT_PRIORITY);
        scb.shpr[11].write(kernel::KERNEL_INTERRUPT_PRIORITY);

        let nvic = &*cortex_m::peripheral::NVIC::ptr();
        let ictr = (0xe000_e004 as *const u32).read_volatile();
        let irq_count = (ictr as usize & 0xF) * 32;
        for i in 0..irq_count {
            nvic.ipr[i].write(kernel::KERNEL_INTERRUPT_PRIORITY);
        }

        let syst = &*cortex_m::peripheral::SYST::ptr();
        syst.rvr.write(159_999);
        syst.cvr.write(0);
        syst.csr.modify(|v| v | 0b111);
    }

    set_task_regions(code, data);
    let mpu = unsafe { &*cortex_m::peripheral::MPU::ptr() };
    const ENABLE: u32 = 0b001;
    const PRIVDEFENA: u32 = 0b100;
    unsafe {
        mpu.ctrl.write(ENABLE | PRIVDEFENA);
    }

    unsafe {
        set_current_task(tcb as *const Tcb as *mut Tcb);

        llvm_asm! { "
            msr PSP, $0             @ set the user stack pointer
            ldm $1, {r4-r11}        @ restore the callee-save registers
            svc #0xFF               @ branch into user mode (svc # ignored)
            udf #0xad               @ should not return
        "
            :
            : "r"(tcb.top_of_stack),
              "r"(&tcb.r4)
            : "memory"
            : "volatile"
        }
        core::hint::unreachable_unchecked()
    }
}

/// Handler linked into the vector table for the `SVC` instruction. (Name is
/// dictated by the `cortex_m` crate.)
#[allow(non_snake_case)]
#[naked]
#[no_mangle]
pub unsafe extern "C" fn SVCall() {
    llvm_asm! {"
        cmp lr, #0xFFFFFFF9     @ is it coming from inside the kernel?
        beq 1f                  @ if so, we're starting the first task.

        @ the common case: a task yielding. no register save needed --
        @ PendSV will read PSP and r4-r11 itself, and neither changes here.
        bl svc_pend_switch
        bx lr

    1:  @ starting up the first task. Hardcoded unprivileged: every task
        @ startup.rs loads is (step 3); PendSV's set_privilege is what
        @ actually consults the TCB for any task after this first one.
        movs r0, #1             @ get bitmask to...
        msr CONTROL, r0         @ ...shed privs from thread mode.

        mov lr, #0xFFFFFFED     @ materialize EXC_RETURN value to
                                @ return into thread mode, PSP, FP on
        bx lr                   @ branch into user mode
        "
        :
        :
        :
        : "volatile"
    }
}

/// Rust side of the common `SVCall` path. Reads the immediate the task
/// passed to `svc` out of the stacked exception frame and dispatches on it
/// (§6): `Yield` just pends a switch; anything else, including the
/// reserved-but-unimplemented `RaisePrivilege`, is an unrecognized
/// immediate and is a usage fault (§9's open-question decision), which
/// terminates the task. Either way a switch ends up pended: a terminated
/// task still has to be moved off the CPU, and that's `PendSV`'s job, not
/// this function's.
#[no_mangle]
unsafe extern "C" fn svc_pend_switch() {
    let psp = cortex_m::register::psp::read();
    let imm = svc_immediate(psp);
    use core::convert::TryFrom;
    match abi::Sysnum::try_from(imm) {
        Ok(abi::Sysnum::Yield) => {}
        _ => kernel::mark_active_faulted(abi::FaultInfo {
            kind: abi::FaultKind::UsageFault,
            value: imm as u32,
            source: FaultSource::User,
        }),
    }
    pend_context_switch_from_isr();
}

/// Reads the one-byte immediate operand of the `svc` instruction that got
/// us here. `psp` points at the hardware-stacked exception frame
/// (r0,r1,r2,r3,r12,lr,pc,psr); `pc` there is the return address, i.e. the
/// instruction right after the 16-bit `svc #imm` encoding.
unsafe fn svc_immediate(psp: u32) -> u8 {
    let pc = core::ptr::read_volatile((psp + 24) as *const u32);
    let instr = core::ptr::read_volatile((pc - 2) as *const u16);
    (instr & 0xFF) as u8
}

fn pend_context_switch_from_isr() {
    cortex_m::peripheral::SCB::set_pendsv();
}

#[allow(non_snake_case)]
#[naked]
#[no_mangle]
pub unsafe extern "C" fn PendSV() {
    llvm_asm! {"
        @ get a pointer to the current task.
        movw r0, #:lower16:CURRENT_TASK_PTR
        movt r0, #:upper16:CURRENT_TASK_PTR
        ldr r1, [r0]

        @ save: top_of_stack (offset 0) = psp; r4-r11 at offset 4..36;
        @ exc_return at offset 36.
        mrs r12, PSP
        str r12, [r1]
        add r1, r1, #4
        stm r1, {r4-r11}
        mov r0, lr
        str r0, [r1, #32]

        bl pendsv_entry

        @ we're returning to *some* task, maybe not the one we saved.
        movw r0, #:lower16:CURRENT_TASK_PTR
        movt r0, #:upper16:CURRENT_TASK_PTR
        ldr r0, [r0]

        ldr r12, [r0]
        add r0, r0, #4
        ldm r0, {r4-r11}
        ldr r1, [r0, #32]
        msr PSP, r12
        mov lr, r1

        bx lr
        "
        :
        :
        :
        : "volatile"
    }
}

/// Rust side of `PendSV`: asks the kernel for the next task to run, then
/// reprograms the MPU's task-specific regions for it and sets its privilege
/// level before the asm above restores its registers and returns to it.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    let Resume { tcb, code, data, privileged } = kernel::yield_active();
    set_task_regions(code, data);
    set_current_task(tcb);
    set_privilege(privileged);
}

/// Handler linked into the vector table for `HardFault`. Every configurable
/// fault this kernel cares about escalates here (§4.C): we never unmask
/// MemManage/Bus/Usage individually, so HFSR's FORCED bit is always set for
/// a real fault and CFSR tells us which sub-class it was.
#[allow(non_snake_case)]
#[naked]
#[no_mangle]
pub unsafe extern "C" fn HardFault() {
    llvm_asm! { "
        tst lr, #4              @ bit 2 of EXC_RETURN: 0 = MSP, 1 = PSP
        ite eq
        mrseq r0, msp
        mrsne r0, psp
        mov r1, lr
        b hard_fault_rust
        "
        ::::"volatile"
    }
}

/// Rust entry point for `HardFault`. `frame_addr` is the address of the
/// stacked exception frame (on whichever stack was active); `exc_return`
/// tells us whether that was the main or process stack.
#[allow(non_snake_case)]
#[no_mangle]
unsafe extern "C" fn hard_fault_rust(frame_addr: u32, exc_return: u32) -> ! {
    let scb = &*cortex_m::peripheral::SCB::ptr();
    let hfsr = scb.hfsr.read();
    let cfsr_raw = scb.cfsr.read();
    let source = if exc_return & 0b100 != 0 {
        FaultSource::User
    } else {
        FaultSource::Kernel
    };

    let regs = FaultRegisters {
        hfsr_forced: hfsr & (1 << 30) != 0,
        hfsr,
        cfsr: Cfsr::from_bits_truncate(cfsr_raw),
        mmfar: scb.mmfar.read(),
    };

    // Write-1-to-clear the sticky fault status bits now that we've read
    // them, so the next fault's classification isn't contaminated by this
    // one's.
    scb.cfsr.write(cfsr_raw);
    scb.hfsr.write(hfsr & (1 << 30));

    match kernel::handle_hard_fault(regs, source, frame_addr) {
        kernel::FaultOutcome::TaskTerminated => {
            pend_context_switch_from_isr();
            // HardFault returns straight back to whatever was interrupted
            // (the faulted task, now marked Terminated); PendSV, pended
            // above, tail-chains in before that task executes another
            // instruction, saves its (about to be discarded) registers into
            // its own TCB, and picks a real next task via `kernel::
            // yield_active` exactly as it would for a voluntary yield.
        }
        kernel::FaultOutcome::Reset => {
            panic!(
                "hard fault in kernel mode: hfsr=0x{:08x} cfsr=0x{:08x}",
                regs.hfsr, regs.cfsr.bits()
            );
        }
    }

    core::hint::unreachable_unchecked()
}

/// System tick handler: advances the kernel's logging timestamp (§1.A).
/// This kernel's scheduler is cooperative, so a tick never itself triggers
/// a context switch.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    TICKS += 1;
}

static mut TICKS: u64 = 0;

/// Reads the tick counter.
pub fn now() -> crate::time::Timestamp {
    crate::time::Timestamp::from(unsafe { TICKS })
}

#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn DefaultHandler() {
    let mut ipsr: u32;
    llvm_asm! {
        "mrs $0, IPSR"
        : "=r"(ipsr)
    }
    panic!("unhandled exception {}", ipsr & 0x1FF);
}
