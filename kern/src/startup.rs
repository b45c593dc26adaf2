//! Kernel startup (§4.F boot sequence, §4.G hand-off).
//!
//! Parses a fixed-size table of task images, validates each one, builds the
//! (build-time-sized, statically allocated) task pool, seeds every task's
//! initial stack, installs the kernel, and hands off to the first task.
//! There is no dynamic allocation anywhere in this path — an explicit
//! non-goal — so the task pool lives in a `static mut` array sized by the
//! same `NUM_OF_USER_TASKS` the kernel itself asserts against.

use core::mem::MaybeUninit;

use abi::ImageHeader;

use crate::arch;
use crate::kernel::{self, Kernel};
use crate::mpu::FixedRegions;
use crate::task::Application;

include!(concat!(env!("OUT_DIR"), "/kernel_config.rs"));

#[no_mangle]
extern "C" fn halt_trampoline() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}

static mut TASK_POOL: MaybeUninit<[Application; NUM_OF_USER_TASKS]> =
    MaybeUninit::uninit();

/// One task image's location, as laid out by the board's flash map (§6).
/// `image_base` points at the `ImageHeader` (offset 0x000); the signature,
/// initial SP, entry PC, and code all follow at their fixed offsets.
#[derive(Copy, Clone)]
pub struct ImageSlot {
    pub image_base: u32,
}

/// Parses and validates every task image in `images`, seeds the task pool,
/// programs the board-fixed MPU regions, installs the kernel, and jumps
/// into the first ready task. Never returns.
///
/// # Safety
/// Every `ImageSlot` must point at a valid, fully written task image (§6);
/// this function trusts the header fields to describe real, accessible
/// memory and does not re-validate the board's flash layout beyond the
/// checks described in §4.F (region well-formedness, entry point and
/// initial SP landing inside a region with the right permissions).
pub unsafe fn start_kernel(images: &[ImageSlot], fixed: FixedRegions) -> ! {
    uassert_eq!(images.len(), NUM_OF_USER_TASKS);

    // The address a task's entry function returns to if it ever returns;
    // there is no "exit" syscall, so this just traps.
    let halt_trampoline = halt_trampoline as u32;

    let pool = TASK_POOL.as_mut_ptr();
    for (id, slot) in images.iter().enumerate() {
        let header = &*(slot.image_base as *const ImageHeader);
        let (code_base, code_size) = header.code_region();
        let (data_base, data_size) = header.data_region();

        let code_region = crate::mpu::validate_region(code_base, code_size)
            .map(|_| abi::RegionDesc::new(code_base, code_size, abi::RegionAttributes::READ | abi::RegionAttributes::EXECUTE))
            .unwrap_or_else(|e| panic!("task {}: bad code region: {:?}", id, e));
        let data_region = crate::mpu::validate_region(data_base, data_size)
            .map(|_| abi::RegionDesc::new(data_base, data_size, abi::RegionAttributes::READ | abi::RegionAttributes::WRITE))
            .unwrap_or_else(|e| panic!("task {}: bad data region: {:?}", id, e));

        let initial_sp =
            core::ptr::read_volatile((slot.image_base + abi::INITIAL_SP_OFFSET as u32) as *const u32);
        let entry_pc =
            core::ptr::read_volatile((slot.image_base + abi::ENTRY_PC_OFFSET as u32) as *const u32);

        uassert!(entry_pc.wrapping_sub(code_base) < code_size);
        uassert!(initial_sp.wrapping_sub(data_base) <= data_size);

        // Every task loaded from flash is a user task (§4.F step 3); this
        // kernel has no mechanism yet for marking one of them privileged.
        let mut app = Application::new(id as u16, code_region, data_region, false);
        let frame = app.seed_stack(initial_sp, entry_pc, halt_trampoline);
        arch::write_seeded_stack(app.tcb.top_of_stack, &frame);

        core::ptr::write((pool as *mut Application).add(id), app);
    }

    let tasks: &'static mut [Application] =
        core::slice::from_raw_parts_mut(pool as *mut Application, NUM_OF_USER_TASKS);

    arch::init_fixed_regions(&fixed);

    let mut kern = Kernel::new(tasks);
    let (code, data) = kern.active_regions();
    let tcb = kern.active_tcb();
    kernel::install(kern);

    arch::start_first_task(&*tcb, code, data)
}
