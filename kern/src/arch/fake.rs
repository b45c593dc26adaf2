//! Host-side architecture backend.
//!
//! Implements the same surface as `arm_m`, backed by plain memory instead
//! of real MPU/NVIC/SCB registers, so the kernel core can be exercised by
//! `cargo test` on the development machine rather than only on a board.
//! There are no naked exception handlers here — nothing on the host ever
//! actually traps — just the pieces `kernel`/`startup` call directly.

use std::cell::RefCell;
use std::collections::BTreeMap;

use abi::RegionDesc;

use crate::frame::StackFrame;
use crate::mpu::FixedRegions;
use crate::task::Tcb;

/// Host equivalent of the real backend's `klog!`: plain `println!`, since
/// there's no ITM or semihosting channel to speak of on a dev machine.
macro_rules! klog {
    ($s:expr) => { println!($s); };
    ($s:expr, $($tt:tt)*) => { println!($s, $($tt)*); };
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

thread_local! {
    /// Stands in for task memory: a sparse map from address to word, so a
    /// seeded stack can be written and then read back for assertions
    /// without owning a real address space.
    static MEMORY: RefCell<BTreeMap<u32, u32>> = RefCell::new(BTreeMap::new());

    /// Stands in for the MPU's region array: what was last programmed into
    /// each of the 8 fixed region slots.
    static REGIONS: RefCell<[Option<RegionDesc>; 8]> = RefCell::new([None; 8]);
}

pub fn init_fixed_regions(fixed: &FixedRegions) {
    REGIONS.with(|r| {
        let mut r = r.borrow_mut();
        for (index, desc) in fixed.entries() {
            r[index as usize] = Some(desc);
        }
    });
}

pub fn set_task_regions(code: RegionDesc, data: RegionDesc) {
    REGIONS.with(|r| {
        let mut r = r.borrow_mut();
        r[crate::mpu::REGION_TASK_CODE as usize] = Some(code);
        r[crate::mpu::REGION_TASK_DATA as usize] = Some(data);
    });
}

/// Reads back what `init_fixed_regions`/`set_task_regions` last programmed
/// into a region slot, for tests.
pub fn region_at(index: u8) -> Option<RegionDesc> {
    REGIONS.with(|r| r.borrow()[index as usize])
}

/// # Safety
/// Matches `arm_m::write_seeded_stack`'s contract, minus the "real memory"
/// part: the simulated memory map has no size limit, so this never
/// actually traps.
pub unsafe fn write_seeded_stack(top_of_stack: u32, frame: &StackFrame) {
    MEMORY.with(|m| {
        let mut m = m.borrow_mut();
        for (i, word) in frame.as_words().iter().enumerate() {
            m.insert(top_of_stack + (i as u32) * 4, *word);
        }
    });
}

/// Reads back a word written by `write_seeded_stack`, for tests.
pub fn read_memory(addr: u32) -> Option<u32> {
    MEMORY.with(|m| m.borrow().get(&addr).copied())
}

/// On the host there's no thread mode to branch into; this just reports
/// what it would have done, for tests that want to confirm `start_kernel`
/// reached the hand-off.
pub fn start_first_task(tcb: &Tcb, code: RegionDesc, data: RegionDesc) -> ! {
    set_task_regions(code, data);
    panic!(
        "start_first_task reached on host: psp=0x{:08x}",
        tcb.top_of_stack
    );
}

pub fn now() -> crate::time::Timestamp {
    crate::time::Timestamp::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::init_tcb;
    use abi::RegionAttributes;

    #[test]
    fn seeded_stack_round_trips_through_memory() {
        let seeded = init_tcb(0x2000_1000, 0x1234, 0);
        unsafe { write_seeded_stack(seeded.top_of_stack, &seeded.frame) };
        let words = seeded.frame.as_words();
        for (i, word) in words.iter().enumerate() {
            assert_eq!(
                read_memory(seeded.top_of_stack + (i as u32) * 4),
                Some(*word)
            );
        }
    }

    #[test]
    fn task_regions_are_reprogrammed_on_switch() {
        let code = RegionDesc::new(0x1000, 0x1000, RegionAttributes::READ | RegionAttributes::EXECUTE);
        let data = RegionDesc::new(0x2000, 0x1000, RegionAttributes::READ | RegionAttributes::WRITE);
        set_task_regions(code, data);
        assert_eq!(region_at(crate::mpu::REGION_TASK_CODE), Some(code));
        assert_eq!(region_at(crate::mpu::REGION_TASK_DATA), Some(data));
    }
}
