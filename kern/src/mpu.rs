//! MPU region bookkeeping that doesn't require touching real hardware.
//!
//! The fixed region map (§3, §4.B):
//!
//! 0. kernel code       4. shared code (optional)
//! 1. kernel data       5. shared data (optional)
//! 2. GPIO window       6. active task code
//! 3. peripheral window 7. active task data
//!
//! Regions 0..5 are programmed once at boot from board-fixed ranges; 6 and 7
//! are reprogrammed on every context switch from the incoming task's TCB.

use abi::{RegionAttributes, RegionDesc};

pub const REGION_KERNEL_CODE: u8 = 0;
pub const REGION_KERNEL_DATA: u8 = 1;
pub const REGION_GPIO: u8 = 2;
pub const REGION_PERIPHERALS: u8 = 3;
pub const REGION_SHARED_CODE: u8 = 4;
pub const REGION_SHARED_DATA: u8 = 5;
pub const REGION_TASK_CODE: u8 = 6;
pub const REGION_TASK_DATA: u8 = 7;

pub const REGION_COUNT: u8 = 8;

/// Smallest size, in bytes, that the MPU can describe as one region.
pub const MIN_REGION_SIZE: u32 = 32;

/// Errors from the pure region bookkeeping in this module.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionError {
    TooSmall,
    Misaligned,
}

/// Encodes a region size in bytes as the MPU's SIZE field.
///
/// `(region size in bytes) = 2 ^ (encoding + 1)`; the smallest permitted
/// size is 32 bytes, which is encoding 4. A `size` that isn't itself a
/// power of two is rounded up to the next one the MPU can describe (B1:
/// 33 encodes the same as 64), the same as the doubling loop in
/// `getRegionSizeValue`.
pub fn encode_region_size(size: u32) -> Result<u8, RegionError> {
    if size < MIN_REGION_SIZE {
        return Err(RegionError::TooSmall);
    }
    let mut region_size = MIN_REGION_SIZE;
    let mut encoding = 4u8;
    while region_size < size {
        region_size <<= 1;
        encoding += 1;
    }
    Ok(encoding)
}

/// Checks that `base` is aligned to `size`, as the MPU's ADDR field
/// requires (the low bits of the base address are simply not stored).
pub fn check_alignment(base: u32, size: u32) -> Result<(), RegionError> {
    if size == 0 || base % size != 0 {
        Err(RegionError::Misaligned)
    } else {
        Ok(())
    }
}

/// The region size, in bytes, a SIZE field encoding describes.
pub fn region_size_for_encoding(encoding: u8) -> u32 {
    1u32 << (encoding + 1)
}

/// Validates a `(base, size)` pair for use as an MPU region, returning the
/// SIZE field encoding on success. Alignment is checked against the
/// *encoded* region size, not the requested one: a 33-byte request rounds
/// up to a 64-byte region (B1), and it's that 64-byte region the base
/// address actually has to line up with.
pub fn validate_region(base: u32, size: u32) -> Result<u8, RegionError> {
    let encoding = encode_region_size(size)?;
    check_alignment(base, region_size_for_encoding(encoding))?;
    Ok(encoding)
}

/// Describes the fixed, board-specific portion of the region map (0..3),
/// and optionally a shared code/data window (4..5). This is supplied by
/// board support code; the kernel only consumes it.
pub struct FixedRegions {
    pub kernel_code: RegionDesc,
    pub kernel_data: RegionDesc,
    pub gpio: RegionDesc,
    pub peripherals: RegionDesc,
    pub shared_code: Option<RegionDesc>,
    pub shared_data: Option<RegionDesc>,
}

impl FixedRegions {
    /// Region descriptors in index order, paired with the region number
    /// they belong in. Regions without a fixed descriptor (shared
    /// code/data, when absent) are omitted rather than zeroed, so the
    /// architecture backend can choose to leave them disabled.
    pub fn entries(&self) -> [(u8, RegionDesc); 6] {
        [
            (REGION_KERNEL_CODE, self.kernel_code),
            (REGION_KERNEL_DATA, self.kernel_data),
            (REGION_GPIO, self.gpio),
            (REGION_PERIPHERALS, self.peripherals),
            (
                REGION_SHARED_CODE,
                self.shared_code.unwrap_or(RegionDesc::new(0, MIN_REGION_SIZE, RegionAttributes::empty())),
            ),
            (
                REGION_SHARED_DATA,
                self.shared_data.unwrap_or(RegionDesc::new(0, MIN_REGION_SIZE, RegionAttributes::empty())),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_size_encodes_to_four() {
        assert_eq!(encode_region_size(32).unwrap(), 4);
    }

    #[test]
    fn next_power_of_two_encodes_to_five() {
        assert_eq!(encode_region_size(64).unwrap(), 5);
    }

    #[test]
    fn non_power_of_two_rounds_up_to_next_encoding() {
        assert_eq!(encode_region_size(33), Ok(5));
    }

    #[test]
    fn below_minimum_rejected() {
        assert_eq!(encode_region_size(16), Err(RegionError::TooSmall));
    }

    #[test]
    fn arbitrary_power_of_two_matches_formula() {
        for n in 5..20u32 {
            let size = 1u32 << n;
            let encoding = encode_region_size(size).unwrap();
            assert_eq!(size, 2u32.pow(encoding as u32 + 1));
        }
    }

    #[test]
    fn alignment_must_match_size() {
        assert_eq!(check_alignment(0x10000, 0x1000), Ok(()));
        assert_eq!(
            check_alignment(0x10010, 0x1000),
            Err(RegionError::Misaligned)
        );
    }

    #[test]
    fn s4_scenario_region_six_and_seven() {
        let code = (0x10000u32, 0x1000u32);
        let data = (0x20000u32, 0x1000u32);
        assert!(validate_region(code.0, code.1).is_ok());
        assert!(validate_region(data.0, data.1).is_ok());
    }
}
