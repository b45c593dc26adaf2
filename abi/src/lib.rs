//! Types shared between the kernel and the tools that build task images.
//!
//! Everything in this crate is `#![no_std]` and `repr(C)` where it crosses
//! the kernel/image boundary, since it describes on-disk/on-flash layout as
//! much as it describes an in-memory API.

#![cfg_attr(not(test), no_std)]

use serde::{Deserialize, Serialize};
use zerocopy::{AsBytes, FromBytes};

/// Number of bytes in a task image's opaque signature block (§6).
pub const SIGNATURE_SIZE: usize = 256;

/// Byte offset of the metadata header within a task image.
pub const HEADER_OFFSET: usize = 0x000;
/// Byte offset of the opaque signature block within a task image.
pub const SIGNATURE_OFFSET: usize = 0x100;
/// Byte offset of the initial stack pointer word within a task image.
pub const INITIAL_SP_OFFSET: usize = 0x200;
/// Byte offset of the entry point word within a task image.
pub const ENTRY_PC_OFFSET: usize = 0x204;
/// Byte offset of the first code byte within a task image.
pub const CODE_OFFSET: usize = 0x208;

/// The metadata header occupying the first 256 bytes of a task image.
///
/// Everything after the four described fields is padding reserved for
/// future use; a loader must not assume it is zeroed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, AsBytes, FromBytes)]
#[repr(C)]
pub struct ImageHeader {
    pub code_base: u32,
    pub code_size: u32,
    pub data_base: u32,
    pub data_size: u32,
}

impl ImageHeader {
    pub const SIZE: usize = SIGNATURE_OFFSET - HEADER_OFFSET;

    pub fn code_region(&self) -> (u32, u32) {
        (self.code_base, self.code_size)
    }

    pub fn data_region(&self) -> (u32, u32) {
        (self.data_base, self.data_size)
    }
}

bitflags::bitflags! {
    /// Access permissions for an MPU region. These map fairly directly onto
    /// the AP/XN/TEX/S/C/B encoding a real MPU expects; the exact bit
    /// placement is the architecture backend's business; this type only
    /// records intent.
    #[derive(Default, Deserialize, Serialize)]
    pub struct RegionAttributes: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Device memory: strongly ordered, not cacheable, not bufferable.
        const DEVICE = 1 << 3;
    }
}

/// A single memory region: base address, size in bytes, and attributes.
///
/// `size` must be a power of two of at least 32, and `base` must be aligned
/// to `size`, or the region is rejected by the MPU programmer (§4.B, B1).
#[derive(Copy, Clone, Debug, Eq, PartialEq, AsBytes, FromBytes)]
#[repr(C)]
pub struct RegionDesc {
    pub base: u32,
    pub size: u32,
    pub attributes: u32,
}

impl RegionDesc {
    pub const fn new(base: u32, size: u32, attributes: RegionAttributes) -> Self {
        Self {
            base,
            size,
            attributes: attributes.bits(),
        }
    }

    pub fn attributes(&self) -> RegionAttributes {
        RegionAttributes::from_bits_truncate(self.attributes)
    }
}

/// Where a fault originated, used only to choose the kernel's response
/// (terminate vs. reset); it carries no other semantics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultSource {
    User,
    Kernel,
}

/// Classification of a forced hard fault (§4.C).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// Generic hard fault: the "forced" bit was clear, so HFSR itself is
    /// the only diagnostic available.
    HardFault,
    /// A configurable fault whose specific sub-register did not match any
    /// of the more precise cases below.
    MemoryFault,
    BusFault,
    UsageFault,
    DivideByZero,
    CodeAccessViolation,
    DataAccessViolation,
    AccessViolation,
}

/// A fault's classification, its architecture-specific status value (raw
/// sub-register contents, or a faulting address — see §4.C), and where it
/// was taken.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FaultInfo {
    pub kind: FaultKind,
    pub value: u32,
    pub source: FaultSource,
}

/// Supervisor-call immediates recognised by the SVC handler.
///
/// `RaisePrivilege` is reserved (see Open Questions in SPEC_FULL.md) but has
/// no kernel-side handler; issuing it is treated like an unrecognized
/// immediate, i.e. a usage fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Sysnum {
    Yield = 0,
    RaisePrivilege = 1,
}

impl core::convert::TryFrom<u8> for Sysnum {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Sysnum::Yield),
            1 => Ok(Sysnum::RaisePrivilege),
            _ => Err(()),
        }
    }
}
