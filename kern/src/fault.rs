//! Forced hard-fault classification (§4.C) and the one-shot stack dump.
//!
//! The hardware hands this module raw status-register bits; everything
//! here is pure decoding logic, independent of how those bits were read.
//! Mirrors the priority usage > bus > mem, and the sub-classification
//! inside each, of a typical M-profile fault handler.

use abi::{FaultInfo, FaultKind, FaultSource};

bitflags::bitflags! {
    /// Usage/bus/mem sub-status bits packed into CFSR, as delivered by the
    /// architecture backend (already shifted down to bit 0).
    pub struct Cfsr: u32 {
        const MEM_IACCVIOL   = 1 << 0;
        const MEM_DACCVIOL   = 1 << 1;
        const MEM_MUNSTKERR  = 1 << 3;
        const MEM_MSTKERR    = 1 << 4;
        const MEM_MLSPERR    = 1 << 5;
        const MEM_MMARVALID  = 1 << 7;
        const BUS_MASK       = 0xff << 8;
        const USAGE_DIVBYZERO = 1 << 25;
        const USAGE_MASK     = 0xffff << 16;
    }
}

impl Cfsr {
    pub fn usage_bits(self) -> u32 {
        (self.bits() & Self::USAGE_MASK.bits()) >> 16
    }

    pub fn bus_bits(self) -> u32 {
        (self.bits() & Self::BUS_MASK.bits()) >> 8
    }

    pub fn mem_bits(self) -> u32 {
        self.bits() & 0xff
    }

    pub fn has_usage_fault(self) -> bool {
        self.usage_bits() != 0
    }

    pub fn has_bus_fault(self) -> bool {
        self.bus_bits() != 0
    }

    pub fn has_mem_fault(self) -> bool {
        self.mem_bits() != 0
    }
}

/// Raw register contents needed to classify a forced hard fault.
#[derive(Copy, Clone, Debug)]
pub struct FaultRegisters {
    /// Hard Fault Status Register; only the FORCED bit matters here.
    pub hfsr_forced: bool,
    pub hfsr: u32,
    pub cfsr: Cfsr,
    pub mmfar: u32,
}

fn classify_usage_fault(cfsr: Cfsr) -> (FaultKind, u32) {
    if cfsr.contains(Cfsr::USAGE_DIVBYZERO) {
        (FaultKind::DivideByZero, 0)
    } else {
        (FaultKind::UsageFault, cfsr.usage_bits())
    }
}

fn classify_bus_fault(cfsr: Cfsr) -> (FaultKind, u32) {
    (FaultKind::BusFault, cfsr.bus_bits())
}

fn classify_mem_fault(cfsr: Cfsr, mmfar: u32) -> (FaultKind, u32) {
    let value = if cfsr.contains(Cfsr::MEM_MMARVALID) {
        mmfar
    } else {
        0
    };

    if cfsr.contains(Cfsr::MEM_IACCVIOL) {
        (FaultKind::CodeAccessViolation, value)
    } else if cfsr.contains(Cfsr::MEM_DACCVIOL) {
        (FaultKind::DataAccessViolation, value)
    } else {
        (FaultKind::AccessViolation, cfsr.mem_bits())
    }
}

/// Classifies a hard fault given the raw registers and where it was taken.
/// This is the sole decision point for §4.C; it does not clear any status
/// bits, since that's a hardware side effect the architecture backend
/// performs after reading the value this returns.
pub fn classify(regs: FaultRegisters, source: FaultSource) -> FaultInfo {
    let (kind, value) = if regs.hfsr_forced {
        // Usage > bus > mem, matching the only-one-at-a-time assumption of
        // the original dispatcher this is grounded on.
        if regs.cfsr.has_usage_fault() {
            classify_usage_fault(regs.cfsr)
        } else if regs.cfsr.has_bus_fault() {
            classify_bus_fault(regs.cfsr)
        } else if regs.cfsr.has_mem_fault() {
            classify_mem_fault(regs.cfsr, regs.mmfar)
        } else {
            (FaultKind::MemoryFault, regs.cfsr.bits())
        }
    } else {
        (FaultKind::HardFault, regs.hfsr)
    };

    FaultInfo { kind, value, source }
}

/// A one-shot capability to dump the stack frame that was active when a
/// fault was taken (I5, R2). `take()` consumes the capability: the first
/// call returns the dump closure, every later call (until the next fault
/// sets it again) returns `None`.
pub struct StackDump {
    valid: bool,
    frame_addr: u32,
}

impl StackDump {
    pub const fn empty() -> Self {
        Self {
            valid: false,
            frame_addr: 0,
        }
    }

    /// Arms the capability for a freshly taken fault.
    pub fn arm(&mut self, frame_addr: u32) {
        self.valid = true;
        self.frame_addr = frame_addr;
    }

    /// Consumes the capability if it's armed, returning the frame address
    /// to dump. A second call before the next `arm` returns `None`.
    pub fn take(&mut self) -> Option<u32> {
        if self.valid {
            self.valid = false;
            Some(self.frame_addr)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs(forced: bool, cfsr: u32, mmfar: u32, hfsr: u32) -> FaultRegisters {
        FaultRegisters {
            hfsr_forced: forced,
            hfsr,
            cfsr: Cfsr::from_bits_truncate(cfsr),
            mmfar,
        }
    }

    #[test]
    fn divide_by_zero_is_usage_fault_with_divbyzero_bit() {
        let info = classify(
            regs(true, Cfsr::USAGE_DIVBYZERO.bits(), 0, 0),
            FaultSource::User,
        );
        assert_eq!(info.kind, FaultKind::DivideByZero);
        assert_eq!(info.value, 0);
    }

    #[test]
    fn generic_usage_fault_reports_subfield() {
        let bits = 1 << 16; // UNDEFINSTR
        let info = classify(regs(true, bits, 0, 0), FaultSource::User);
        assert_eq!(info.kind, FaultKind::UsageFault);
        assert_eq!(info.value, 1);
    }

    #[test]
    fn bus_fault_reports_subfield() {
        let bits = 1 << 8;
        let info = classify(regs(true, bits, 0, 0), FaultSource::User);
        assert_eq!(info.kind, FaultKind::BusFault);
        assert_eq!(info.value, 1);
    }

    #[test]
    fn code_access_violation_with_valid_address() {
        let bits = Cfsr::MEM_IACCVIOL.bits() | Cfsr::MEM_MMARVALID.bits();
        let info = classify(regs(true, bits, 0x2000_0000, 0), FaultSource::User);
        assert_eq!(info.kind, FaultKind::CodeAccessViolation);
        assert_eq!(info.value, 0x2000_0000);
    }

    #[test]
    fn data_access_violation_without_valid_address_reports_zero() {
        let bits = Cfsr::MEM_DACCVIOL.bits();
        let info = classify(regs(true, bits, 0x2000_0000, 0), FaultSource::User);
        assert_eq!(info.kind, FaultKind::DataAccessViolation);
        assert_eq!(info.value, 0);
    }

    #[test]
    fn usage_wins_over_bus_and_mem() {
        let bits = Cfsr::USAGE_DIVBYZERO.bits()
            | (1 << 8)
            | Cfsr::MEM_IACCVIOL.bits();
        let info = classify(regs(true, bits, 0, 0), FaultSource::User);
        assert_eq!(info.kind, FaultKind::DivideByZero);
    }

    #[test]
    fn unforced_hard_fault_reports_raw_hfsr() {
        let info = classify(regs(false, 0, 0, 0x4000_0000), FaultSource::Kernel);
        assert_eq!(info.kind, FaultKind::HardFault);
        assert_eq!(info.value, 0x4000_0000);
    }

    #[test]
    fn stack_dump_is_one_shot() {
        let mut dump = StackDump::empty();
        dump.arm(0x2000_0100);
        assert_eq!(dump.take(), Some(0x2000_0100));
        assert_eq!(dump.take(), None);
    }

    #[test]
    fn stack_dump_rearms_on_next_fault() {
        let mut dump = StackDump::empty();
        dump.arm(0x2000_0100);
        assert_eq!(dump.take(), Some(0x2000_0100));
        dump.arm(0x2000_0200);
        assert_eq!(dump.take(), Some(0x2000_0200));
    }
}
