//! Pure stack-frame construction (§3, §4.A).
//!
//! This is the architecture-independent half of seeding a new task's
//! stack: given a rough top-of-stack and an entry point, compute the exact
//! words that must land on the stack and the aligned address they start
//! at. The architecture backend is responsible for actually writing these
//! words into task memory and recording the result as the task's saved
//! stack pointer.

/// PSR value for a freshly seeded task: Thumb bit set, no flags.
pub const INITIAL_PSR: u32 = 0x0100_0000;

/// The sixteen words written to the top of a newly seeded task stack, in
/// descending-stack order (low address first): R4-R11, then the
/// hardware-defined R0-R3/R12/LR/PC/PSR group.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct StackFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
}

impl StackFrame {
    pub const WORDS: u32 = 16;

    /// As an array of words in stack order, for writing to memory.
    pub fn as_words(&self) -> [u32; Self::WORDS as usize] {
        [
            self.r4, self.r5, self.r6, self.r7, self.r8, self.r9, self.r10,
            self.r11, self.r0, self.r1, self.r2, self.r3, self.r12, self.lr,
            self.pc, self.psr,
        ]
    }
}

/// Result of seeding a task's stack: the frame to write, and the (8-byte
/// aligned) address it starts at, which becomes the task's new
/// top-of-stack / saved `psp`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SeededStack {
    pub top_of_stack: u32,
    pub frame: StackFrame,
}

/// Computes the frame and aligned top-of-stack for a freshly initialised
/// task (§4.A, R1, S5).
///
/// `rough_top` is an upper bound for the task's stack region (typically
/// `data_base + data_size`); it need not be aligned. `entry_pc` is the
/// task's entry point; bit 0 (the Thumb-mode marker some toolchains set on
/// function pointers) is cleared before it's written to the frame, since
/// Thumb mode is selected by the PSR, not by the PC's low bit.
/// `halt_trampoline` is the address a task lands on if its entry function
/// ever returns; it is written into LR.
pub fn init_tcb(rough_top: u32, entry_pc: u32, halt_trampoline: u32) -> SeededStack {
    let frame_bytes = StackFrame::WORDS * 4;
    // Drop the frame below rough_top, then round up to the next 8-byte
    // boundary so the stack pointer handed to the task satisfies the AAPCS
    // stack-alignment requirement at function entry. Rounding up (rather
    // than down) means the frame may start up to 7 bytes below
    // `rough_top - frame_bytes`, never above it.
    let top_of_stack = (rough_top.wrapping_sub(frame_bytes).wrapping_add(7)) & !0b111;

    let frame = StackFrame {
        r4: 0,
        r5: 0,
        r6: 0,
        r7: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
        r0: 0,
        r1: 0,
        r2: 0,
        r3: 0,
        r12: 0,
        lr: halt_trampoline,
        pc: entry_pc & !1,
        psr: INITIAL_PSR,
    };

    SeededStack { top_of_stack, frame }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_bit_zero_is_cleared() {
        let s = init_tcb(0x2000_1000, 0x1235, 0xdead_0000);
        assert_eq!(s.frame.pc, 0x1234);
    }

    #[test]
    fn psr_has_thumb_bit_set() {
        let s = init_tcb(0x2000_1000, 0x1234, 0);
        assert_eq!(s.frame.psr, 0x0100_0000);
    }

    #[test]
    fn r0_is_zero() {
        let s = init_tcb(0x2000_1000, 0x1234, 0);
        assert_eq!(s.frame.r0, 0);
    }

    #[test]
    fn top_of_stack_is_eight_byte_aligned() {
        // S5: top = 0x20000FFF, entry = 0x1235 -> new top 0x20000FC0
        let s = init_tcb(0x2000_0FFF, 0x1235, 0);
        assert_eq!(s.top_of_stack, 0x2000_0FC0);
        assert_eq!(s.frame.pc, 0x1234);
        assert_eq!(s.frame.psr, 0x0100_0000);
    }

    #[test]
    fn misaligned_rough_top_still_yields_aligned_result() {
        for fudge in 0..8u32 {
            let s = init_tcb(0x2000_1000 + fudge, 0x1234, 0);
            assert_eq!(s.top_of_stack % 8, 0);
        }
    }

    #[test]
    fn lr_is_the_halt_trampoline() {
        let s = init_tcb(0x2000_1000, 0x1234, 0x0000_0401);
        assert_eq!(s.frame.lr, 0x0000_0401);
    }
}
