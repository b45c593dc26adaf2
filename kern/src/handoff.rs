//! Bootloader hand-off: relocate the vector table and jump to an image
//! (§4.G).
//!
//! This has no direct analogue elsewhere in this crate — it's the one
//! piece of the core that runs *before* the kernel proper exists, so it
//! can't rely on any kernel state. It's deliberately standalone: whoever
//! calls it (a preceding ROM stage, or this kernel's own reset path handing
//! off to a later-loaded image) owns validating the target first.

/// Vector-table base alignment mask. The vector table must be aligned to
/// its own size; requiring 128-byte alignment covers the smallest tables
/// this kernel ever lays out (initial SP + initial PC + a modest IRQ
/// count), matching the board's own bootloader convention.
const VECTOR_TABLE_ALIGN_MASK: u32 = !0x7f;

/// Computes the vector table base that will be written to VTOR for a given
/// image address. Pure half of `jump_to_image`, so the masking logic (S6)
/// can be tested without actually jumping anywhere.
pub const fn vector_table_base(image_addr: u32) -> u32 {
    image_addr & VECTOR_TABLE_ALIGN_MASK
}

/// Reads the initial stack pointer and entry point out of an image's first
/// two words, the way `jump_to_image` will load them into MSP and PC.
///
/// # Safety
/// `image_addr` must point to at least 8 readable bytes.
pub unsafe fn read_vector_table(image_addr: u32) -> (u32, u32) {
    let words = image_addr as *const u32;
    (core::ptr::read_volatile(words), core::ptr::read_volatile(words.add(1)))
}

/// Relocates the vector table to `image_addr` and transfers control to the
/// image there: loads the main stack pointer from `word[image_addr]` and
/// branches to `word[image_addr + 4]`. Never returns.
///
/// # Safety
/// `image_addr` must point to a valid vector table (SP then PC, §6); the
/// caller is responsible for having validated the image (signature,
/// bounds) before calling this — this function performs no checks of its
/// own.
#[cfg(target_arch = "arm")]
pub unsafe fn jump_to_image(image_addr: u32) -> ! {
    let scb = &*cortex_m::peripheral::SCB::ptr();
    scb.vtor.write(vector_table_base(image_addr));

    llvm_asm! {"
        ldr r0, [$0, #0]    @ new MSP
        ldr r1, [$0, #4]    @ new PC
        msr MSP, r0
        bx r1
    "
    :
    : "r"(image_addr)
    : "r0", "r1"
    : "volatile"
    }
    core::hint::unreachable_unchecked()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_vector_table_alignment_matches_image_address() {
        // S6: word[0x8000] = 0x20008000 (SP), word[0x8004] = 0x8201 (PC,
        // bit 0 set for Thumb per the hardware convention on function
        // pointers, cleared automatically by the hardware PC load).
        assert_eq!(vector_table_base(0x8000), 0x8000);
    }

    #[test]
    fn unaligned_image_address_is_masked_down() {
        assert_eq!(vector_table_base(0x8003), 0x8000);
    }
}
