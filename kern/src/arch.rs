//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, tailored for the current target. Both backends define
//! the same set of names (`init_fixed_regions`, `set_task_regions`,
//! `write_seeded_stack`, `start_first_task`, `now`) plus the `klog!`,
//! `uassert!`, `uassert_eq!` macros the rest of the kernel is built on.

cfg_if::cfg_if! {
    // cfg_if! is slightly touchy about ordering and expression complexity;
    // this chain is the form that works.

    if #[cfg(not(target_pointer_width = "32"))] {
        compile_error!("non-32-bit targets not supported (even for simulation)");
    } else if #[cfg(target_arch = "arm")] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else {
        // No real thread mode or MPU to speak of here; this backend exists
        // so the architecture-independent modules can run under `cargo
        // test` on the host.
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    }
}
