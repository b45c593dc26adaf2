//! A small preemptible-by-fault, cooperatively-scheduled microkernel for a
//! single Cortex-M-class microcontroller.
//!
//! This kernel runs a fixed, build-time-sized set of tasks, each confined to
//! its own code/data memory region by the MPU. Tasks never preempt each
//! other: the scheduler only runs a task when the one before it yields
//! voluntarily, or faults and is torn down. There is no IPC, no dynamic
//! task creation, no priority, and no dynamic memory allocation inside the
//! kernel: all of that is out of scope by design, not by omission.
//!
//! # Algorithm naivety principles
//!
//! 1. Use safe Rust for as much as possible; the only unsafe code is the
//!    low-level register/memory plumbing in `arch` and the unavoidable
//!    pointer arithmetic in `startup`.
//! 2. Use easily understood and debugged algorithms: a round-robin cursor,
//!    not a priority queue; a fixed region map, not a general MMU model.
//! 3. Revisit these decisions if they become real performance problems,
//!    which on a system this size they are not expected to.
//!
//! This is also intended to be portable to a plain host target, so that the
//! architecture-independent logic (`frame`, `mpu`, `fault`, `sched`,
//! `kernel`) can be exercised by `cargo test` without a board; see the host
//! backend in `arch/fake.rs`, which stands in for `arch/arm_m.rs` there.

#![cfg_attr(target_os = "none", no_std)]
#![feature(asm)]
#![feature(naked_functions)]

#[macro_use]
pub mod arch;

pub mod fault;
pub mod frame;
pub mod handoff;
pub mod kernel;
pub mod mpu;
pub mod sched;
pub mod startup;
pub mod task;
pub mod time;
