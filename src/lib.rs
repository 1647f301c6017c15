/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! larch, a small preemptive kernel for the Raspberry Pi 2/3.
//!
//! The library holds every kernel subsystem; the `kernel` binary in
//! `main.rs` owns the boot path and the panic handler. Hardware access is
//! confined to `arch/` and `platform/` and gated on the ARM target, so the
//! core logic (regions, allocators, translation tables, scheduler, syscall
//! and file layers) builds and unit-tests on the host.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::upper_case_acronyms)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

/// Architecture-specific code.
pub mod arch;

pub mod console;
pub mod cpu;
pub mod exception;
pub mod fs;
#[macro_use]
pub mod macros;
pub mod memory;
pub mod panic_support;
pub mod platform;
pub mod state;
pub mod synchronization;
pub mod syscall;
pub mod task;
pub mod time;
pub mod user;

/// Version string.
pub fn version() -> &'static str {
    concat!(
        env!("CARGO_PKG_NAME"),
        " version ",
        env!("CARGO_PKG_VERSION")
    )
}
