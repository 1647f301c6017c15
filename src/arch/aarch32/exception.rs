/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Vector table installation and exception-mode plumbing.

use snafu::Snafu;

#[cfg(target_arch = "arm")]
core::arch::global_asm!(include_str!("vectors.S"));

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Errors possibly returned from the vector installation.
#[derive(Debug, Snafu)]
pub enum Error {
    /// Vector base address is not 32-byte aligned.
    #[snafu(display("Unaligned base address for the exception vector table"))]
    Unaligned,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Point VBAR at the vector table built in `vectors.S`.
///
/// # Safety
///
/// Rewires exception delivery for the whole core; call once, from the
/// boot path, before interrupts are enabled.
pub unsafe fn install_vector_table() -> Result<(), Error> {
    #[cfg(target_arch = "arm")]
    {
        extern "C" {
            static __exception_vectors_start: core::cell::UnsafeCell<()>;
        }

        let base = unsafe { __exception_vectors_start.get() } as u32;
        if base.trailing_zeros() < 5 {
            return Err(Error::Unaligned);
        }

        // VBAR, B4.1.156 in the ARMv7-A reference manual.
        unsafe {
            core::arch::asm!(
                "mcr p15, 0, {base}, c12, c0, 0",
                "isb",
                base = in(reg) base,
                options(nostack),
            )
        };
    }
    Ok(())
}

/// Give the fatal exception modes (undefined, abort) their own small
/// stacks so their handlers can at least print before halting.
///
/// # Safety
///
/// `undef_stack_top` and `abort_stack_top` must point at the top of
/// live, exclusively owned stack memory. Call with IRQs masked.
pub unsafe fn install_exception_stacks(undef_stack_top: usize, abort_stack_top: usize) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "cps #0x1b",            // undefined mode
            "mov sp, {undef}",
            "cps #0x17",            // abort mode
            "mov sp, {abort}",
            "cps #0x13",            // back to supervisor
            undef = in(reg) undef_stack_top as u32,
            abort = in(reg) abort_stack_top as u32,
            options(nostack),
        )
    };
    #[cfg(not(target_arch = "arm"))]
    {
        let _ = (undef_stack_top, abort_stack_top);
    }
}
