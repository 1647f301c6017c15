/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Low-level boot of the processor.
//!
//! The GPU firmware drops all four cores at `_start` in supervisor mode.
//! Core 0 gets a stack below the load address and carries on; the others
//! are parked. Rust code starts at [`_start_rust`], which zeroes `.bss`
//! and hands over to the kernel binary's `kernel_init`.

#[cfg(target_arch = "arm")]
core::arch::global_asm!(
    r#"
.section .text.boot

.globl _start
_start:
    mrc     p15, 0, r0, c0, c0, 5   // MPIDR
    and     r0, r0, #3
    cmp     r0, #0
    bne     .Lpark

    cpsid   i, #0x13                // supervisor mode, IRQs masked
    ldr     sp, =_start             // boot stack grows down from the image
    bl      _start_rust

.Lpark:
    wfe
    b       .Lpark
.ltorg
"#
);

/// Zero `.bss` and enter the kernel.
///
/// # Safety
///
/// Called exactly once, from `_start`, with a valid stack.
#[cfg(target_arch = "arm")]
#[no_mangle]
pub unsafe extern "C" fn _start_rust() -> ! {
    extern "C" {
        // Provided by the linker script.
        static mut __bss_start: u64;
        static mut __bss_end: u64;
    }

    unsafe {
        r0::zero_bss(
            core::ptr::addr_of_mut!(__bss_start),
            core::ptr::addr_of_mut!(__bss_end),
        )
    };

    extern "Rust" {
        fn kernel_init() -> !;
    }

    unsafe { kernel_init() }
}

/// The first address past the kernel image, from the linker script.
pub fn code_end() -> usize {
    #[cfg(target_arch = "arm")]
    {
        extern "C" {
            static __code_end: core::cell::UnsafeCell<()>;
        }
        unsafe { __code_end.get() as usize }
    }
    #[cfg(not(target_arch = "arm"))]
    0
}
