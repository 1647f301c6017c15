/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Synchronous and asynchronous exception handling.
//!
//! The asm stubs in `arch/aarch32/vectors.S` land in the `extern "C"`
//! handlers at the bottom of this file; the portable dispatch logic above
//! them is what the handlers call into.

use crate::{
    arch::aarch32::cpu::{self, Cpsr},
    println,
    synchronization::{interface::Mutex, IRQSafeNullLock},
};

pub mod asynchronous;

use self::asynchronous::IrqDisabled;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Kernel privilege levels.
#[allow(missing_docs)]
#[derive(Eq, PartialEq)]
pub enum PrivilegeLevel {
    User,
    Kernel,
    Unknown,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// The processor's current privilege level.
pub fn current_privilege_level() -> (PrivilegeLevel, &'static str) {
    use crate::arch::aarch32::cpu::ProcessorMode;

    match cpu::current_cpsr().mode() {
        ProcessorMode::User => (PrivilegeLevel::User, "user"),
        ProcessorMode::Unknown => (PrivilegeLevel::Unknown, "?"),
        _ => (PrivilegeLevel::Kernel, "kernel"),
    }
}

/// Install the vector table and the stacks for the fatal modes.
///
/// # Safety
///
/// Boot path only, IRQs still masked.
pub unsafe fn handling_init(undef_stack_top: usize, abort_stack_top: usize) {
    use crate::arch::aarch32::exception as arch_exception;

    unsafe {
        arch_exception::install_exception_stacks(undef_stack_top, abort_stack_top);
        arch_exception::install_vector_table().expect("vector table properly aligned");
    }
}

/// IRQ demultiplexer. Runs with IRQs hardware-masked for its whole body.
///
/// Order matters: the timer is accounted before the UART is pumped, and a
/// single reschedule happens after all sources are drained.
pub fn handle_irq(irq: &IrqDisabled) {
    let mut should_reschedule = false;

    let controller = crate::platform::raspberrypi::interrupt_controller::interrupt_controller();
    if controller.timer_pending() {
        crate::platform::raspberrypi::system_timer::system_timer().handle_irq(irq);
        should_reschedule = true;
    }
    if controller.uart_pending() {
        crate::platform::raspberrypi::pl011_uart::handle_irq(irq);
    }

    if should_reschedule {
        crate::task::task_manager().lock(|tm| tm.schedule(irq));
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Serializes the CPU-state dumps of the fatal handlers.
static FATAL_LOCK: IRQSafeNullLock<()> = IRQSafeNullLock::new(());

fn fatal(source: &'static str, old_cpsr: u32, old_pc: u32, extra: Option<(&'static str, u32)>) -> ! {
    FATAL_LOCK.lock(|_| {
        let cpsr = Cpsr::from_raw(old_cpsr);
        println!();
        println!("kernel: \x1b[31m{}! halting.\x1b[0m", source);
        match extra {
            Some((name, value)) => {
                println!("        old {} old pc: {:#010x} {}: {:#010x}", cpsr, old_pc, name, value)
            }
            None => println!("        old {} old pc: {:#010x}", cpsr, old_pc),
        }
    });
    panic!("unrecoverable exception: {}", source);
}

//--------------------------------------------------------------------------------------------------
// Vector stub landing sites
//--------------------------------------------------------------------------------------------------

#[cfg(target_arch = "arm")]
mod handlers {
    use super::*;

    #[no_mangle]
    extern "C" fn reset_handler() -> ! {
        panic!("reset taken after boot. Goodbye.");
    }

    #[no_mangle]
    extern "C" fn undefined_instruction_handler(old_cpsr: u32, old_pc: u32, old_lr: u32) -> ! {
        fatal("Undefined instruction", old_cpsr, old_pc, Some(("old lr", old_lr)));
    }

    #[no_mangle]
    extern "C" fn software_interrupt_handler(id: u32, arg1: u32, arg2: u32, arg3: u32) -> u32 {
        crate::syscall::handle_syscall(id, arg1, arg2, arg3)
    }

    #[no_mangle]
    extern "C" fn prefetch_abort_handler(old_cpsr: u32, old_pc: u32) -> ! {
        fatal("Prefetch abort", old_cpsr, old_pc, None);
    }

    #[no_mangle]
    extern "C" fn data_abort_handler(old_cpsr: u32, old_pc: u32, fault_addr: u32) -> ! {
        fatal("Data abort", old_cpsr, old_pc, Some(("fault addr", fault_addr)));
    }

    #[no_mangle]
    extern "C" fn fast_irq_handler() -> ! {
        let cpsr = cpu::current_cpsr();
        fatal("Fast IRQ (unsupported)", cpsr.raw(), 0, None);
    }

    #[no_mangle]
    extern "C" fn irq_handler() {
        // The IRQ stub enters with IRQs masked by the hardware.
        let irq = unsafe { asynchronous::IrqDisabled::assume_masked() };
        handle_irq(&irq);
    }
}
