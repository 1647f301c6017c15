/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Asynchronous exception (IRQ) masking.

use {
    crate::arch::aarch32::cpu,
    core::marker::PhantomData,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Proof that IRQs are masked on the current core.
///
/// Functions that must not be interrupted (the context switch, the IRQ
/// demux, the scheduler) take one of these. The only safe way to obtain
/// one is [`exec_with_irq_masked`]; exception entry paths use
/// [`IrqDisabled::assume_masked`] because the hardware already masked for
/// them. Not `Send`: the proof is only valid on the core that masked.
pub struct IrqDisabled {
    _not_send: PhantomData<*mut ()>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl IrqDisabled {
    /// Assert that IRQs are already masked.
    ///
    /// # Safety
    ///
    /// Only valid where the hardware guarantees the mask, i.e. on an
    /// exception entry path.
    pub unsafe fn assume_masked() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

/// Whether IRQs are masked on this core.
pub fn is_local_irq_masked() -> bool {
    cpu::current_cpsr().irqs_masked()
}

/// Run `f` with IRQs masked, restoring the previous mask state after.
///
/// Nesting is fine; the outermost call is the one that unmasks.
pub fn exec_with_irq_masked<R>(f: impl FnOnce(&IrqDisabled) -> R) -> R {
    let was_masked = is_local_irq_masked();

    unsafe { cpu::irq_mask() };
    let token = unsafe { IrqDisabled::assume_masked() };

    let result = f(&token);

    if !was_masked {
        unsafe { cpu::irq_unmask() };
    }

    result
}

/// Unmask IRQs for the first time after boot.
///
/// # Safety
///
/// The vector table and all interrupt-driven subsystems must be live.
pub unsafe fn local_irq_unmask() {
    unsafe { cpu::irq_unmask() };
}
