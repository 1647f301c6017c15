/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Saved task context and the context-switch primitive.

use {
    super::cpu::{Cpsr, ProcessorMode},
    crate::exception::asynchronous::IrqDisabled,
    static_assertions::const_assert_eq,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// A task's saved CPU state, in the exact layout `context_switch.S`
/// expects. The CPSR and PC fields describe where the task resumes
/// (either a fresh entry point or the return site of its last switch).
#[repr(C)]
#[derive(Clone)]
pub struct Registers {
    pub cpsr: u32,
    pub user_sp: u32,
    pub user_lr: u32,
    pub kernel_sp: u32,
    pub kernel_lr: u32,
    pub gp: [u32; 13], // r0-r12
    pub pc: u32,
}

const_assert_eq!(core::mem::size_of::<Registers>(), 19 * 4);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Registers {
    /// Snapshot for a new user task: separate user and kernel stacks,
    /// entry in user mode, both link registers parked on the halt
    /// trampoline so a plain return exits the task.
    pub fn new_user(user_sp: u32, kernel_sp: u32, pc: u32) -> Self {
        Self::new(Cpsr::for_mode(ProcessorMode::User), user_sp, kernel_sp, pc)
    }

    /// Snapshot for a new kernel task: one stack for both roles, entry in
    /// supervisor mode.
    pub fn new_kernel(kernel_sp: u32, pc: u32) -> Self {
        Self::new(
            Cpsr::for_mode(ProcessorMode::Supervisor),
            kernel_sp,
            kernel_sp,
            pc,
        )
    }

    fn new(cpsr: Cpsr, user_sp: u32, kernel_sp: u32, pc: u32) -> Self {
        let halt = halt_addr();
        Self {
            cpsr: cpsr.raw(),
            user_sp,
            user_lr: halt,
            kernel_sp,
            kernel_lr: halt,
            gp: [0; 13],
            pc,
        }
    }

    /// Kernel snapshots are the ones whose two stack roles coincide.
    pub fn is_kernel_registers(&self) -> bool {
        self.user_sp == self.kernel_sp
    }
}

/// Where a task lands when its entry function returns.
pub fn halt_addr() -> u32 {
    #[cfg(target_arch = "arm")]
    {
        extern "C" {
            fn _task_halt();
        }
        _task_halt as *const () as u32
    }
    #[cfg(not(target_arch = "arm"))]
    0
}

/// Switch the CPU from `save` to `load`.
///
/// Saves the callee-visible state of the current task into `save` (pass
/// `None` when the outgoing context is being discarded, e.g. on first
/// dispatch or task exit) and resumes `load` where its snapshot points.
/// Returns when something, possibly much later, switches back. The
/// `*_is_kernel` flags tell the primitive whether the banked user SP/LR
/// take part on each side; a kernel snapshot keeps its two stack fields
/// identical instead.
///
/// # Safety
///
/// `load` must be a fully initialized snapshot whose stacks are live.
/// The `IrqDisabled` witness proves the caller masked IRQs; the restored
/// CPSR decides the mask state on the other side.
pub unsafe fn task_switch(
    save: Option<&mut Registers>,
    save_is_kernel: bool,
    load: &Registers,
    load_is_kernel: bool,
    _irq: &IrqDisabled,
) {
    let save_ptr = save.map_or(core::ptr::null_mut(), |r| r as *mut Registers);

    #[cfg(target_arch = "arm")]
    unsafe {
        _task_switch(
            save_ptr,
            save_is_kernel as u32,
            load as *const Registers,
            load_is_kernel as u32,
        );
    }
    #[cfg(not(target_arch = "arm"))]
    {
        let _ = (save_ptr, save_is_kernel, load, load_is_kernel);
        unreachable!("task_switch is only reachable on the ARM target");
    }
}

#[cfg(target_arch = "arm")]
extern "C" {
    fn _task_switch(save: *mut Registers, save_is_kernel: u32, load: *const Registers, load_is_kernel: u32);
}

#[cfg(target_arch = "arm")]
core::arch::global_asm!(include_str!("context_switch.S"));

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_kernel_snapshots_differ_in_stack_roles() {
        let user = Registers::new_user(0x0020_0000, 0x0010_0000, 0x9000);
        assert!(!user.is_kernel_registers());
        assert_eq!(user.pc, 0x9000);
        assert!(!Cpsr::from_raw(user.cpsr).in_privileged_mode());

        let kernel = Registers::new_kernel(0x0010_0000, 0x9000);
        assert!(kernel.is_kernel_registers());
        assert!(Cpsr::from_raw(kernel.cpsr).in_privileged_mode());
    }
}
