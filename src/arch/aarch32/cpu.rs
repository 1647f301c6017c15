/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Processor state and low-level CPU operations.
//!
//! The CPSR layout follows the ARMv7-A reference manual, B1.3.3. Reads and
//! writes of the status registers are wrapped here so the rest of the
//! kernel never touches `asm!` directly.

use {
    core::fmt,
    tock_registers::{register_bitfields, LocalRegisterCopy},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    /// Current/saved program status register.
    pub PSR [
        /// Processor mode.
        M OFFSET(0) NUMBITS(5) [
            User = 0b10000,
            Fiq = 0b10001,
            Irq = 0b10010,
            Supervisor = 0b10011,
            Monitor = 0b10110,
            Abort = 0b10111,
            Hypervisor = 0b11010,
            Undefined = 0b11011,
            System = 0b11111
        ],
        /// Thumb execution bit.
        T OFFSET(5) NUMBITS(1) [],
        /// FIQ mask bit.
        F OFFSET(6) NUMBITS(1) [],
        /// IRQ mask bit.
        I OFFSET(7) NUMBITS(1) [],
        /// Asynchronous abort mask bit.
        A OFFSET(8) NUMBITS(1) [],
        /// Endianness (0: little, 1: big).
        E OFFSET(9) NUMBITS(1) []
    ]
}

/// Processor modes we care about when building task snapshots.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ProcessorMode {
    User,
    Fiq,
    Irq,
    Supervisor,
    Abort,
    Undefined,
    System,
    Unknown,
}

/// A CPSR value held in memory (a saved snapshot or a fresh template).
#[derive(Copy, Clone)]
pub struct Cpsr(LocalRegisterCopy<u32, PSR::Register>);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Cpsr {
    /// A clean status word for entering `mode`: ARM state, little-endian,
    /// IRQs and FIQs unmasked.
    pub fn for_mode(mode: ProcessorMode) -> Self {
        let m = match mode {
            ProcessorMode::User => PSR::M::User,
            ProcessorMode::Fiq => PSR::M::Fiq,
            ProcessorMode::Irq => PSR::M::Irq,
            ProcessorMode::Supervisor => PSR::M::Supervisor,
            ProcessorMode::Abort => PSR::M::Abort,
            ProcessorMode::Undefined => PSR::M::Undefined,
            ProcessorMode::System | ProcessorMode::Unknown => PSR::M::System,
        };
        let mut copy = LocalRegisterCopy::new(0);
        copy.modify(m);
        Self(copy)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(LocalRegisterCopy::new(raw))
    }

    pub fn raw(&self) -> u32 {
        self.0.get()
    }

    pub fn mode(&self) -> ProcessorMode {
        match self.0.read_as_enum(PSR::M) {
            Some(PSR::M::Value::User) => ProcessorMode::User,
            Some(PSR::M::Value::Fiq) => ProcessorMode::Fiq,
            Some(PSR::M::Value::Irq) => ProcessorMode::Irq,
            Some(PSR::M::Value::Supervisor) => ProcessorMode::Supervisor,
            Some(PSR::M::Value::Abort) => ProcessorMode::Abort,
            Some(PSR::M::Value::Undefined) => ProcessorMode::Undefined,
            Some(PSR::M::Value::System) => ProcessorMode::System,
            _ => ProcessorMode::Unknown,
        }
    }

    pub fn irqs_masked(&self) -> bool {
        self.0.is_set(PSR::I)
    }

    pub fn in_privileged_mode(&self) -> bool {
        !matches!(self.mode(), ProcessorMode::User | ProcessorMode::Unknown)
    }
}

impl fmt::Display for ProcessorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorMode::User => "user",
            ProcessorMode::Fiq => "fiq",
            ProcessorMode::Irq => "irq",
            ProcessorMode::Supervisor => "super",
            ProcessorMode::Abort => "abort",
            ProcessorMode::Undefined => "undef",
            ProcessorMode::System => "sys",
            ProcessorMode::Unknown => "?",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Cpsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPSR(mode: {}, if: {}{})",
            self.mode(),
            self.0.read(PSR::I),
            self.0.read(PSR::F),
        )
    }
}

/// The live CPSR.
#[inline(always)]
pub fn current_cpsr() -> Cpsr {
    #[cfg(target_arch = "arm")]
    {
        let raw: u32;
        unsafe { core::arch::asm!("mrs {}, cpsr", out(reg) raw, options(nomem, nostack)) };
        Cpsr::from_raw(raw)
    }
    #[cfg(not(target_arch = "arm"))]
    {
        let mut copy = LocalRegisterCopy::new(0);
        copy.modify(PSR::M::Supervisor + PSR::I::SET);
        Cpsr(copy)
    }
}

/// The banked SPSR of the current mode. Only meaningful inside an
/// exception handler.
#[inline(always)]
pub fn saved_psr() -> Cpsr {
    #[cfg(target_arch = "arm")]
    {
        let raw: u32;
        unsafe { core::arch::asm!("mrs {}, spsr", out(reg) raw, options(nomem, nostack)) };
        Cpsr::from_raw(raw)
    }
    #[cfg(not(target_arch = "arm"))]
    current_cpsr()
}

/// The current stack pointer, for diagnostics.
#[inline(always)]
pub fn current_sp() -> usize {
    #[cfg(target_arch = "arm")]
    {
        let sp: u32;
        unsafe { core::arch::asm!("mov {}, sp", out(reg) sp, options(nomem, nostack)) };
        sp as usize
    }
    #[cfg(not(target_arch = "arm"))]
    0
}

/// The current link register, for diagnostics.
#[inline(always)]
pub fn current_lr() -> usize {
    #[cfg(target_arch = "arm")]
    {
        let lr: u32;
        unsafe { core::arch::asm!("mov {}, lr", out(reg) lr, options(nomem, nostack)) };
        lr as usize
    }
    #[cfg(not(target_arch = "arm"))]
    0
}

/// Mask IRQs on this core.
///
/// # Safety
///
/// The caller owns the balancing `irq_unmask` (or returns through an
/// exception frame that restores the mask state).
#[inline(always)]
pub unsafe fn irq_mask() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("cpsid i", options(nomem, nostack))
    };
}

/// Unmask IRQs on this core.
///
/// # Safety
///
/// Must not be called while a critical section still relies on the mask.
#[inline(always)]
pub unsafe fn irq_unmask() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("cpsie i", options(nomem, nostack))
    };
}

/// Data memory barrier.
#[inline(always)]
pub fn dmb() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            unsafe { core::arch::asm!("dmb", options(nostack, preserves_flags)) };
        } else {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Data synchronization barrier.
#[inline(always)]
pub fn dsb() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            unsafe { core::arch::asm!("dsb", options(nostack, preserves_flags)) };
        } else {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Instruction synchronization barrier.
#[inline(always)]
pub fn isb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("isb", options(nostack, preserves_flags))
    };
}

#[inline(always)]
pub fn nop() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("nop", options(nomem, nostack))
    };
}

#[inline(always)]
pub fn wfe() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("wfe", options(nomem, nostack))
    };
}

/// Burn roughly `count` cycles. The GPIO pull-up sequence needs this.
#[inline(always)]
pub fn spin_for_cycles(count: usize) {
    for _ in 0..count {
        nop();
    }
}

/// Park the core forever, with IRQs masked.
pub fn endless_sleep() -> ! {
    unsafe { irq_mask() };
    loop {
        wfe();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

/// Scoped peripheral access barrier.
///
/// The BCM2835 manual (section 1.3) requires memory barriers between
/// accesses to different peripherals; issuing one on entry and one on exit
/// of every access window satisfies that for all interleavings.
pub struct MemoryBarrier;

impl MemoryBarrier {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        dmb();
        Self
    }

    /// A single standalone barrier.
    pub fn sync() {
        dmb();
    }
}

impl Drop for MemoryBarrier {
    fn drop(&mut self) {
        dmb();
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpsr_mode_round_trip() {
        let user = Cpsr::for_mode(ProcessorMode::User);
        assert_eq!(user.mode(), ProcessorMode::User);
        assert!(!user.in_privileged_mode());
        assert!(!user.irqs_masked());

        let svc = Cpsr::for_mode(ProcessorMode::Supervisor);
        assert_eq!(svc.mode(), ProcessorMode::Supervisor);
        assert!(svc.in_privileged_mode());
    }

    #[test]
    fn cpsr_mode_bits_match_the_manual() {
        assert_eq!(Cpsr::for_mode(ProcessorMode::User).raw(), 0b10000);
        assert_eq!(Cpsr::for_mode(ProcessorMode::Supervisor).raw(), 0b10011);
    }
}
