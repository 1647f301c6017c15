/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! BCM2836 legacy interrupt controller.
//!
//! The Pi has 72 IRQ lines shared with the GPU; documentation is
//! section 7.5 of the BCM2835 manual. This kernel only routes two of
//! them: system timer compare 1 (IRQ 1, in the first pending/enable
//! bank) and the UART (IRQ 57, second bank; its pending state is also
//! mirrored in basic-pending bit 19, which is the cheaper read).

use {
    crate::{cpu::MemoryBarrier, platform::mmio::MMIODerefWrapper},
    bitflags::bitflags,
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_structs,
        registers::{ReadOnly, WriteOnly},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x00 => PendingBasic: ReadOnly<u32>),
        (0x04 => Pending1: ReadOnly<u32>),
        (0x08 => Pending2: ReadOnly<u32>),
        (0x0c => FiqControl: WriteOnly<u32>),
        (0x10 => Enable1: WriteOnly<u32>),
        (0x14 => Enable2: WriteOnly<u32>),
        (0x18 => EnableBasic: WriteOnly<u32>),
        (0x1c => Disable1: WriteOnly<u32>),
        (0x20 => Disable2: WriteOnly<u32>),
        (0x24 => DisableBasic: WriteOnly<u32>),
        (0x28 => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;

/// System timer compare 1, bank 1.
const TIMER_IRQ_1: u32 = 1 << 1;
/// UART, bank 2 (IRQ 57).
const UART_IRQ_2: u32 = 1 << 25;
/// UART mirror in the basic pending register.
const UART_BASIC_PENDING: u32 = 1 << 19;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

bitflags! {
    /// The demultiplexer's view of what fired.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct PendingSources: u32 {
        const TIMER = 1 << 0;
        const UART = 1 << 1;
    }
}

/// The interrupt controller driver.
pub struct InterruptController {
    registers: Registers,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static INTERRUPT_CONTROLLER: InterruptController = unsafe {
    InterruptController::new(crate::platform::raspberrypi::memory_map::IRQ_CONTROLLER_BASE)
};

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the interrupt controller.
pub fn interrupt_controller() -> &'static InterruptController {
    &INTERRUPT_CONTROLLER
}

impl InterruptController {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// `base_addr` must be the controller's MMIO base.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            registers: unsafe { Registers::new(base_addr) },
        }
    }

    /// Route the system timer line through to the core.
    pub fn enable_timer(&self) {
        let _barrier = MemoryBarrier::new();
        self.registers.Enable1.set(TIMER_IRQ_1);
    }

    /// Route the UART line through to the core.
    pub fn enable_uart(&self) {
        let _barrier = MemoryBarrier::new();
        self.registers.Enable2.set(UART_IRQ_2);
    }

    pub fn timer_pending(&self) -> bool {
        MemoryBarrier::sync();
        self.registers.Pending1.get() & TIMER_IRQ_1 != 0
    }

    pub fn uart_pending(&self) -> bool {
        MemoryBarrier::sync();
        self.registers.PendingBasic.get() & UART_BASIC_PENDING != 0
    }

    /// Both pending checks in one read pass.
    pub fn pending(&self) -> PendingSources {
        let mut sources = PendingSources::empty();
        if self.timer_pending() {
            sources |= PendingSources::TIMER;
        }
        if self.uart_pending() {
            sources |= PendingSources::UART;
        }
        sources
    }
}
