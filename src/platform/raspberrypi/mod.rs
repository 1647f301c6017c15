/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Raspberry Pi 2/3 devices and memory map.

pub mod interrupt_controller;
pub mod mailbox;
pub mod pl011_uart;
pub mod system_timer;

/// The physical memory map the kernel is built around.
pub mod memory_map {
    /// End of the general RAM window the allocators manage (1 GiB).
    pub const MEMORY_END: usize = 0x4000_0000;

    /// Device MMIO window, identity-mapped.
    pub const DEVICES_START: usize = 0x3F00_0000;
    pub const DEVICES_END: usize = 0x4000_0000;

    /// Kernel heap window. Stacks are carved down from the end bound;
    /// they stop well short of the device window.
    pub const HEAP_START: usize = 0x0044_0000;
    pub const HEAP_END: usize = 0x3EE0_0000;

    /// Peripheral register bases.
    pub const SYSTEM_TIMER_BASE: usize = 0x3F00_3000;
    pub const IRQ_CONTROLLER_BASE: usize = 0x3F00_B200;
    pub const MAILBOX_BASE: usize = 0x3F00_B880;
    pub const GPIO_BASE: usize = 0x3F20_0000;
    pub const UART_BASE: usize = 0x3F20_1000;
}
