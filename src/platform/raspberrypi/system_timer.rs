/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! BCM2835 system timer.
//!
//! One free-running 1 MHz counter, four compare registers. The GPU owns
//! compares 0 and 2; this driver arms compare 1 at one jiffy and keeps
//! compare 3 at a much longer period as a fallback.
//!
//! The fallback exists because the compare has to be re-armed relative
//! to the counter on every match. Under emulation, a window with IRQs
//! masked can outlast a whole jiffy; a naive `compare = now + tick` then
//! lands behind the counter and no IRQ fires until the 32-bit counter
//! wraps, which reads as a hang. When compare 3 has also fired, the
//! missed jiffies are credited wholesale and the compare is advanced in
//! tick steps until it leads the counter again.

use {
    crate::{
        cpu::MemoryBarrier,
        exception::asynchronous::IrqDisabled,
        platform::mmio::MMIODerefWrapper,
        time,
        warn,
    },
    tock_registers::{
        interfaces::{ReadWriteable, Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadOnly, ReadWrite},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    /// Control/status. Match bits are write-1-to-clear.
    CS [
        M0 OFFSET(0) NUMBITS(1) [],
        M1 OFFSET(1) NUMBITS(1) [],
        M2 OFFSET(2) NUMBITS(1) [],
        M3 OFFSET(3) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x00 => ControlStatus: ReadWrite<u32, CS::Register>),
        (0x04 => CounterLow: ReadOnly<u32>),
        (0x08 => CounterHigh: ReadOnly<u32>),
        (0x0c => Compare0: ReadWrite<u32>),
        (0x10 => Compare1: ReadWrite<u32>),
        (0x14 => Compare2: ReadWrite<u32>),
        (0x18 => Compare3: ReadWrite<u32>),
        (0x1c => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;

/// The counter runs at 1 MHz.
const TIMER_HZ: u32 = 1_000_000;

/// Counter steps per jiffy.
const TICK: u32 = TIMER_HZ >> time::SYS_HZ_BITS;

/// The fallback compare covers this many jiffies.
const FALLBACK_SCALER_BITS: u32 = 5;
const FALLBACK_SCALER: u32 = 1 << FALLBACK_SCALER_BITS;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// The system timer driver.
pub struct SystemTimer {
    registers: Registers,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static SYSTEM_TIMER: SystemTimer =
    unsafe { SystemTimer::new(crate::platform::raspberrypi::memory_map::SYSTEM_TIMER_BASE) };

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the system timer.
pub fn system_timer() -> &'static SystemTimer {
    &SYSTEM_TIMER
}

impl SystemTimer {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// `base_addr` must be the timer's MMIO base.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            registers: unsafe { Registers::new(base_addr) },
        }
    }

    /// Arm compare 1 one tick out and the fallback compare behind it.
    pub fn init(&self) {
        let _barrier = MemoryBarrier::new();

        let now = self.registers.CounterLow.get();
        self.registers.Compare1.set(now.wrapping_add(TICK));
        self.registers
            .Compare3
            .set(now.wrapping_add(TICK << FALLBACK_SCALER_BITS));

        self.registers.ControlStatus.modify(CS::M1::SET);
    }

    /// Whether compare 1 has matched since the last clear.
    pub fn matched(&self) -> bool {
        MemoryBarrier::sync();
        self.registers.ControlStatus.is_set(CS::M1)
    }

    /// Timer IRQ service: credit jiffies, re-arm, clear the match.
    pub fn handle_irq(&self, _irq: &IrqDisabled) {
        let _barrier = MemoryBarrier::new();

        let now = self.registers.CounterLow.get();

        // Fallback fired too: the masked window outlasted the whole
        // fallback period, credit it wholesale.
        let jiffies = if self.registers.Compare3.get() < now {
            warn!("kernel: fallback timer match encountered!");
            FALLBACK_SCALER
        } else {
            1
        };

        let compare = advance_past(self.registers.Compare1.get(), now, TICK);
        self.registers.Compare1.set(compare);
        self.registers
            .Compare3
            .set(now.wrapping_add(TICK << FALLBACK_SCALER_BITS));

        self.registers.ControlStatus.modify(CS::M1::SET);

        time::increase_jiffies(jiffies);
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Step `compare` forward in `tick` increments until it leads `now`.
/// Catches up on missed ticks without starving the next one; arithmetic
/// wraps with the 32-bit counter.
fn advance_past(mut compare: u32, now: u32, tick: u32) -> u32 {
    while compare < now {
        compare = compare.wrapping_add(tick);
    }
    compare
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_catches_up_in_tick_steps() {
        // Three whole ticks were missed; the compare ends up leading.
        let compare = advance_past(1_000, 400_000, TICK);
        assert!(compare >= 400_000);
        assert_eq!((compare - 1_000) % TICK, 0);
    }

    #[test]
    fn advance_is_a_no_op_when_leading() {
        assert_eq!(advance_past(500_000, 400_000, TICK), 500_000);
    }

    #[test]
    fn advance_handles_the_counter_wrap() {
        // A compare that wrapped past zero while the counter is near the
        // top: the loop must terminate by wrapping around again.
        let compare = advance_past(100, u32::MAX - TICK, TICK);
        assert!(compare >= u32::MAX - TICK);
    }

    #[test]
    fn one_jiffy_per_ordinary_match() {
        // The fallback credit is the scaler, the ordinary credit is one;
        // SYS_HZ relates them by the scaler bits.
        assert_eq!(FALLBACK_SCALER, 32);
        assert_eq!(TICK * time::SYS_HZ, TIMER_HZ);
    }
}
