/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Platform support. Only the Raspberry Pi 2/3 (BCM2836/7, peripherals
//! at 0x3F00_0000) is implemented.

pub mod mmio;
pub mod raspberrypi;
