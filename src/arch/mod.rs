/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Architecture-specific code.
//!
//! Only AArch32 (ARMv7-A) is implemented. The module builds on every
//! architecture so the portable kernel logic can be unit-tested on the
//! host; the instruction-level pieces inside are gated on `target_arch`.

pub mod aarch32;
