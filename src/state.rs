/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Kernel lifecycle state.

use core::sync::atomic::{AtomicU8, Ordering};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

const STATE_INIT: u8 = 0;
const STATE_SCHEDULING: u8 = 1;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Tracks the single transition the kernel makes: single-threaded init,
/// then scheduling with interrupts live.
pub struct StateManager(AtomicU8);

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static STATE_MANAGER: StateManager = StateManager::new();

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the global StateManager.
pub fn state_manager() -> &'static StateManager {
    &STATE_MANAGER
}

impl StateManager {
    pub const fn new() -> Self {
        Self(AtomicU8::new(STATE_INIT))
    }

    /// Whether the kernel is still in the init phase.
    pub fn is_init(&self) -> bool {
        self.0.load(Ordering::Acquire) == STATE_INIT
    }

    /// Transition from Init to Scheduling.
    pub fn transition_to_scheduling(&self) {
        if self
            .0
            .compare_exchange(
                STATE_INIT,
                STATE_SCHEDULING,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("transition to scheduling state done twice");
        }
    }
}
