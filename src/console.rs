/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! System console.

use crate::synchronization::{interface::ReadWriteEx, InitStateLock};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Console interfaces.
pub mod interface {
    use core::fmt;

    /// Console write functions.
    pub trait Write {
        /// Write a single character.
        fn write_char(&self, c: char);

        /// Write a string slice.
        fn write_string(&self, string: &str);

        /// Write a Rust format string.
        fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result;

        /// Block until the last buffered character has been put on the
        /// wire.
        fn flush(&self);
    }

    /// Console read functions. Polling; the steady-state read path goes
    /// through the UART request machinery instead.
    pub trait Read {
        /// Read a single character, blocking.
        fn read_char(&self) -> char {
            ' '
        }

        /// Discard any buffered input.
        fn clear_rx(&self);
    }

    /// Trait alias for a full console.
    pub trait All: Write + Read {}
}

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// A console that swallows everything. Active until the UART driver
/// registers itself during boot.
struct NullConsole;

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static NULL_CONSOLE: NullConsole = NullConsole;

static CUR_CONSOLE: InitStateLock<&'static (dyn interface::All + Sync)> =
    InitStateLock::new(&NULL_CONSOLE);

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl interface::Write for NullConsole {
    fn write_char(&self, _c: char) {}
    fn write_string(&self, _string: &str) {}
    fn write_fmt(&self, _args: core::fmt::Arguments) -> core::fmt::Result {
        Ok(())
    }
    fn flush(&self) {}
}

impl interface::Read for NullConsole {
    fn clear_rx(&self) {}
}

impl interface::All for NullConsole {}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Register a new console. The boot path calls this once the UART is up.
pub fn register_console(new_console: &'static (dyn interface::All + Sync)) {
    CUR_CONSOLE.write(|con| *con = new_console);
}

/// Return a reference to the currently registered console.
///
/// This is the global console used by all printing macros.
pub fn console() -> &'static (dyn interface::All + Sync) {
    CUR_CONSOLE.read(|con| *con)
}
