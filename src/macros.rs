/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

/// Print to the kernel console, without a newline.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::macros::_print(format_args!($($arg)*)));
}

/// Print to the kernel console, with a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($string:expr) => ({
        $crate::macros::_print(format_args!(concat!($string, "\n")));
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::macros::_print(format_args!(concat!($format_string, "\n"), $($arg)*));
    })
}

/// Prints info text with an uptime stamp, with a newline.
#[macro_export]
macro_rules! info {
    ($string:expr) => ({
        let (secs, millis) = $crate::time::uptime_parts();

        $crate::macros::_print(format_args!(
            concat!("[  {:>3}.{:03}] ", $string, "\n"),
            secs,
            millis,
        ));
    });
    ($format_string:expr, $($arg:tt)*) => ({
        let (secs, millis) = $crate::time::uptime_parts();

        $crate::macros::_print(format_args!(
            concat!("[  {:>3}.{:03}] ", $format_string, "\n"),
            secs,
            millis,
            $($arg)*
        ));
    })
}

/// Prints warning text with an uptime stamp, with a newline.
#[macro_export]
macro_rules! warn {
    ($string:expr) => ({
        let (secs, millis) = $crate::time::uptime_parts();

        $crate::macros::_print(format_args!(
            concat!("[W {:>3}.{:03}] ", $string, "\n"),
            secs,
            millis,
        ));
    });
    ($format_string:expr, $($arg:tt)*) => ({
        let (secs, millis) = $crate::time::uptime_parts();

        $crate::macros::_print(format_args!(
            concat!("[W {:>3}.{:03}] ", $format_string, "\n"),
            secs,
            millis,
            $($arg)*
        ));
    })
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use crate::console::{console, interface::Write};

    // The console write path cannot fail; NullConsole and the UART both
    // return Ok unconditionally.
    console().write_fmt(args).ok();
}
