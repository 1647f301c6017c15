/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! The interactive shell task.

use {
    super::syscalls,
    crate::time::SYS_HZ_BITS,
    core::fmt::{self, Write as FmtWrite},
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

const LINE_CAPACITY: usize = 128;

/// fmt::Write over a stack buffer, flushed with a write syscall.
struct LineBuffer {
    bytes: [u8; 256],
    used: usize,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Shell entry point. Installed as the `shell` task at boot.
pub extern "C" fn shell_main() -> ! {
    let console_fd = syscalls::open(c"/dev/uart0", 2);
    if console_fd < 0 {
        syscalls::exit(console_fd);
    }

    shell_write(console_fd, "Use 'help' for a list of commands to run.\n");

    let mut line = [0_u8; LINE_CAPACITY];
    loop {
        shell_write(console_fd, "# ");

        let read = syscalls::read(console_fd, &mut line);
        if read < 0 {
            break;
        }
        let command = core::str::from_utf8(&line[..read as usize]).unwrap_or("");

        match command {
            "" => {}
            "exit" => break,
            "help" => {
                shell_write(
                    console_fd,
                    "The following commands are available to you:\n\
                     \thelp uptime memstat sleep yield exit\n",
                );
            }
            "uptime" => builtin_uptime(console_fd),
            "memstat" => builtin_memstat(console_fd),
            "sleep" => {
                shell_write(console_fd, "Sleeping for 2 seconds.\n");
                syscalls::sleep(2);
            }
            "yield" => syscalls::yield_now(),
            _ => shell_write(console_fd, "Unknown command. Try 'help'.\n"),
        }
    }

    syscalls::exit(0)
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

fn builtin_uptime(fd: i32) {
    let uptime_jiffies = syscalls::uptime().max(1);
    let cputime_jiffies = syscalls::cputime();
    let uptime_seconds = uptime_jiffies >> SYS_HZ_BITS;
    let cpu_usage = cputime_jiffies * 100 / uptime_jiffies;

    let mut out = LineBuffer::new();
    writeln!(
        out,
        "up {}s, usage: {}% ({} / {} jiffies)",
        uptime_seconds, cpu_usage, cputime_jiffies, uptime_jiffies
    )
    .ok();
    out.flush_to(fd);
}

fn builtin_memstat(fd: i32) {
    // The task heap only grows; show the break against the region.
    let break_before = syscalls::sbrk(0);
    let probe = syscalls::sbrk(64);

    let mut out = LineBuffer::new();
    writeln!(out, "task heap break: {:#010x}", break_before).ok();
    if probe == 0 {
        writeln!(out, "task heap exhausted").ok();
    }
    out.flush_to(fd);
}

fn shell_write(fd: i32, text: &str) {
    syscalls::write(fd, text.as_bytes());
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            bytes: [0; 256],
            used: 0,
        }
    }

    fn flush_to(&self, fd: i32) {
        syscalls::write(fd, &self.bytes[..self.used]);
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.bytes.len() - self.used;
        let take = s.len().min(room);
        self.bytes[self.used..self.used + take].copy_from_slice(&s.as_bytes()[..take]);
        self.used += take;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_truncates_instead_of_overflowing() {
        let mut buffer = LineBuffer::new();
        for _ in 0..40 {
            write!(buffer, "0123456789").ok();
        }
        assert_eq!(buffer.used, 256);
    }
}
