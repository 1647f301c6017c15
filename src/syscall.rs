/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Syscall decode and dispatch.
//!
//! The SWI stub hands over `{id, arg1, arg2, arg3}` straight from
//! `r0..r3` and returns whatever this module produces in `r0`. Calls
//! that can fail return a negated POSIX errno in the result word;
//! unknown ids log and return 0.

use {
    crate::{
        exception::asynchronous::exec_with_irq_masked,
        fs::FileMode,
        println,
        task::{self, task_manager, with_running_task},
        time::jiffies,
    },
    core::ffi::CStr,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// POSIX errno values the kernel hands back.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
}

/// The syscall numbers. Userspace mirrors these in its wrappers.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum Syscall {
    Yield = 0,
    Sleep = 1,
    Open = 2,
    Read = 3,
    Write = 4,
    Close = 5,
    Dup = 6,
    Sbrk = 7,
    Uptime = 8,
    CpuTime = 9,
    Exit = 10,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Syscall {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Syscall::Yield),
            1 => Some(Syscall::Sleep),
            2 => Some(Syscall::Open),
            3 => Some(Syscall::Read),
            4 => Some(Syscall::Write),
            5 => Some(Syscall::Close),
            6 => Some(Syscall::Dup),
            7 => Some(Syscall::Sbrk),
            8 => Some(Syscall::Uptime),
            9 => Some(Syscall::CpuTime),
            10 => Some(Syscall::Exit),
            _ => None,
        }
    }
}

/// Decode and run one syscall. The result is the word the SWI stub puts
/// back in `r0`.
pub fn handle_syscall(id: u32, arg1: u32, arg2: u32, arg3: u32) -> u32 {
    let Some(call) = Syscall::from_raw(id) else {
        println!("kernel: unknown syscall number {}", id);
        return 0;
    };

    match call {
        Syscall::Yield => {
            exec_with_irq_masked(|irq| task_manager().lock(|tm| tm.schedule(irq)));
            0
        }

        Syscall::Sleep => {
            task::sleep(arg1);
            0
        }

        Syscall::Open => {
            let Some(mode) = FileMode::from_raw(arg2) else {
                return (-errno::EINVAL) as u32;
            };
            let Some(path) = user_cstr(arg1) else {
                return (-errno::EINVAL) as u32;
            };
            with_running_task(|task| task.open(path, mode)) as u32
        }

        Syscall::Read => with_running_task(|task| {
            task.read(arg1 as i32, arg2 as usize as *mut u8, arg3 as usize)
        }) as u32,

        Syscall::Write => with_running_task(|task| {
            task.write(arg1 as i32, arg2 as usize as *const u8, arg3 as usize)
        }) as u32,

        Syscall::Close => with_running_task(|task| task.close(arg1 as i32)) as u32,

        Syscall::Dup => with_running_task(|task| task.dup(arg1 as i32)) as u32,

        Syscall::Sbrk => with_running_task(|task| task.sbrk(arg1 as usize)) as u32,

        Syscall::Uptime => jiffies(),

        Syscall::CpuTime => task_manager().lock(|tm| tm.running_task().cputime(true)),

        Syscall::Exit => {
            exec_with_irq_masked(|irq| {
                task_manager().lock(|tm| tm.exit_running_task(arg1 as i32, irq))
            })
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Borrow a NUL-terminated user string. The tasks share the kernel
/// address space, so the pointer is directly usable; a non-UTF-8 path
/// simply fails the lookup.
fn user_cstr(addr: u32) -> Option<&'static str> {
    if addr == 0 {
        return None;
    }
    let cstr = unsafe { CStr::from_ptr(addr as usize as *const core::ffi::c_char) };
    cstr.to_str().ok()
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_documented_code_decodes() {
        let table = [
            (0, Syscall::Yield),
            (1, Syscall::Sleep),
            (2, Syscall::Open),
            (3, Syscall::Read),
            (4, Syscall::Write),
            (5, Syscall::Close),
            (6, Syscall::Dup),
            (7, Syscall::Sbrk),
            (8, Syscall::Uptime),
            (9, Syscall::CpuTime),
            (10, Syscall::Exit),
        ];
        for (raw, call) in table {
            assert_eq!(Syscall::from_raw(raw), Some(call));
        }
        assert_eq!(Syscall::from_raw(11), None);
        assert_eq!(Syscall::from_raw(u32::MAX), None);
    }

    #[test]
    fn unknown_codes_return_zero() {
        // The documented anti-pattern: log and return 0, no errno.
        assert_eq!(handle_syscall(999, 1, 2, 3), 0);
    }

    #[test]
    fn uptime_reports_jiffies() {
        let before = jiffies();
        let reported = handle_syscall(Syscall::Uptime as u32, 0, 0, 0);
        assert!(reported >= before);
    }

    #[test]
    fn errno_values_follow_posix() {
        assert_eq!(errno::ENOENT, 2);
        assert_eq!(errno::EBADF, 9);
        assert_eq!(errno::EINVAL, 22);
        assert_eq!(errno::EFBIG, 27);
    }
}
