/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Userspace syscall wrappers: `{id, arg1, arg2, arg3}` in `r0..r3`,
//! result back in `r0`.

use {crate::syscall::Syscall, core::ffi::CStr};

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

#[inline(always)]
fn syscall3(id: Syscall, arg1: u32, arg2: u32, arg3: u32) -> u32 {
    #[cfg(target_arch = "arm")]
    {
        let result: u32;
        unsafe {
            core::arch::asm!(
                "svc #0",
                inlateout("r0") id as u32 => result,
                in("r1") arg1,
                in("r2") arg2,
                in("r3") arg3,
                options(nostack),
            )
        };
        result
    }
    #[cfg(not(target_arch = "arm"))]
    {
        let _ = (id, arg1, arg2, arg3);
        0
    }
}

fn syscall1(id: Syscall, arg1: u32) -> u32 {
    syscall3(id, arg1, 0, 0)
}

fn syscall0(id: Syscall) -> u32 {
    syscall3(id, 0, 0, 0)
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

pub fn yield_now() {
    syscall0(Syscall::Yield);
}

pub fn sleep(secs: u32) {
    syscall1(Syscall::Sleep, secs);
}

/// Open a device path. Mode: 0 read, 1 write, 2 read/write.
pub fn open(path: &CStr, mode: u32) -> i32 {
    syscall3(Syscall::Open, path.as_ptr() as usize as u32, mode, 0) as i32
}

pub fn read(fd: i32, buf: &mut [u8]) -> isize {
    syscall3(
        Syscall::Read,
        fd as u32,
        buf.as_mut_ptr() as usize as u32,
        buf.len() as u32,
    ) as i32 as isize
}

pub fn write(fd: i32, buf: &[u8]) -> isize {
    syscall3(
        Syscall::Write,
        fd as u32,
        buf.as_ptr() as usize as u32,
        buf.len() as u32,
    ) as i32 as isize
}

pub fn close(fd: i32) -> i32 {
    syscall1(Syscall::Close, fd as u32) as i32
}

pub fn dup(fd: i32) -> i32 {
    syscall1(Syscall::Dup, fd as u32) as i32
}

/// Grow the task heap; returns the new break, or 0 when exhausted.
pub fn sbrk(increase: usize) -> usize {
    syscall1(Syscall::Sbrk, increase as u32) as usize
}

/// Jiffies since boot.
pub fn uptime() -> u32 {
    syscall0(Syscall::Uptime)
}

/// Jiffies this task has spent on the CPU.
pub fn cputime() -> u32 {
    syscall0(Syscall::CpuTime)
}

pub fn exit(code: i32) -> ! {
    syscall1(Syscall::Exit, code as u32);
    unreachable!("exit returned")
}
