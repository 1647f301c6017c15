/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Files and descriptors.
//!
//! There is no filesystem, only a fixed name table of pseudo-devices:
//! `/dev/null`, `/dev/zero`, `/dev/uart0` and `/dev/display`. The
//! process-wide [`FileTable`] owns refcounted descriptions; each task's
//! [`FileDescriptorTable`] is a dense array of nullable references into
//! it. Devices are a closed enum, so descriptor IO needs no trait
//! objects and no allocation.

use {
    crate::{
        platform::raspberrypi::pl011_uart,
        synchronization::{interface::Mutex, IRQSafeNullLock},
        syscall::errno::{EBADF, EINVAL, ENOENT},
    },
    alloc::vec::Vec,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Open mode, decoded from the syscall mode word.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FileMode {
    Read,
    Write,
    ReadWrite,
}

/// The recognized devices. `Display` accepts and drops writes at this
/// layer; the framebuffer proper sits behind the mailbox.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum File {
    Null,
    Zero,
    Uart,
    Display,
}

/// A refcounted open file: the device plus the mode it was opened with.
pub struct FileDescription {
    file: File,
    mode: FileMode,
    ref_count: u32,
}

/// Process-wide table owning the descriptions.
pub struct FileTable {
    descriptions: Vec<Option<FileDescription>>,
}

/// Per-task descriptor table: slot indices into the file table.
pub struct FileDescriptorTable {
    descriptors: Vec<Option<usize>>,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static FILE_TABLE: IRQSafeNullLock<FileTable> = IRQSafeNullLock::new(FileTable::new());

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl FileMode {
    /// The syscall encoding: 0 read, 1 write, 2 read/write.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FileMode::Read),
            1 => Some(FileMode::Write),
            2 => Some(FileMode::ReadWrite),
            _ => None,
        }
    }

    pub fn allows_read(&self) -> bool {
        matches!(self, FileMode::Read | FileMode::ReadWrite)
    }

    pub fn allows_write(&self) -> bool {
        matches!(self, FileMode::Write | FileMode::ReadWrite)
    }
}

impl File {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/dev/null" => Some(File::Null),
            "/dev/zero" => Some(File::Zero),
            "/dev/uart0" => Some(File::Uart),
            "/dev/display" => Some(File::Display),
            _ => None,
        }
    }

    fn read(&self, buf: &mut [u8]) -> isize {
        match self {
            File::Null => 0,
            File::Zero => {
                buf.fill(0);
                buf.len() as isize
            }
            File::Uart => pl011_uart::read(buf) as isize,
            File::Display => 0,
        }
    }

    fn write(&self, buf: &[u8]) -> isize {
        match self {
            File::Null | File::Zero | File::Display => buf.len() as isize,
            File::Uart => pl011_uart::write(buf) as isize,
        }
    }
}

/// Descriptor-level read: mode and size enforcement, then the device.
/// Runs outside the file-table lock; the UART path blocks.
pub fn read_through(file: File, mode: FileMode, buf: &mut [u8]) -> isize {
    if !mode.allows_read() {
        return -EINVAL as isize;
    }
    if buf.len() > isize::MAX as usize {
        return -EINVAL as isize;
    }
    file.read(buf)
}

/// Descriptor-level write, symmetric to [`read_through`].
pub fn write_through(file: File, mode: FileMode, buf: &[u8]) -> isize {
    if !mode.allows_write() {
        return -EINVAL as isize;
    }
    if buf.len() > isize::MAX as usize {
        return -EINVAL as isize;
    }
    file.write(buf)
}

impl FileTable {
    pub const fn new() -> Self {
        Self {
            descriptions: Vec::new(),
        }
    }

    /// Open a description for `path`, refcount 1. Returns the slot.
    fn open(&mut self, path: &str, mode: FileMode) -> Option<usize> {
        let file = File::from_path(path)?;
        let description = FileDescription {
            file,
            mode,
            ref_count: 1,
        };

        for (slot, entry) in self.descriptions.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(description);
                return Some(slot);
            }
        }
        self.descriptions.push(Some(description));
        Some(self.descriptions.len() - 1)
    }

    fn add_ref(&mut self, slot: usize) {
        if let Some(Some(description)) = self.descriptions.get_mut(slot) {
            description.ref_count += 1;
        }
    }

    /// Drop one reference; the slot is vacated at zero.
    fn release(&mut self, slot: usize) {
        let Some(Some(description)) = self.descriptions.get_mut(slot) else {
            return;
        };
        description.ref_count -= 1;
        if description.ref_count == 0 {
            self.descriptions[slot] = None;
        }
    }

    fn get(&self, slot: usize) -> Option<(File, FileMode)> {
        self.descriptions
            .get(slot)?
            .as_ref()
            .map(|d| (d.file, d.mode))
    }

    /// Live descriptions, for diagnostics and tests.
    pub fn live_count(&self) -> usize {
        self.descriptions.iter().flatten().count()
    }
}

/// Return a reference to the global file table.
pub fn file_table() -> &'static IRQSafeNullLock<FileTable> {
    &FILE_TABLE
}

impl FileDescriptorTable {
    pub const fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Open `path` and bind it to the lowest free descriptor. Negative
    /// errno on failure.
    pub fn open(&mut self, path: &str, mode: FileMode) -> i32 {
        let Some(slot) = FILE_TABLE.lock(|table| table.open(path, mode)) else {
            return -ENOENT;
        };

        match self.insert(slot) {
            Some(fd) => fd,
            None => {
                FILE_TABLE.lock(|table| table.release(slot));
                -EBADF
            }
        }
    }

    /// The device and mode behind `fd`, copied out so the caller can do
    /// IO without holding any table borrow across a blocking transfer.
    pub fn try_get(&self, fd: i32) -> Option<(File, FileMode)> {
        let slot = self.slot_of(fd)?;
        FILE_TABLE.lock(|table| table.get(slot))
    }

    pub fn close(&mut self, fd: i32) -> i32 {
        let Some(slot) = self.slot_of(fd) else {
            return -EBADF;
        };

        FILE_TABLE.lock(|table| table.release(slot));
        self.descriptors[fd as usize] = None;
        0
    }

    /// Duplicate `fd` into the lowest free descriptor.
    pub fn dup(&mut self, fd: i32) -> i32 {
        let Some(slot) = self.slot_of(fd) else {
            return -EBADF;
        };

        match self.insert(slot) {
            Some(new_fd) => {
                FILE_TABLE.lock(|table| table.add_ref(slot));
                new_fd
            }
            None => -EBADF,
        }
    }

    pub fn open_count(&self) -> usize {
        self.descriptors.iter().flatten().count()
    }

    //----------------------------------------------------------------------------------------------
    // Private Code
    //----------------------------------------------------------------------------------------------

    fn slot_of(&self, fd: i32) -> Option<usize> {
        if fd < 0 {
            return None;
        }
        *self.descriptors.get(fd as usize)?
    }

    fn insert(&mut self, slot: usize) -> Option<i32> {
        if self.descriptors.len() > i32::MAX as usize {
            return None;
        }

        for (fd, entry) in self.descriptors.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(slot);
                return Some(fd as i32);
            }
        }
        self.descriptors.push(Some(slot));
        Some((self.descriptors.len() - 1) as i32)
    }
}

impl Default for FileDescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_round_trips_the_descriptor_table() {
        let mut fds = FileDescriptorTable::new();

        let fd = fds.open("/dev/null", FileMode::Write);
        assert!(fd >= 0);
        assert_eq!(fds.open_count(), 1);

        assert_eq!(fds.close(fd), 0);
        assert_eq!(fds.open_count(), 0);

        // The freed descriptor number is handed out again.
        let fd2 = fds.open("/dev/zero", FileMode::Read);
        assert_eq!(fd2, fd);
        fds.close(fd2);
    }

    #[test]
    fn unknown_paths_are_enoent() {
        let mut fds = FileDescriptorTable::new();
        assert_eq!(fds.open("/dev/nope", FileMode::Read), -ENOENT);
        assert_eq!(fds.open("", FileMode::Read), -ENOENT);
    }

    #[test]
    fn bad_descriptors_are_ebadf() {
        let mut fds = FileDescriptorTable::new();
        assert_eq!(fds.close(0), -EBADF);
        assert_eq!(fds.close(-1), -EBADF);
        assert_eq!(fds.dup(7), -EBADF);
        assert!(fds.try_get(3).is_none());
    }

    #[test]
    fn dup_shares_the_description() {
        let mut fds = FileDescriptorTable::new();

        let fd = fds.open("/dev/zero", FileMode::Read);
        let dup = fds.dup(fd);
        assert!(dup >= 0);
        assert_ne!(dup, fd);

        // Same device and mode behind both.
        assert_eq!(fds.try_get(fd), fds.try_get(dup));

        // The description survives closing one of the two.
        assert_eq!(fds.close(fd), 0);
        assert!(fds.try_get(dup).is_some());
        fds.close(dup);
    }

    #[test]
    fn mode_is_enforced_on_io() {
        let mut buf = [0xAA_u8; 8];

        // Writing through a read-only descriptor and vice versa.
        assert_eq!(
            write_through(File::Null, FileMode::Read, &buf),
            -EINVAL as isize
        );
        assert_eq!(
            read_through(File::Zero, FileMode::Write, &mut buf),
            -EINVAL as isize
        );

        // Correct directions work.
        assert_eq!(write_through(File::Null, FileMode::Write, &buf), 8);
        assert_eq!(read_through(File::Zero, FileMode::Read, &mut buf), 8);
        assert_eq!(buf, [0_u8; 8]);
    }

    #[test]
    fn dev_null_and_zero_behave() {
        let mut buf = [0xAA_u8; 4];
        assert_eq!(read_through(File::Null, FileMode::Read, &mut buf), 0);
        assert_eq!(buf, [0xAA; 4], "null reads nothing");

        assert_eq!(read_through(File::Zero, FileMode::Read, &mut buf), 4);
        assert_eq!(buf, [0; 4]);

        assert_eq!(write_through(File::Display, FileMode::Write, &buf), 4);
    }
}
