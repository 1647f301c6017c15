/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! VideoCore property mailbox.
//!
//! Synchronous, boot-time only. The request buffer must be 16-byte
//! aligned because the low four bits of the address carry the channel
//! number; every register access sits between memory barriers per the
//! BCM2835 manual's peripheral-crossing rule.

use {
    crate::{cpu::MemoryBarrier, platform::mmio::MMIODerefWrapper},
    snafu::Snafu,
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadOnly, WriteOnly},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    STATUS [
        /// Set while the write mailbox is full.
        FULL OFFSET(31) NUMBITS(1) [],
        /// Set while the read mailbox is empty.
        EMPTY OFFSET(30) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x00 => READ: ReadOnly<u32>),
        (0x04 => __reserved_1),
        (0x18 => STATUS: ReadOnly<u32, STATUS::Register>),
        (0x1c => __reserved_2),
        (0x20 => WRITE: WriteOnly<u32>),
        (0x24 => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;

/// Lowest 4 bits of a posted word select the channel.
const CHANNEL_MASK: u32 = 0xf;

const REQUEST: u32 = 0;
const RESPONSE_OK: u32 = 0x8000_0000;
const RESPONSE_ERROR: u32 = 0x8000_0001;

const TAG_GET_BOARD_SERIAL: u32 = 0x0001_0004;
const END_TAG: u32 = 0;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Mailbox channels.
pub mod channel {
    /// Property tags, ARM to VideoCore.
    pub const PROPERTY_TAGS_SEND: u32 = 8;
}

#[derive(Debug, Snafu)]
pub enum MailboxError {
    #[snafu(display("firmware flagged the request as failed"))]
    Response,
    #[snafu(display("reply marker is neither success nor failure"))]
    Unknown,
}

pub type Result<T> = core::result::Result<T, MailboxError>;

/// A property request/response buffer. The alignment is load-bearing:
/// the VideoCore only sees address bits 31..4.
#[repr(align(16))]
pub struct MailboxBuffer(pub [u32; 8]);

/// The mailbox client.
pub struct Mailbox {
    registers: Registers,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static MAILBOX: Mailbox =
    unsafe { Mailbox::new(crate::platform::raspberrypi::memory_map::MAILBOX_BASE) };

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the mailbox.
pub fn mailbox() -> &'static Mailbox {
    &MAILBOX
}

impl MailboxBuffer {
    /// A GetBoardSerial request: `{total length, request marker, tag,
    /// value size, request size, value[2], end tag}`.
    pub fn board_serial_request() -> Self {
        let mut words = [0_u32; 8];
        words[0] = (core::mem::size_of::<[u32; 8]>()) as u32;
        words[1] = REQUEST;
        words[2] = TAG_GET_BOARD_SERIAL;
        words[3] = 8; // value buffer size in bytes
        words[4] = 8; // request size
        // words[5..7]: value buffer
        words[7] = END_TAG;
        Self(words)
    }
}

impl Mailbox {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// `base_addr` must be the mailbox MMIO base.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self {
            registers: unsafe { Registers::new(base_addr) },
        }
    }

    /// Post `buffer` on `channel` and spin for the reply.
    pub fn call(&self, channel: u32, buffer: &mut MailboxBuffer) -> Result<()> {
        let buffer_addr = buffer.0.as_ptr() as usize as u32;
        assert_eq!(buffer_addr & CHANNEL_MASK, 0, "mailbox buffer misaligned");
        let message = buffer_addr | (channel & CHANNEL_MASK);

        {
            let _barrier = MemoryBarrier::new();
            while self.registers.STATUS.is_set(STATUS::FULL) {}
            self.registers.WRITE.set(message);
        }

        loop {
            let _barrier = MemoryBarrier::new();
            while self.registers.STATUS.is_set(STATUS::EMPTY) {}

            // Replies for other channels are not ours to consume
            // answers for; keep reading until our own word comes back.
            if self.registers.READ.get() == message {
                return match buffer.0[1] {
                    RESPONSE_OK => Ok(()),
                    RESPONSE_ERROR => Err(MailboxError::Response),
                    _ => Err(MailboxError::Unknown),
                };
            }
        }
    }

    /// The board serial number, via the property channel.
    pub fn board_serial(&self) -> Result<u64> {
        let mut buffer = MailboxBuffer::board_serial_request();
        self.call(channel::PROPERTY_TAGS_SEND, &mut buffer)?;
        Ok(((buffer.0[6] as u64) << 32) | buffer.0[5] as u64)
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_buffer_is_aligned_for_the_channel_bits() {
        let buffer = MailboxBuffer::board_serial_request();
        assert_eq!(buffer.0.as_ptr() as usize % 16, 0);
        assert_eq!(core::mem::align_of::<MailboxBuffer>(), 16);
    }

    #[test]
    fn serial_request_layout() {
        let buffer = MailboxBuffer::board_serial_request();
        assert_eq!(buffer.0[0], 32, "total length in bytes");
        assert_eq!(buffer.0[1], REQUEST);
        assert_eq!(buffer.0[2], TAG_GET_BOARD_SERIAL);
        assert_eq!(buffer.0[3], 8);
        assert_eq!(buffer.0[4], 8);
        assert_eq!(buffer.0[7], END_TAG);
    }
}
