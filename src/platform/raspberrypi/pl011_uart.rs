/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 *
 * PL011 TRM: http://infocenter.arm.com/help/topic/com.arm.doc.ddi0183g/DDI0183G_uart_pl011_r1p5_trm.pdf
 */

//! PL011 UART driver.
//!
//! Two faces: a polling console (boot messages, panic output) and the
//! interrupt-driven request machinery behind `/dev/uart0`. Exactly one
//! [`UartRequest`] may be outstanding, because the hardware has a single
//! FIFO pair; a task that installs one blocks on it as a waitable until
//! the IRQ path has moved all the bytes.

use {
    crate::{
        console::interface,
        cpu::{loop_while, spin_for_cycles, MemoryBarrier},
        exception::asynchronous::IrqDisabled,
        platform::mmio::MMIODerefWrapper,
        synchronization::{interface::Mutex, IRQSafeNullLock},
    },
    core::fmt,
    tock_registers::{
        interfaces::{ReadWriteable, Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadOnly, ReadWrite, WriteOnly},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

// PL011 UART registers.
//
// Descriptions taken from the BCM2837 peripherals datasheet.
register_bitfields! {
    u32,

    /// Flag Register
    FR [
        /// Transmit FIFO empty. With FIFOs enabled, set when the
        /// transmit FIFO is completely empty.
        TXFE OFFSET(7) NUMBITS(1) [],

        /// Receive FIFO full.
        RXFF OFFSET(6) NUMBITS(1) [],

        /// Transmit FIFO full.
        TXFF OFFSET(5) NUMBITS(1) [],

        /// Receive FIFO empty.
        RXFE OFFSET(4) NUMBITS(1) [],

        /// UART busy transmitting data.
        BUSY OFFSET(3) NUMBITS(1) []
    ],

    /// Integer Baud rate divisor
    IBRD [
        BAUD_DIVINT OFFSET(0) NUMBITS(16) []
    ],

    /// Fractional Baud rate divisor
    FBRD [
        BAUD_DIVFRAC OFFSET(0) NUMBITS(6) []
    ],

    /// Line Control register
    LCR_H [
        /// Word length.
        WordLength OFFSET(5) NUMBITS(2) [
            FiveBit = 0b00,
            SixBit = 0b01,
            SevenBit = 0b10,
            EightBit = 0b11
        ],

        Fifos OFFSET(4) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ]
    ],

    /// Control Register
    CR [
        /// Receive enable.
        RXE OFFSET(9) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// Transmit enable.
        TXE OFFSET(8) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// UART enable.
        UARTEN OFFSET(0) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ]
    ],

    /// Interrupt FIFO Level Select Register. Trigger points are 1/8,
    /// 1/4, 1/2, 3/4 and 7/8 full, encoded 0b000..0b100.
    IFLS [
        RXIFLSEL OFFSET(3) NUMBITS(3) [],
        TXIFLSEL OFFSET(0) NUMBITS(3) []
    ],

    /// Interrupt Mask Set/Clear Register.
    IMSC [
        /// Transmit interrupt mask.
        TXIM OFFSET(5) NUMBITS(1) [],

        /// Receive interrupt mask.
        RXIM OFFSET(4) NUMBITS(1) []
    ],

    /// Masked Interrupt Status Register.
    MIS [
        TXMIS OFFSET(5) NUMBITS(1) [],
        RXMIS OFFSET(4) NUMBITS(1) []
    ],

    /// Interrupt Clear Register.
    ICR [
        /// Meta field for all pending interrupts.
        ALL OFFSET(0) NUMBITS(11) [],

        TXIC OFFSET(5) NUMBITS(1) [],
        RXIC OFFSET(4) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x00 => Data: ReadWrite<u32>),
        (0x04 => Status: ReadWrite<u32>),
        (0x08 => __reserved_1),
        (0x18 => Flag: ReadOnly<u32, FR::Register>),
        (0x1c => __reserved_2),
        (0x24 => IntegerBaudRate: WriteOnly<u32, IBRD::Register>),
        (0x28 => FractionalBaudRate: WriteOnly<u32, FBRD::Register>),
        (0x2c => LineControl: ReadWrite<u32, LCR_H::Register>),
        (0x30 => Control: WriteOnly<u32, CR::Register>),
        (0x34 => InterruptFifoLevelSelect: ReadWrite<u32, IFLS::Register>),
        (0x38 => InterruptMaskSetClear: ReadWrite<u32, IMSC::Register>),
        (0x3c => RawInterruptStatus: ReadOnly<u32>),
        (0x40 => MaskedInterruptStatus: ReadOnly<u32, MIS::Register>),
        (0x44 => InterruptClear: WriteOnly<u32, ICR::Register>),
        (0x48 => @END),
    }
}

// The two GPIO pull-up registers the UART bring-up needs (BCM2835
// datasheet, page 101).
register_structs! {
    #[allow(non_snake_case)]
    GpioRegisterBlock {
        (0x00 => __reserved_0),
        (0x94 => PullUpDown: WriteOnly<u32>),
        (0x98 => PullUpDownClock0: WriteOnly<u32>),
        (0x9c => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;
type GpioRegisters = MMIODerefWrapper<GpioRegisterBlock>;

const GPIO14: u32 = 14;
const GPIO15: u32 = 15;

struct Pl011UartInner {
    registers: Registers,
    gpio: GpioRegisters,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Baud-rate divisor pair for the IBRD/FBRD registers.
pub struct RateDivisors {
    integer_baud_rate_divisor: u32,
    fractional_baud_rate_divisor: u32,
}

/// The UART driver.
pub struct Pl011Uart {
    inner: IRQSafeNullLock<Pl011UartInner>,
}

/// One in-flight read or write against the UART.
///
/// `size` grows toward `capacity` as the IRQ path moves bytes; the
/// request is finished when they meet. A line break on a read shrinks
/// `capacity` to `size` so the request completes early.
pub struct UartRequest {
    buf: *mut u8,
    size: usize,
    capacity: usize,
    is_write: bool,
}

// The buffer belongs to the (blocked) requesting task.
unsafe impl Send for UartRequest {}

/// What [`UartRequest::push_read_byte`] decided.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReadOutcome {
    /// Byte stored; echo it.
    Stored(u8),
    /// Line break: not stored, request complete, echo a newline.
    Break,
    /// Buffer was already full; nothing consumed.
    Full,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static PL011_UART: Pl011Uart = unsafe {
    Pl011Uart::new(
        crate::platform::raspberrypi::memory_map::UART_BASE,
        crate::platform::raspberrypi::memory_map::GPIO_BASE,
    )
};

/// The single request slot (the device has one FIFO pair).
static UART_REQUEST: IRQSafeNullLock<UartRequest> = IRQSafeNullLock::new(UartRequest::idle());

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the UART driver.
pub fn uart() -> &'static Pl011Uart {
    &PL011_UART
}

impl RateDivisors {
    // Integer-only divisor computation: 64 * clock / (16 * rate) =
    // 4 * clock / rate; low 6 bits are the fraction, the next 16 bits
    // the integer part.
    pub fn from_clock_and_rate(clock: u64, baud_rate: u32) -> Result<RateDivisors, &'static str> {
        let value = 4 * clock / baud_rate as u64;
        let i = ((value >> 6) & 0xffff) as u32;
        let f = (value & 0x3f) as u32;
        if i > 65535 {
            return Err("UART integer baud rate divisor out of range");
        }
        Ok(RateDivisors {
            integer_baud_rate_divisor: i,
            fractional_baud_rate_divisor: f,
        })
    }
}

impl UartRequest {
    /// The slot's resting state: a finished zero-byte request.
    pub const fn idle() -> Self {
        Self {
            buf: core::ptr::null_mut(),
            size: 0,
            capacity: 0,
            is_write: false,
        }
    }

    /// # Safety
    ///
    /// `buf` must stay valid for `capacity` bytes until the request
    /// finishes; the requesting task blocks, so its buffer does.
    pub unsafe fn new_read(buf: *mut u8, capacity: usize) -> Self {
        Self {
            buf,
            size: 0,
            capacity,
            is_write: false,
        }
    }

    /// # Safety
    ///
    /// As [`new_read`](Self::new_read); the buffer is only read.
    pub unsafe fn new_write(buf: *const u8, capacity: usize) -> Self {
        Self {
            buf: buf as *mut u8,
            size: 0,
            capacity,
            is_write: true,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.size == self.capacity
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }

    /// Bytes moved so far; the request's result value.
    pub fn size_transferred(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.size
    }

    /// Feed one received byte into a read request. A `\n` or `\r`
    /// terminates the line: the byte is consumed but not stored, and the
    /// capacity shrinks to the bytes already read.
    pub fn push_read_byte(&mut self, byte: u8) -> ReadOutcome {
        debug_assert!(!self.is_write);
        if self.is_finished() {
            return ReadOutcome::Full;
        }

        if byte == b'\n' || byte == b'\r' {
            self.capacity = self.size;
            return ReadOutcome::Break;
        }

        unsafe { self.buf.add(self.size).write(byte) };
        self.size += 1;
        ReadOutcome::Stored(byte)
    }

    /// Take the next byte to transmit from a write request.
    pub fn next_write_byte(&mut self) -> Option<u8> {
        debug_assert!(self.is_write);
        if self.is_finished() {
            return None;
        }

        let byte = unsafe { self.buf.add(self.size).read() };
        self.size += 1;
        Some(byte)
    }
}

impl Pl011Uart {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// The base addresses must be the UART's and GPIO's MMIO bases.
    pub const unsafe fn new(uart_base: usize, gpio_base: usize) -> Self {
        Self {
            inner: IRQSafeNullLock::new(unsafe { Pl011UartInner::new(uart_base, gpio_base) }),
        }
    }

    /// Bring up the device: 115200 8N1, FIFOs on, all IRQs masked.
    pub fn init(&self) -> Result<(), &'static str> {
        self.inner.lock(|inner| inner.init())
    }

    /// Write a string via polling. Boot and panic path.
    pub fn write_str_polling(&self, string: &str) {
        self.inner.lock(|inner| {
            for byte in string.bytes() {
                inner.put_char(byte);
            }
        });
    }
}

/// Blocking read through the request machinery. Returns bytes read.
///
/// Panics if a request is already outstanding; the device supports one
/// at a time, and the file layer guarantees as much.
pub fn read(buf: &mut [u8]) -> usize {
    let installed_unfinished = UART_REQUEST.lock(|request| {
        assert!(
            request.is_finished(),
            "UART request already under operation!"
        );

        *request = unsafe { UartRequest::new_read(buf.as_mut_ptr(), buf.len()) };

        // Configure and unmask only after the request is published; the
        // IRQ path sees either the fresh request or the finished old
        // one, never a half-built one.
        uart().inner.lock(|inner| {
            inner.set_read_threshold(request.remaining());
            inner.enable_read_irq();
        });

        !request.is_finished()
    });

    if installed_unfinished {
        crate::task::reschedule_while_waiting_for(crate::task::Waitable::UartRequest);
    }

    UART_REQUEST.lock(|request| {
        debug_assert!(request.is_finished());
        request.size_transferred()
    })
}

/// Blocking write through the request machinery. Returns bytes written.
pub fn write(buf: &[u8]) -> usize {
    let installed_unfinished = UART_REQUEST.lock(|request| {
        assert!(
            request.is_finished(),
            "UART request already under operation!"
        );

        *request = unsafe { UartRequest::new_write(buf.as_ptr(), buf.len()) };

        uart().inner.lock(|inner| {
            inner.set_write_threshold(request.remaining());
            inner.enable_write_irq();
        });

        !request.is_finished()
    });

    if installed_unfinished {
        crate::task::reschedule_while_waiting_for(crate::task::Waitable::UartRequest);
    }

    UART_REQUEST.lock(|request| {
        debug_assert!(request.is_finished());
        request.size_transferred()
    })
}

/// Whether the single request slot is finished. The scheduler polls this
/// through [`Waitable::UartRequest`](crate::task::Waitable).
pub fn request_finished() -> bool {
    UART_REQUEST.lock(|request| request.is_finished())
}

/// UART IRQ service: clear the source, move bytes, re-arm or mask.
pub fn handle_irq(_irq: &IrqDisabled) {
    UART_REQUEST.lock(|request| {
        uart().inner.lock(|inner| {
            if request.is_write() {
                inner.clear_write_irq();
            } else {
                inner.clear_read_irq();
            }

            inner.pump(request);

            if request.is_finished() {
                // Mask now rather than at request teardown; a spurious
                // trailing IRQ would have nothing to do.
                if request.is_write() {
                    inner.disable_write_irq();
                } else {
                    inner.disable_read_irq();
                }
            } else if request.is_write() {
                inner.set_write_threshold(request.remaining());
            } else {
                inner.set_read_threshold(request.remaining());
            }
        });
    });
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl Pl011UartInner {
    const unsafe fn new(uart_base: usize, gpio_base: usize) -> Self {
        Self {
            registers: unsafe { Registers::new(uart_base) },
            gpio: unsafe { GpioRegisters::new(gpio_base) },
        }
    }

    fn init(&self) -> Result<(), &'static str> {
        // Peripheral-crossing accesses below; bracket the whole window.
        let _barrier = MemoryBarrier::new();

        // Off while reconfiguring.
        self.registers.Control.set(0);

        // Route GPIO 14/15 to the UART and drop their pull-ups. The
        // spins are required settle time.
        self.gpio.PullUpDown.set(0);
        spin_for_cycles(150);
        self.gpio
            .PullUpDownClock0
            .set((1 << GPIO14) | (1 << GPIO15));
        spin_for_cycles(150);
        self.gpio.PullUpDownClock0.set(0);

        // Clear all pending interrupts.
        self.registers.InterruptClear.write(ICR::ALL::SET);

        // 3 MHz UART clock, 115200 baud.
        let divisors = RateDivisors::from_clock_and_rate(3_000_000, 115_200)?;
        self.registers
            .IntegerBaudRate
            .write(IBRD::BAUD_DIVINT.val(divisors.integer_baud_rate_divisor));
        self.registers
            .FractionalBaudRate
            .write(FBRD::BAUD_DIVFRAC.val(divisors.fractional_baud_rate_divisor));

        // 8N1, FIFOs on.
        self.registers
            .LineControl
            .write(LCR_H::WordLength::EightBit + LCR_H::Fifos::Enabled);

        // All interrupt sources masked until a request arms one.
        self.registers.InterruptMaskSetClear.set(0);
        self.registers.InterruptFifoLevelSelect.set(0);

        self.registers
            .Control
            .write(CR::UARTEN::Enabled + CR::TXE::Enabled + CR::RXE::Enabled);

        Ok(())
    }

    /// Raw byte out, polling on a full FIFO.
    fn write_byte(&self, byte: u8) {
        loop_while(|| self.registers.Flag.is_set(FR::TXFF));
        self.registers.Data.set(byte as u32);
    }

    /// Byte out with the wire discipline: `\n` goes out as `\n\r`.
    fn put_char(&self, byte: u8) {
        self.write_byte(byte);
        if byte == b'\n' {
            self.write_byte(b'\r');
        }
    }

    /// Raw byte in, polling on an empty FIFO.
    fn read_byte(&self) -> u8 {
        loop_while(|| self.registers.Flag.is_set(FR::RXFE));
        self.registers.Data.get() as u8
    }

    fn flush(&self) {
        loop_while(|| self.registers.Flag.is_set(FR::BUSY));
    }

    fn clear_rx(&self) {
        loop_while(|| {
            let pending = !self.registers.Flag.is_set(FR::RXFE);
            if pending {
                self.registers.Data.get();
            }
            pending
        });
    }

    /// Move bytes between the FIFOs and `request` until one of them
    /// runs out.
    fn pump(&self, request: &mut UartRequest) {
        let _barrier = MemoryBarrier::new();

        if request.is_write() {
            while !request.is_finished() && !self.registers.Flag.is_set(FR::TXFF) {
                // The FIFO has room, write without re-polling; the
                // stray CR after a newline rides along.
                let byte = match request.next_write_byte() {
                    Some(byte) => byte,
                    None => break,
                };
                self.registers.Data.set(byte as u32);
                if byte == b'\n' {
                    self.registers.Data.set(b'\r' as u32);
                }
            }
        } else {
            while !request.is_finished() && !self.registers.Flag.is_set(FR::RXFE) {
                let byte = self.registers.Data.get() as u8;
                match request.push_read_byte(byte) {
                    ReadOutcome::Stored(echo) => self.put_char(echo),
                    ReadOutcome::Break => self.put_char(b'\n'),
                    ReadOutcome::Full => break,
                }
            }
        }
    }

    // IFLS trigger select from the bytes still wanted: read (or write)
    // when as much as possible is ready, capped at the 8-deep trigger
    // range.
    fn set_read_threshold(&self, remaining: usize) {
        let select = (remaining.min(8) >> 1) as u32;
        self.registers
            .InterruptFifoLevelSelect
            .modify(IFLS::RXIFLSEL.val(select));
    }

    fn set_write_threshold(&self, remaining: usize) {
        let select = (remaining.min(8) >> 1) as u32;
        self.registers
            .InterruptFifoLevelSelect
            .modify(IFLS::TXIFLSEL.val(select));
    }

    fn enable_read_irq(&self) {
        self.registers.InterruptMaskSetClear.modify(IMSC::RXIM::SET);
    }

    fn disable_read_irq(&self) {
        self.registers
            .InterruptMaskSetClear
            .modify(IMSC::RXIM::CLEAR);
    }

    fn enable_write_irq(&self) {
        self.registers.InterruptMaskSetClear.modify(IMSC::TXIM::SET);
    }

    fn disable_write_irq(&self) {
        self.registers
            .InterruptMaskSetClear
            .modify(IMSC::TXIM::CLEAR);
    }

    fn clear_read_irq(&self) {
        self.registers.InterruptClear.write(ICR::RXIC::SET);
    }

    fn clear_write_irq(&self) {
        self.registers.InterruptClear.write(ICR::TXIC::SET);
    }
}

impl fmt::Write for Pl011UartInner {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.put_char(byte);
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// OS Interface Code
//--------------------------------------------------------------------------------------------------

impl interface::Write for Pl011Uart {
    fn write_char(&self, c: char) {
        let mut encoded = [0_u8; 4];
        self.write_str_polling(c.encode_utf8(&mut encoded));
    }

    fn write_string(&self, string: &str) {
        self.write_str_polling(string);
    }

    fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result {
        self.inner.lock(|inner| fmt::Write::write_fmt(inner, args))
    }

    fn flush(&self) {
        self.inner.lock(|inner| inner.flush());
    }
}

impl interface::Read for Pl011Uart {
    fn read_char(&self) -> char {
        self.inner.lock(|inner| inner.read_byte() as char)
    }

    fn clear_rx(&self) {
        self.inner.lock(|inner| inner.clear_rx());
    }
}

impl interface::All for Pl011Uart {}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisors() {
        let divisors = RateDivisors::from_clock_and_rate(3_000_000, 115_200).unwrap();
        assert_eq!(divisors.integer_baud_rate_divisor, 1);
        assert_eq!(divisors.fractional_baud_rate_divisor, 40);
    }

    #[test]
    fn read_request_terminates_on_line_break() {
        // S2 shape: "hello\n" into a 16-byte read. Five bytes stored,
        // the newline consumed as terminator, every byte echoed.
        let mut buf = [0_u8; 16];
        let mut request = unsafe { UartRequest::new_read(buf.as_mut_ptr(), buf.len()) };
        let mut echoes = Vec::new();

        for &byte in b"hello\n" {
            match request.push_read_byte(byte) {
                ReadOutcome::Stored(echo) => echoes.push(echo),
                ReadOutcome::Break => echoes.push(b'\n'),
                ReadOutcome::Full => unreachable!(),
            }
        }

        assert!(request.is_finished());
        assert_eq!(request.size_transferred(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(echoes, b"hello\n");
    }

    #[test]
    fn read_request_fills_to_capacity_without_break() {
        let mut buf = [0_u8; 4];
        let mut request = unsafe { UartRequest::new_read(buf.as_mut_ptr(), buf.len()) };

        for &byte in b"abcd" {
            assert_eq!(request.push_read_byte(byte), ReadOutcome::Stored(byte));
        }
        assert!(request.is_finished());
        assert_eq!(request.push_read_byte(b'x'), ReadOutcome::Full);
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn carriage_return_also_terminates() {
        let mut buf = [0_u8; 8];
        let mut request = unsafe { UartRequest::new_read(buf.as_mut_ptr(), buf.len()) };

        assert_eq!(request.push_read_byte(b'o'), ReadOutcome::Stored(b'o'));
        assert_eq!(request.push_read_byte(b'\r'), ReadOutcome::Break);
        assert!(request.is_finished());
        assert_eq!(request.size_transferred(), 1);
    }

    #[test]
    fn write_request_drains_in_order() {
        let data = b"ok\n";
        let mut request = unsafe { UartRequest::new_write(data.as_ptr(), data.len()) };

        let mut out = Vec::new();
        while let Some(byte) = request.next_write_byte() {
            out.push(byte);
        }
        assert!(request.is_finished());
        assert_eq!(request.size_transferred(), 3);
        assert_eq!(out, data);
    }

    #[test]
    fn zero_length_requests_are_born_finished() {
        let request = unsafe { UartRequest::new_read(core::ptr::null_mut(), 0) };
        assert!(request.is_finished());
        assert_eq!(request.size_transferred(), 0);
    }

    #[test]
    fn fifo_thresholds_follow_the_remaining_count() {
        // min(n, 8) / 2 per the IFLS encoding.
        for (remaining, select) in [(16, 4), (8, 4), (5, 2), (2, 1), (1, 0)] {
            assert_eq!((remaining.min(8) >> 1) as u32, select);
        }
    }
}
