/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! ARMv7-A short-descriptor translation tables.
//!
//! One L1 table of 4096 word entries covers the 32-bit address space at
//! 1 MiB per entry; an L2 table refines one L1 slot into 256 × 4 KiB
//! pages. Layouts are from the ARMv7-A reference manual, B3.5.1.
//!
//! Kernel mappings all use the same attribute defaults: full access
//! (AP 0b11), domain 0, non-cacheable, not execute-never. Device memory
//! on this core is covered by the non-cacheable default.

use {
    bit_field::BitField,
    core::fmt,
    static_assertions::const_assert_eq,
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_bitfields,
        registers::InMemoryRegister,
    },
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    /// L1 descriptor, viewed as a section. The two low TYPE bits decide
    /// which view applies; bit 18 separates sections from supersections.
    L1_DESCRIPTOR [
        TYPE OFFSET(0) NUMBITS(2) [
            Fault = 0b00,
            L2Ptr = 0b01,
            Section = 0b10
        ],
        B OFFSET(2) NUMBITS(1) [],
        C OFFSET(3) NUMBITS(1) [],
        XN OFFSET(4) NUMBITS(1) [],
        DOMAIN OFFSET(5) NUMBITS(4) [],
        P OFFSET(9) NUMBITS(1) [],
        AP OFFSET(10) NUMBITS(2) [],
        TEX OFFSET(12) NUMBITS(3) [],
        APX OFFSET(15) NUMBITS(1) [],
        S OFFSET(16) NUMBITS(1) [],
        NG OFFSET(17) NUMBITS(1) [],
        SUPERSECTION OFFSET(18) NUMBITS(1) [],
        NS OFFSET(19) NUMBITS(1) [],
        SECTION_BASE OFFSET(20) NUMBITS(12) [],
        /// Base of the pointed-to L2 table, for the L2Ptr view.
        L2_BASE OFFSET(10) NUMBITS(22) []
    ],

    /// L2 descriptor. Bit 1 set means small page (bit 0 is then XN);
    /// 0b01 is a large page, 0b00 faults.
    L2_DESCRIPTOR [
        XN OFFSET(0) NUMBITS(1) [],
        SMALL OFFSET(1) NUMBITS(1) [],
        B OFFSET(2) NUMBITS(1) [],
        C OFFSET(3) NUMBITS(1) [],
        AP OFFSET(4) NUMBITS(2) [],
        SBZ OFFSET(6) NUMBITS(3) [],
        APX OFFSET(9) NUMBITS(1) [],
        S OFFSET(10) NUMBITS(1) [],
        NG OFFSET(11) NUMBITS(1) [],
        PAGE_BASE OFFSET(12) NUMBITS(20) []
    ]
}

/// Full-access, non-cacheable, executable; every kernel mapping uses it.
const AP_FULL_ACCESS: u32 = 0b11;

/// What an L1 entry currently holds.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum L1Kind {
    Fault,
    L2Ptr,
    Section,
    SuperSection,
}

/// What an L2 entry currently holds.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum L2Kind {
    Fault,
    LargePage,
    Page,
}

/// A virtual address, with the table-index views on top.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct VirtualAddress(pub usize);

/// A physical address, with the descriptor base-field views on top.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PhysicalAddress(pub usize);

/// One word of the L1 table.
#[repr(transparent)]
pub struct L1Entry(InMemoryRegister<u32, L1_DESCRIPTOR::Register>);

/// One word of an L2 table.
#[repr(transparent)]
pub struct L2Entry(InMemoryRegister<u32, L2_DESCRIPTOR::Register>);

/// The first-level table. Exactly one exists, in its dedicated region
/// above the kernel image.
#[repr(C, align(16384))]
pub struct L1Table {
    entries: [L1Entry; Self::NUM_ENTRIES],
}

/// A second-level table, refining one L1 slot.
#[repr(C, align(1024))]
pub struct L2Table {
    entries: [L2Entry; Self::NUM_ENTRIES],
}

const_assert_eq!(core::mem::size_of::<L1Entry>(), 4);
const_assert_eq!(core::mem::size_of::<L1Table>(), 16 * 1024);
const_assert_eq!(core::mem::size_of::<L2Table>(), 1024);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl VirtualAddress {
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Index into the L1 table (address bits 31..20).
    pub fn l1_index(&self) -> usize {
        self.0.get_bits(20..32)
    }

    /// Index into an L2 table (address bits 19..12).
    pub fn l2_index(&self) -> usize {
        self.0.get_bits(12..20)
    }

    /// The first address mapped by L1 slot `index`.
    pub fn from_l1_index(index: usize) -> Self {
        Self(index << 20)
    }
}

impl PhysicalAddress {
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Section descriptor base field (address bits 31..20).
    pub fn section_base(&self) -> u32 {
        (self.0 as u32).get_bits(20..32)
    }

    /// Page descriptor base field (address bits 31..12).
    pub fn page_base(&self) -> u32 {
        (self.0 as u32).get_bits(12..32)
    }

    /// L2-table base field (address bits 31..10).
    pub fn l2_table_base(&self) -> u32 {
        (self.0 as u32).get_bits(10..32)
    }
}

impl L1Entry {
    pub fn kind(&self) -> L1Kind {
        match self.0.read(L1_DESCRIPTOR::TYPE) {
            0b00 => L1Kind::Fault,
            0b01 => L1Kind::L2Ptr,
            _ => {
                if self.0.is_set(L1_DESCRIPTOR::SUPERSECTION)
                    || self.0.read(L1_DESCRIPTOR::TYPE) == 0b11
                {
                    L1Kind::SuperSection
                } else {
                    L1Kind::Section
                }
            }
        }
    }

    pub fn set_fault(&self) {
        self.0.set(0);
    }

    /// Install a 1 MiB section mapping with the kernel attribute
    /// defaults.
    pub fn set_section(&self, phys: PhysicalAddress) {
        self.0.write(
            L1_DESCRIPTOR::TYPE::Section
                + L1_DESCRIPTOR::AP.val(AP_FULL_ACCESS)
                + L1_DESCRIPTOR::SECTION_BASE.val(phys.section_base()),
        );
    }

    /// Point this slot at an L2 table.
    pub fn set_l2_ptr(&self, l2_phys: PhysicalAddress) {
        self.0
            .write(L1_DESCRIPTOR::TYPE::L2Ptr + L1_DESCRIPTOR::L2_BASE.val(l2_phys.l2_table_base()));
    }

    /// Section view of the base address. Meaningless unless
    /// `kind() == Section`.
    pub fn section_base(&self) -> PhysicalAddress {
        PhysicalAddress((self.0.read(L1_DESCRIPTOR::SECTION_BASE) as usize) << 20)
    }

    /// L2 view of the base address. Meaningless unless `kind() == L2Ptr`.
    pub fn l2_table_base(&self) -> u32 {
        self.0.read(L1_DESCRIPTOR::L2_BASE)
    }

    pub fn execute_never(&self) -> bool {
        self.0.is_set(L1_DESCRIPTOR::XN)
    }

    pub fn access_permissions(&self) -> u32 {
        self.0.read(L1_DESCRIPTOR::AP)
    }

    pub fn cacheable(&self) -> bool {
        self.0.is_set(L1_DESCRIPTOR::C)
    }

    pub fn raw(&self) -> u32 {
        self.0.get()
    }
}

impl L2Entry {
    pub fn kind(&self) -> L2Kind {
        let raw = self.0.get();
        match (raw.get_bit(1), raw.get_bit(0)) {
            (false, false) => L2Kind::Fault,
            (false, true) => L2Kind::LargePage,
            (true, _) => L2Kind::Page,
        }
    }

    pub fn set_fault(&self) {
        self.0.set(0);
    }

    /// Install a 4 KiB page mapping with the kernel attribute defaults.
    pub fn set_page(&self, phys: PhysicalAddress) {
        self.0.write(
            L2_DESCRIPTOR::SMALL::SET
                + L2_DESCRIPTOR::AP.val(AP_FULL_ACCESS)
                + L2_DESCRIPTOR::PAGE_BASE.val(phys.page_base()),
        );
    }

    /// Page view of the base address. Meaningless unless
    /// `kind() == Page`.
    pub fn page_base(&self) -> PhysicalAddress {
        PhysicalAddress((self.0.read(L2_DESCRIPTOR::PAGE_BASE) as usize) << 12)
    }

    pub fn raw(&self) -> u32 {
        self.0.get()
    }
}

impl L1Table {
    pub const NUM_ENTRIES: usize = 4096;

    /// Zero-initialize the table at `ptr` and hand it out.
    ///
    /// # Safety
    ///
    /// `ptr` must be 16 KiB-aligned, valid for the table's size, and
    /// exclusively owned by the returned reference from here on.
    pub unsafe fn init_at<'table>(ptr: *mut L1Table) -> &'table mut L1Table {
        let table = unsafe { &mut *ptr };
        for entry in table.entries.iter() {
            entry.set_fault();
        }
        table
    }

    /// The entry covering `virt`.
    pub fn entry(&self, virt: VirtualAddress) -> &L1Entry {
        &self.entries[virt.l1_index()]
    }
}

impl L2Table {
    pub const NUM_ENTRIES: usize = 256;

    /// Zero-initialize the table at `ptr` and hand it out.
    ///
    /// # Safety
    ///
    /// `ptr` must be 1 KiB-aligned, valid for the table's size, and
    /// exclusively owned by the returned reference from here on.
    pub unsafe fn init_at<'table>(ptr: *mut L2Table) -> &'table mut L2Table {
        let table = unsafe { &mut *ptr };
        for entry in table.entries.iter() {
            entry.set_fault();
        }
        table
    }

    /// The entry covering `virt` within this table's L1 slot.
    pub fn entry(&self, virt: VirtualAddress) -> &L2Entry {
        &self.entries[virt.l2_index()]
    }
}

impl fmt::Display for L1Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            L1Kind::Fault => "fault",
            L1Kind::L2Ptr => "l2ptr",
            L1Kind::Section => "section",
            L1Kind::SuperSection => "supersection",
        };
        f.write_str(name)
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_indexing() {
        let va = VirtualAddress(0x3F20_1000);
        assert_eq!(va.l1_index(), 0x3F2);
        assert_eq!(va.l2_index(), 0x001);
        assert_eq!(VirtualAddress::from_l1_index(0x3F2).0, 0x3F20_0000);
    }

    #[test]
    fn section_entry_round_trip() {
        let entry = L1Entry(InMemoryRegister::new(0));
        assert_eq!(entry.kind(), L1Kind::Fault);

        entry.set_section(PhysicalAddress(0x3F20_0000));
        assert_eq!(entry.kind(), L1Kind::Section);
        assert_eq!(entry.section_base(), PhysicalAddress(0x3F20_0000));

        // Kernel mapping defaults: executable, full access, device-safe
        // non-cacheable.
        assert!(!entry.execute_never());
        assert_eq!(entry.access_permissions(), 0b11);
        assert!(!entry.cacheable());
    }

    #[test]
    fn l2_ptr_entry_round_trip() {
        let entry = L1Entry(InMemoryRegister::new(0));
        entry.set_l2_ptr(PhysicalAddress(0x0042_0400));
        assert_eq!(entry.kind(), L1Kind::L2Ptr);
        assert_eq!(entry.l2_table_base(), 0x0042_0400 >> 10);
    }

    #[test]
    fn page_entry_round_trip() {
        let entry = L2Entry(InMemoryRegister::new(0));
        assert_eq!(entry.kind(), L2Kind::Fault);

        entry.set_page(PhysicalAddress(0x0123_4000));
        assert_eq!(entry.kind(), L2Kind::Page);
        assert_eq!(entry.page_base(), PhysicalAddress(0x0123_4000));
    }

    #[test]
    fn supersection_bit_is_decoded() {
        let entry = L1Entry(InMemoryRegister::new(0b10 | (1 << 18)));
        assert_eq!(entry.kind(), L1Kind::SuperSection);
    }

    #[test]
    fn tables_zero_to_fault() {
        let mut backing = Box::new([0xFF_u8; core::mem::size_of::<L2Table>() + 1024]);
        let ptr = backing.as_mut_ptr();
        let aligned = ((ptr as usize + 1023) & !1023) as *mut L2Table;

        let table = unsafe { L2Table::init_at(aligned) };
        for i in 0..L2Table::NUM_ENTRIES {
            let va = VirtualAddress(i << 12);
            assert_eq!(table.entry(va).kind(), L2Kind::Fault);
        }
    }
}
