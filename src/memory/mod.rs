/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Memory management: regions, the page-range allocators, the MMU mapper
//! and the kernel heap.

use {
    crate::{
        arch::aarch32,
        platform::raspberrypi::memory_map,
        synchronization::IRQSafeNullLock,
    },
    core::ptr::NonNull,
};

pub mod heap;
pub mod mmu;
pub mod range_alloc;
pub mod region;
pub mod task_heap;

use self::{
    mmu::{translation_table::L1Table, Backing, PageAllocator},
    region::{PageRegion, SectionRegion, SECTION_SIZE},
};

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Align address downwards.
///
/// Returns the greatest x with alignment `align` so that x <= addr.
/// The alignment must be a power of 2.
#[inline(always)]
pub const fn align_down(addr: usize, alignment: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "`alignment` must be a power of two"
    );
    addr & !(alignment - 1)
}

/// Align address upwards.
///
/// Returns the smallest x with alignment `align` so that x >= addr.
/// The alignment must be a power of 2.
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "`alignment` must be a power of two"
    );

    let align_mask = alignment - 1;
    if value & align_mask == 0 {
        value // already aligned
    } else {
        (value | align_mask) + 1
    }
}

/// Check if a value is aligned to a given alignment.
/// The alignment must be a power of 2.
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    assert!(
        alignment.is_power_of_two(),
        "`alignment` must be a power of two"
    );

    (value & (alignment - 1)) == 0
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static PAGE_ALLOCATOR: IRQSafeNullLock<PageAllocator> =
    IRQSafeNullLock::new(PageAllocator::empty());

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the global MMU mapper.
pub fn page_allocator() -> &'static IRQSafeNullLock<PageAllocator> {
    &PAGE_ALLOCATOR
}

/// Build the translation tables and bring up the page allocators.
///
/// Layout above the kernel image, in 1 MiB sections:
/// one section for the L1 table, one scratch section split into the
/// range-allocator arenas (halved again for physical/virtual) and the
/// L2-table pool seed. The image, the L1 table, the scratch section and
/// the device window are identity-mapped; everything else stays in the
/// general pool.
///
/// # Safety
///
/// Boot path only, before the heap exists. `code_end` must be the
/// linker-reported end of the kernel image.
pub unsafe fn init(code_end: usize) {
    use crate::synchronization::interface::Mutex;

    let code_section_end = align_up(code_end, SECTION_SIZE);

    let vm_window = PageRegion::new(0, memory_map::MEMORY_END / region::PAGE_SIZE);
    let code_region = SectionRegion::from_range(0, code_section_end);
    let l1_region = SectionRegion::new(code_region.end_offset(), 1);
    let scratch_region = SectionRegion::new(l1_region.end_offset(), 1);
    let device_region =
        SectionRegion::from_range(memory_map::DEVICES_START, memory_map::DEVICES_END);

    let (arena_scratch, l2_seed) = scratch_region.as_page_region().halve();
    let (phys_scratch, virt_scratch) = arena_scratch.halve();

    let l1 = unsafe { L1Table::init_at(l1_region.ptr().cast()) };

    PAGE_ALLOCATOR.lock(|mapper| {
        unsafe {
            mapper.init(
                NonNull::from(l1),
                vm_window,
                phys_scratch,
                virt_scratch,
                l2_seed,
            )
        };

        // Boot identity mappings; failure here is unrecoverable.
        mapper
            .reserve_section_region(code_region, Backing::Identity)
            .expect("kernel image identity mapping");
        mapper
            .reserve_section_region(l1_region, Backing::Identity)
            .expect("L1 table identity mapping");
        mapper
            .reserve_section_region(scratch_region, Backing::Identity)
            .expect("scratch region identity mapping");
        mapper
            .reserve_section_region(device_region, Backing::Identity)
            .expect("device window identity mapping");
    });

    unsafe { aarch32::mmu::set_l1_table(l1_region.ptr() as usize) };
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_align_up() {
        // align 1
        assert_eq!(align_up(0, 1), 0);
        assert_eq!(align_up(1234, 1), 1234);
        // align 2
        assert_eq!(align_up(0, 2), 0);
        assert_eq!(align_up(1233, 2), 1234);
        // larger alignments
        assert_eq!(align_up(0x8123, 0x1000), 0x9000);
        assert_eq!(align_up(0x9000, 0x1000), 0x9000);
    }

    #[test]
    pub fn test_align_down() {
        assert_eq!(align_down(0x8123, 0x1000), 0x8000);
        assert_eq!(align_down(0x8000, 0x1000), 0x8000);
        assert_eq!(align_down(7, 2), 6);
    }

    #[test]
    pub fn test_is_aligned() {
        assert!(is_aligned(0x8000, 0x1000));
        assert!(!is_aligned(0x8001, 0x1000));
        assert!(is_aligned(0, 8));
    }
}
