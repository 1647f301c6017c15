/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! The kernel binary: boot sequence and panic handler.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod kernel {
    use larch::{
        arch::aarch32::boot,
        console::{self, interface::Write},
        exception, info, memory,
        platform::raspberrypi::{
            interrupt_controller::interrupt_controller,
            mailbox::mailbox,
            memory_map,
            pl011_uart::uart,
            system_timer::system_timer,
        },
        state,
        synchronization::interface::Mutex,
        task, warn,
    };

    /// Undefined/abort handlers get small dedicated stacks off the top
    /// of the heap window.
    const EXCEPTION_STACK_SIZE: usize = 4096;

    /// Early kernel init, called from the boot stub with `.bss` zeroed
    /// and IRQs masked. Ends by handing the CPU to the first task.
    ///
    /// # Safety
    ///
    /// Runs exactly once, on the boot core.
    #[no_mangle]
    pub unsafe extern "Rust" fn kernel_init() -> ! {
        // Console first; everything after can print.
        uart().init().expect("UART bring-up");
        console::register_console(uart());
        info!("{} booting", larch::version());

        // Translation tables and page allocators over the fixed memory
        // map, then the heap between the boot carve-outs and the
        // stacks.
        unsafe { memory::init(boot::code_end()) };
        info!("[i] page tables and allocators up");

        unsafe { memory::heap::init(memory_map::HEAP_START, memory_map::HEAP_END) };

        #[cfg(feature = "verbose")]
        {
            let (free_phys, free_virt) = memory::page_allocator().lock(|m| m.free_pages());
            info!("[i] free pages: {} physical, {} virtual", free_phys, free_virt);
            let stats = memory::heap::kmemstats();
            info!("[i] heap: {} bytes mounted", stats.heap_size);
            memory::heap::kernel_heap().lock(|heap| {
                heap.walk_free(|addr, _, reserved| {
                    info!("[i]   free block {:#010x} +{}", addr, reserved);
                });
            });
        }

        // Exception plumbing: fatal-mode stacks, vector table.
        let (undef_stack, abort_stack) = memory::heap::kernel_heap().lock(|heap| {
            let undef = heap
                .bounds_mut()
                .try_reserve_topdown(EXCEPTION_STACK_SIZE)
                .expect("undef stack carve");
            let abort = heap
                .bounds_mut()
                .try_reserve_topdown(EXCEPTION_STACK_SIZE)
                .expect("abort stack carve");
            (undef, abort)
        });
        unsafe { exception::handling_init(undef_stack, abort_stack) };
        info!("[!] exception traps set up");

        // Devices: timer armed, both IRQ lines routed.
        system_timer().init();
        interrupt_controller().enable_uart();

        match mailbox().board_serial() {
            Ok(serial) => info!("[i] board serial: {:#018x}", serial),
            Err(e) => warn!("[i] board serial unavailable: {}", e),
        }

        info!("Welcome to \x1b[0;33mlarch\x1b[0m!");
        console::console().flush();

        // From here on the scheduler owns the CPU.
        state::state_manager().transition_to_scheduling();
        task::init()
    }

    use core::panic::PanicInfo;

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        larch::panic_support::handler(info)
    }
}

/// Host builds only exist so `cargo test` can link the workspace; the
/// kernel proper is the `target_os = "none"` build.
#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("larch is a kernel image; build it for the ARM target");
}
