//! Support code for the kernel binary's panic handler.

use crate::{arch::aarch32::cpu, cpu::endless_sleep, println};
use core::panic::PanicInfo;

/// Dump everything a post-mortem reader wants: where the panic happened
/// and what the CPU looked like. Uses the polling console path only.
fn print_panic_info(info: &PanicInfo) {
    let (location, line, column) = match info.location() {
        Some(loc) => (loc.file(), loc.line(), loc.column()),
        _ => ("???", 0, 0),
    };

    let cpsr = cpu::current_cpsr();

    crate::info!(
        "Kernel panic!\n\n\
        Panic location:\n      File '{}', line {}, column {}\n\n\
        {}\n\n\
        {} sp: {:#010x} lr: {:#010x}",
        location,
        line,
        column,
        info.message(),
        cpsr,
        cpu::current_sp(),
        cpu::current_lr(),
    );
}

/// The actual panic path: mask IRQs, print once, halt.
pub fn handler(info: &PanicInfo) -> ! {
    unsafe { cpu::irq_mask() };

    // Protect against panic infinite loops if any of the following code
    // panics itself.
    panic_prevent_reenter();
    print_panic_info(info);
    endless_sleep()
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Stop immediately if called a second time.
///
/// Atomics are safe here even with caching off; loads and stores lower to
/// plain instructions on this core.
fn panic_prevent_reenter() {
    use core::sync::atomic::{AtomicBool, Ordering};

    static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

    if !PANIC_IN_PROGRESS.load(Ordering::Relaxed) {
        PANIC_IN_PROGRESS.store(true, Ordering::Relaxed);

        return;
    }

    println!("\nnested panic, halting");
    endless_sleep()
}
