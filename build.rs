/// Hook up the kernel linker script, but only when building for the ARM
/// target. Host builds (unit tests) must stay free of it.

const LINKER_SCRIPT: &str = "src/platform/raspberrypi/linker/kernel.ld";

fn main() {
    println!("cargo:rerun-if-changed={}", LINKER_SCRIPT);

    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if arch == "arm" && os == "none" {
        println!("cargo:rustc-link-arg=--script={}", LINKER_SCRIPT);
    }
}
