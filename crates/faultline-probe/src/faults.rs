//! Ways to make the probe crash.

use faultline::Signal;
use std::hint::black_box;

/// Delivers `signal` to the current thread.
///
/// With `fault`, SEGV (and ILL and TRAP where inline assembly is available)
/// are provoked by executing a faulting instruction, so the kernel is the
/// sender. Everything else is raised from user space.
pub fn trigger(signal: Signal, fault: bool) -> nix::Result<()> {
    if fault {
        match signal {
            Signal::SIGSEGV => {
                invalid_read();
                return Ok(());
            }
            #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
            Signal::SIGILL => {
                illegal_instruction();
                return Ok(());
            }
            #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
            Signal::SIGTRAP => {
                breakpoint();
                return Ok(());
            }
            _ => log::warn!("No fault available for {signal}, raising it instead"),
        }
    }
    nix::sys::signal::raise(signal)
}

fn invalid_read() {
    // The first page is never mapped.
    let address = black_box(16usize);
    // SAFETY: not safe at all; the read faults by design.
    let value = unsafe { std::ptr::read_volatile(address as *const u8) };
    black_box(value);
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn illegal_instruction() {
    // SAFETY: traps immediately.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!("ud2")
    };
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!("udf #0")
    };
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn breakpoint() {
    // SAFETY: traps immediately.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!("int3")
    };
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!("brk #0")
    };
}

/// Recurses until the stack guard page is hit.
pub fn overflow_stack(depth: u64) -> u64 {
    let mut frame = [0u8; 4096];
    frame[0] = depth as u8;
    black_box(&mut frame);
    if black_box(depth) == u64::MAX {
        return 0;
    }
    overflow_stack(depth + 1) + u64::from(frame[0])
}
