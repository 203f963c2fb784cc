//! The dedicated stack crash handlers run on.
//!
//! The stack is allocated once, on the first registration, and is never
//! freed: a signal may be delivered on it at any point until the process
//! exits.

use crate::error::{SignalError, SignalResult};
use nix::errno::Errno;
use std::alloc::{Layout, alloc_zeroed};
use std::ops::Range;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Size of the alternate signal stack.
pub const ALT_STACK_SIZE: usize = 128 * 1024;

const ALT_STACK_ALIGN: usize = 16;

static ALT_STACK: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());

/// Returns the alternate stack, allocating it on first use.
fn ensure_allocated() -> SignalResult<*mut u8> {
    let existing = ALT_STACK.load(Ordering::Acquire);
    if !existing.is_null() {
        return Ok(existing);
    }

    let layout = Layout::from_size_align(ALT_STACK_SIZE, ALT_STACK_ALIGN)
        .map_err(|_| SignalError::NoMemory)?;
    // SAFETY: the layout has a non-zero size.
    let base = unsafe { alloc_zeroed(layout) };
    if base.is_null() {
        return Err(SignalError::NoMemory);
    }
    ALT_STACK.store(base, Ordering::Release);
    Ok(base)
}

/// Allocates the alternate stack if needed and declares it for the calling
/// thread.
///
/// Other threads keep whatever alternate stack they had declared themselves.
pub(crate) fn install_for_current_thread() -> SignalResult<()> {
    let base = ensure_allocated()?;
    let stack = libc::stack_t {
        ss_sp: base.cast(),
        ss_flags: 0,
        ss_size: ALT_STACK_SIZE,
    };
    // SAFETY: `stack` describes a live allocation that is never freed.
    let rc = unsafe { libc::sigaltstack(&stack, ptr::null_mut()) };
    Errno::result(rc).map_err(|errno| SignalError::AltStack { errno })?;
    Ok(())
}

/// Address range of the alternate stack, once it has been allocated.
///
/// Async-signal-safe: a handler can compare the address of one of its locals
/// against this range to tell whether it is running on the alternate stack.
pub fn alt_stack_range() -> Option<Range<usize>> {
    let base = ALT_STACK.load(Ordering::Acquire);
    if base.is_null() {
        return None;
    }
    let start = base as usize;
    Some(start..start + ALT_STACK_SIZE)
}
