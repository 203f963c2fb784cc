//! Trace signal manager.
//!
//! Lets an external actor request a diagnostic snapshot of a healthy process
//! by sending [`TRACE_SIGNAL`]. Independent of the crash registry: the two can
//! be registered and unregistered separately.

use crate::crash::CrashHandler;
use crate::error::{SignalError, SignalResult};
use crate::slots::{SetupCell, SlotSet};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};

/// Signal used to request a snapshot.
pub const TRACE_SIGNAL: Signal = Signal::SIGQUIT;

struct TraceState {
    previous_mask: Option<SigSet>,
    previous: Option<SigAction>,
}

static TRACE_STATE: SetupCell<TraceState> = SetupCell::new(TraceState {
    previous_mask: None,
    previous: None,
});

fn trace_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(TRACE_SIGNAL);
    set
}

/// Unblocks [`TRACE_SIGNAL`] for the calling thread and installs `handler`
/// for it, saving the previous mask and disposition.
///
/// Only the calling thread's mask changes. Call this from the main thread
/// (or whichever thread should receive the signal); other threads that block
/// the signal keep blocking it.
///
/// The handler runs with all signals blocked and `SA_RESTART`, on the
/// interrupted thread's own stack.
///
/// # Errors
///
/// [`SignalError::Mask`] if the mask cannot be changed,
/// [`SignalError::Install`] if the handler cannot be installed, in which case
/// the mask change is rolled back first.
///
/// # Safety
///
/// `handler` must be async-signal-safe. Must not run concurrently with
/// [`unregister_trace`] or an in-flight trace handler.
pub unsafe fn register_trace(handler: CrashHandler) -> SignalResult<()> {
    let mut previous_mask = SigSet::empty();
    signal::pthread_sigmask(
        SigmaskHow::SIG_UNBLOCK,
        Some(&trace_set()),
        Some(&mut previous_mask),
    )
    .map_err(|errno| SignalError::Mask { errno })?;

    let action = SigAction::new(
        SigHandler::SigAction(handler),
        SaFlags::SA_RESTART | SaFlags::SA_SIGINFO,
        SigSet::all(),
    );
    // SAFETY: the caller vouches for the handler.
    match unsafe { signal::sigaction(TRACE_SIGNAL, &action) } {
        Ok(previous) => {
            // SAFETY: single controlling thread, guaranteed by the caller.
            unsafe {
                TRACE_STATE.with(|state| {
                    state.previous_mask = Some(previous_mask);
                    state.previous = Some(previous);
                });
            }
            Ok(())
        }
        Err(errno) => {
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous_mask), None);
            Err(SignalError::Install {
                signal: TRACE_SIGNAL,
                installed: SlotSet::empty(),
                errno,
            })
        }
    }
}

/// Restores the mask and disposition saved by [`register_trace`].
///
/// Failures are ignored. Does nothing if the trace handler was never
/// registered.
///
/// # Safety
///
/// Must not run concurrently with [`register_trace`].
pub unsafe fn unregister_trace() {
    // SAFETY: single controlling thread, guaranteed by the caller.
    let (previous_mask, previous) =
        unsafe { TRACE_STATE.with(|state| (state.previous_mask, state.previous)) };

    if let Some(mask) = previous_mask {
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&mask), None);
    }
    if let Some(action) = previous {
        // SAFETY: `action` was returned by the kernel for this signal.
        let _ = unsafe { signal::sigaction(TRACE_SIGNAL, &action) };
    }
}
