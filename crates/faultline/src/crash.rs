//! Crash signal manager.
//!
//! Installs one shared handler for every signal in [`CRASH_SIGNALS`], running
//! on a dedicated alternate stack, and remembers what each signal had before
//! so it can be restored or chained to later.
//!
//! `register`, `unregister` and `ignore` mutate process-wide state without a
//! lock. They must be called from one controlling thread and never
//! concurrently with each other. `ignore`, `unregister` and `forward` are
//! async-signal-safe and may be called from inside the installed handler.

use crate::altstack;
use crate::error::{SignalError, SignalResult};
use crate::origin::is_forwardable;
use crate::slots::{CRASH_SIGNALS, SLOT_COUNT, SetupCell, SignalSlot, SlotSet, initial_slots};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{getpid, gettid};

/// Callback invoked with the signal number, the fault metadata and the
/// interrupted machine context (`ucontext_t`).
///
/// It runs inside a signal handler and must be async-signal-safe: no heap
/// allocation, no locks shared with normal program threads.
pub type CrashHandler = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

struct CrashState {
    slots: [SignalSlot; SLOT_COUNT],
}

impl CrashState {
    const fn new() -> Self {
        Self {
            slots: initial_slots(),
        }
    }

    /// Installs `action` slot by slot, saving what each had before.
    ///
    /// Stops at the first failure; earlier slots keep the new handler.
    fn install(&mut self, action: &SigAction) -> SignalResult<()> {
        let mut installed = SlotSet::empty();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            // SAFETY: the caller of `register` vouches for the handler.
            match unsafe { signal::sigaction(slot.signal, action) } {
                Ok(previous) => {
                    slot.previous = Some(previous);
                    installed.insert(index);
                }
                Err(errno) => {
                    return Err(SignalError::Install {
                        signal: slot.signal,
                        installed,
                        errno,
                    });
                }
            }
        }
        Ok(())
    }

    /// Reinstalls every saved disposition, continuing past failures.
    fn restore(&self) -> SignalResult<()> {
        // SAFETY: each saved action was returned by the kernel for its signal.
        unsafe {
            reset_each(
                self.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(index, slot)| Some((index, slot.signal, slot.previous?))),
            )
        }
    }
}

/// Installs each `(slot index, signal, action)`, attempting all of them and
/// collecting the slots that failed.
///
/// # Safety
///
/// Every action must be safe to install for its signal.
unsafe fn reset_each(
    entries: impl Iterator<Item = (usize, Signal, SigAction)>,
) -> SignalResult<()> {
    let mut failed = SlotSet::empty();
    let mut last_errno = Errno::UnknownErrno;
    for (index, signal, action) in entries {
        if let Err(errno) = unsafe { signal::sigaction(signal, &action) } {
            failed.insert(index);
            last_errno = errno;
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(SignalError::Restore {
            failed,
            errno: last_errno,
        })
    }
}

static CRASH_STATE: SetupCell<CrashState> = SetupCell::new(CrashState::new());

/// Installs `handler` for every crash signal.
///
/// Allocates the alternate stack on first use and declares it for the
/// calling thread before any handler is installed. The handler runs with all
/// signals blocked, on the alternate stack, with `SA_RESTART` and
/// `SA_SIGINFO`.
///
/// Calling this again without [`unregister`] in between overwrites the saved
/// dispositions with the ones installed by the previous call, so the original
/// baseline is lost.
///
/// # Errors
///
/// [`SignalError::NoMemory`] if the stack cannot be allocated,
/// [`SignalError::AltStack`] if it cannot be declared (nothing is installed),
/// [`SignalError::Install`] if a slot fails. Slots installed before the
/// failure are left in place and listed in the error.
///
/// # Safety
///
/// `handler` must be async-signal-safe. Must not run concurrently with any
/// other function of this module or with an in-flight crash handler.
pub unsafe fn register(handler: CrashHandler) -> SignalResult<()> {
    altstack::install_for_current_thread()?;

    let action = SigAction::new(
        SigHandler::SigAction(handler),
        SaFlags::SA_ONSTACK | SaFlags::SA_RESTART | SaFlags::SA_SIGINFO,
        SigSet::all(),
    );
    // SAFETY: single controlling thread, guaranteed by the caller.
    unsafe { CRASH_STATE.with(|state| state.install(&action)) }
}

/// Restores every crash signal to the disposition saved by the last
/// [`register`].
///
/// Every slot is attempted even if an earlier one fails. Slots that were
/// never registered are left alone.
///
/// # Safety
///
/// Same as [`register`].
pub unsafe fn unregister() -> SignalResult<()> {
    // SAFETY: single controlling thread, guaranteed by the caller.
    unsafe { CRASH_STATE.with(|state| state.restore()) }
}

/// Resets every crash signal to the default action (process termination).
///
/// Meant as a last resort inside a crash handler: after this, a second fault
/// terminates the process instead of re-entering the handler. Saved
/// dispositions are kept, so [`unregister`] still restores them.
///
/// # Safety
///
/// Must not run concurrently with [`register`] or [`unregister`].
pub unsafe fn ignore() -> SignalResult<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: installing SIG_DFL has no handler requirements.
    unsafe {
        reset_each(
            CRASH_SIGNALS
                .iter()
                .enumerate()
                .map(|(index, &signal)| (index, signal, action)),
        )
    }
}

/// Redelivers the signal described by `info` to the current thread, so a
/// handler chained ahead of this one still sees it.
///
/// Only abort and signals sent from user space are redelivered; kernel
/// faults are left alone and this returns `Ok(())` without doing anything.
/// The redelivered signal stays pending until the current handler returns.
pub fn forward(info: &libc::siginfo_t) -> SignalResult<()> {
    forward_with(info, queue_to_current_thread)
}

fn forward_with(
    info: &libc::siginfo_t,
    queue: impl FnOnce(&libc::siginfo_t) -> Result<(), Errno>,
) -> SignalResult<()> {
    if !is_forwardable(info) {
        return Ok(());
    }
    queue(info).map_err(|errno| SignalError::Forward {
        signal: info.si_signo,
        errno,
    })
}

fn queue_to_current_thread(info: &libc::siginfo_t) -> Result<(), Errno> {
    // SAFETY: rt_tgsigqueueinfo only reads `info`.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_rt_tgsigqueueinfo,
            getpid().as_raw(),
            gettid().as_raw(),
            info.si_signo,
            info as *const libc::siginfo_t,
        )
    };
    Errno::result(rc).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::altstack::alt_stack_range;
    use crate::disposition::{Disposition, disposition};
    use crate::origin::siginfo;
    use serial_test::serial;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    static CAUGHT: AtomicUsize = AtomicUsize::new(0);
    static LAST_SIGNO: AtomicI32 = AtomicI32::new(0);
    static LAST_SP: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn record(signo: libc::c_int, _: *mut libc::siginfo_t, _: *mut libc::c_void) {
        let marker = 0u8;
        LAST_SP.store(std::ptr::addr_of!(marker) as usize, Ordering::SeqCst);
        LAST_SIGNO.store(signo, Ordering::SeqCst);
        CAUGHT.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot() -> Vec<Disposition> {
        CRASH_SIGNALS
            .iter()
            .map(|&s| disposition(s).unwrap())
            .collect()
    }

    /// Saves the raw dispositions and puts them back on drop, so a failing
    /// test cannot leak handlers into the rest of the suite.
    struct Baseline(Vec<(Signal, libc::sigaction)>);

    impl Baseline {
        fn capture() -> Self {
            let saved = CRASH_SIGNALS
                .iter()
                .map(|&s| {
                    let mut raw: libc::sigaction = unsafe { std::mem::zeroed() };
                    let rc = unsafe { libc::sigaction(s as libc::c_int, std::ptr::null(), &mut raw) };
                    assert_eq!(rc, 0);
                    (s, raw)
                })
                .collect();
            Baseline(saved)
        }
    }

    impl Drop for Baseline {
        fn drop(&mut self) {
            for (s, raw) in &self.0 {
                unsafe { libc::sigaction(*s as libc::c_int, raw, std::ptr::null_mut()) };
            }
        }
    }

    #[test]
    #[serial]
    fn test_register_then_unregister_restores_baseline() {
        let _baseline = Baseline::capture();
        let before = snapshot();

        unsafe { register(record) }.unwrap();
        for &s in &CRASH_SIGNALS {
            let current = disposition(s).unwrap();
            assert!(current.runs(record));
            assert!(current.flags().contains(
                SaFlags::SA_ONSTACK | SaFlags::SA_RESTART | SaFlags::SA_SIGINFO
            ));
            assert!(current.mask().contains(Signal::SIGTERM));
        }

        unsafe { unregister() }.unwrap();
        assert_eq!(snapshot(), before);
    }

    #[test]
    #[serial]
    fn test_double_register_keeps_first_handler_as_baseline() {
        let _baseline = Baseline::capture();
        let before = snapshot();

        unsafe { register(record) }.unwrap();
        unsafe { register(record) }.unwrap();
        unsafe { unregister() }.unwrap();

        // The second register saved our own handler as "previous".
        let after = snapshot();
        assert_ne!(after, before);
        for current in after {
            assert!(current.runs(record));
            assert!(current.flags().contains(SaFlags::SA_ONSTACK));
        }
    }

    #[test]
    #[serial]
    fn test_handler_runs_on_alternate_stack() {
        let _baseline = Baseline::capture();
        CAUGHT.store(0, Ordering::SeqCst);

        unsafe { register(record) }.unwrap();
        unsafe { libc::raise(libc::SIGSEGV) };
        unsafe { unregister() }.unwrap();

        assert_eq!(CAUGHT.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_SIGNO.load(Ordering::SeqCst), libc::SIGSEGV);
        let range = alt_stack_range().expect("alternate stack allocated");
        assert!(
            range.contains(&LAST_SP.load(Ordering::SeqCst)),
            "handler stack pointer outside {range:x?}"
        );
    }

    #[test]
    #[serial]
    fn test_ignore_installs_default_action() {
        let _baseline = Baseline::capture();

        unsafe { register(record) }.unwrap();
        unsafe { ignore() }.unwrap();
        for &s in &CRASH_SIGNALS {
            let current = disposition(s).unwrap();
            assert!(current.is_default(), "{s} not reset to SIG_DFL");
            assert!(current.flags().contains(SaFlags::SA_RESTART));
            assert!(!current.flags().contains(SaFlags::SA_ONSTACK));
            assert!(!current.mask().contains(Signal::SIGTERM));
        }
    }

    #[test]
    #[serial]
    fn test_unregister_after_ignore_restores_saved() {
        let _baseline = Baseline::capture();
        let before = snapshot();

        unsafe { register(record) }.unwrap();
        unsafe { ignore() }.unwrap();
        unsafe { unregister() }.unwrap();
        assert_eq!(snapshot(), before);
    }

    fn record_action() -> SigAction {
        SigAction::new(
            SigHandler::SigAction(record),
            SaFlags::SA_ONSTACK | SaFlags::SA_SIGINFO,
            SigSet::all(),
        )
    }

    #[test]
    #[serial]
    fn test_install_stops_at_first_failure() {
        let _baseline = Baseline::capture();
        let before = snapshot();

        let mut state = CrashState::new();
        state.slots[2].signal = Signal::SIGKILL;

        let mut installed = SlotSet::empty();
        installed.insert(0);
        installed.insert(1);
        assert_eq!(
            state.install(&record_action()),
            Err(SignalError::Install {
                signal: Signal::SIGKILL,
                installed,
                errno: Errno::EINVAL,
            })
        );

        assert!(state.slots[..2].iter().all(|slot| slot.previous.is_some()));
        assert!(state.slots[2..].iter().all(|slot| slot.previous.is_none()));
        let after = snapshot();
        assert!(after[0].runs(record));
        assert!(after[1].runs(record));
        assert_eq!(after[2..], before[2..]);
    }

    #[test]
    #[serial]
    fn test_restore_attempts_every_slot() {
        let _baseline = Baseline::capture();
        let before = snapshot();

        let mut state = CrashState::new();
        state.install(&record_action()).unwrap();
        // The saved action for slot 2 now targets a signal that cannot be caught.
        state.slots[2].signal = Signal::SIGKILL;

        let mut failed = SlotSet::empty();
        failed.insert(2);
        assert_eq!(
            state.restore(),
            Err(SignalError::Restore {
                failed,
                errno: Errno::EINVAL,
            })
        );

        let after = snapshot();
        for (index, (b, a)) in before.iter().zip(&after).enumerate() {
            if index == 2 {
                assert!(a.runs(record), "slot 2 should keep the installed handler");
            } else {
                assert_eq!(a, b, "slot {index} not restored");
            }
        }
    }

    #[test]
    fn test_restore_without_register_is_noop() {
        let state = CrashState::new();
        assert_eq!(state.restore(), Ok(()));
    }

    #[test]
    fn test_forward_skips_kernel_faults() {
        let calls = Cell::new(0);
        let info = siginfo(libc::SIGSEGV, 1);
        let result = forward_with(&info, |_| {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_forward_queues_abort_once() {
        let calls = Cell::new(0);
        let info = siginfo(libc::SIGABRT, libc::SI_TKILL);
        let result = forward_with(&info, |queued| {
            assert_eq!(queued.si_signo, libc::SIGABRT);
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_forward_queues_user_sent_signal_once() {
        let calls = Cell::new(0);
        let info = siginfo(libc::SIGSEGV, libc::SI_USER);
        forward_with(&info, |_| {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_forward_reports_queue_failure() {
        let info = siginfo(libc::SIGBUS, libc::SI_QUEUE);
        let result = forward_with(&info, |_| Err(Errno::EAGAIN));
        assert_eq!(
            result,
            Err(SignalError::Forward {
                signal: libc::SIGBUS,
                errno: Errno::EAGAIN
            })
        );
    }

    #[test]
    #[serial]
    fn test_forward_redelivers_to_current_thread() {
        let _baseline = Baseline::capture();
        CAUGHT.store(0, Ordering::SeqCst);

        unsafe { register(record) }.unwrap();
        let info = siginfo(libc::SIGTRAP, libc::SI_QUEUE);
        forward(&info).unwrap();
        unsafe { unregister() }.unwrap();

        assert_eq!(CAUGHT.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_SIGNO.load(Ordering::SeqCst), libc::SIGTRAP);
    }
}
