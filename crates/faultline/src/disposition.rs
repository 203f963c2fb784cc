//! Read-only view of what the OS will do when a signal is delivered.

use crate::crash::CrashHandler;
use crate::error::{SignalError, SignalResult};
use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigSet, Signal};
use std::ptr;

/// Snapshot of a signal's disposition: handler address, flags and the mask
/// blocked while the handler runs.
///
/// Equality is bit-exact: flag bits nix has no name for and realtime signals
/// in the mask both count.
#[derive(Debug, Clone, Copy)]
pub struct Disposition {
    handler: libc::sighandler_t,
    raw_flags: libc::c_int,
    mask: SigSet,
    /// Bit `n - 1` set when signal `n` is blocked, for `1..=SIGRTMAX`.
    blocked: u128,
}

impl Disposition {
    /// Raw handler address, or `SIG_DFL`/`SIG_IGN`.
    pub fn handler(&self) -> libc::sighandler_t {
        self.handler
    }

    /// Whether `handler` is the installed `SA_SIGINFO` handler.
    pub fn runs(&self, handler: CrashHandler) -> bool {
        self.handler == handler as *const () as libc::sighandler_t
    }

    /// Flags nix knows about. See [`Disposition::raw_flags`] for the rest.
    pub fn flags(&self) -> SaFlags {
        SaFlags::from_bits_truncate(self.raw_flags)
    }

    pub fn raw_flags(&self) -> libc::c_int {
        self.raw_flags
    }

    /// Standard signals blocked while the handler runs.
    pub fn mask(&self) -> &SigSet {
        &self.mask
    }

    /// Whether signal number `signo`, realtime ones included, is blocked
    /// while the handler runs.
    pub fn blocks(&self, signo: libc::c_int) -> bool {
        (1..=128).contains(&signo) && self.blocked & (1u128 << (signo - 1)) != 0
    }

    pub fn is_default(&self) -> bool {
        self.handler == libc::SIG_DFL
    }

    pub fn is_ignored(&self) -> bool {
        self.handler == libc::SIG_IGN
    }
}

impl PartialEq for Disposition {
    fn eq(&self, other: &Self) -> bool {
        self.handler == other.handler
            && self.raw_flags == other.raw_flags
            && self.blocked == other.blocked
    }
}

impl Eq for Disposition {}

/// Reads the current disposition of `signal` without changing it.
pub fn disposition(signal: Signal) -> SignalResult<Disposition> {
    // SAFETY: sigaction is plain old data and a null new action only queries.
    let mut raw: libc::sigaction = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sigaction(signal as libc::c_int, ptr::null(), &mut raw) };
    Errno::result(rc).map_err(|errno| SignalError::Query { signal, errno })?;

    let mut mask = SigSet::empty();
    let mut blocked = 0u128;
    for signo in 1..=libc::SIGRTMAX().min(128) {
        // SAFETY: `raw.sa_mask` was filled in by the kernel.
        if unsafe { libc::sigismember(&raw.sa_mask, signo) } == 1 {
            blocked |= 1u128 << (signo - 1);
            if let Ok(s) = Signal::try_from(signo) {
                mask.add(s);
            }
        }
    }

    Ok(Disposition {
        handler: raw.sa_sigaction,
        raw_flags: raw.sa_flags,
        mask,
        blocked,
    })
}
