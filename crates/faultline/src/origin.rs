//! Who sent a signal: the kernel, reporting a fault, or a user-space caller.

/// Sender of a delivered signal, derived from `si_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOrigin {
    /// Raised by the kernel for a fault in this thread (`si_code > 0`).
    Kernel,
    /// Sent by `kill`, `tgkill`, `sigqueue`, `raise` or `abort` (`si_code <= 0`).
    User,
}

impl SignalOrigin {
    pub fn of(info: &libc::siginfo_t) -> Self {
        Self::from_code(info.si_code)
    }

    pub fn from_code(si_code: libc::c_int) -> Self {
        if si_code <= 0 {
            SignalOrigin::User
        } else {
            SignalOrigin::Kernel
        }
    }
}

/// Whether the signal described by `info` can be redelivered safely.
///
/// Only abort and user-sent signals qualify; redelivering a kernel fault
/// synthetically would lose the faulting context and may refire forever.
pub fn is_forwardable(info: &libc::siginfo_t) -> bool {
    info.si_signo == libc::SIGABRT || SignalOrigin::of(info) == SignalOrigin::User
}

#[cfg(test)]
pub(crate) fn siginfo(signo: libc::c_int, code: libc::c_int) -> libc::siginfo_t {
    // SAFETY: siginfo_t is plain old data.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    info.si_signo = signo;
    info.si_code = code;
    info
}
