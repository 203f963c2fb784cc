//! Error types for faultline.

use crate::slots::SlotSet;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

/// Errors reported by the crash and trace signal managers.
///
/// Every variant is `Copy` and carries no heap data, so errors can be
/// produced and inspected from inside a signal handler.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// The alternate signal stack could not be allocated.
    #[error("out of memory allocating the alternate signal stack")]
    NoMemory,

    /// `sigaltstack` rejected the alternate stack.
    #[error("failed to declare the alternate signal stack: {errno}")]
    AltStack { errno: Errno },

    /// Installing a handler failed part way through the crash registry.
    ///
    /// Slots in `installed` already carry the new handler and are not
    /// rolled back.
    #[error("failed to install handler for {signal} ({} of the crash signals already installed): {errno}", .installed.len())]
    Install {
        signal: Signal,
        installed: SlotSet,
        errno: Errno,
    },

    /// One or more slots could not be reset. The remaining slots were still
    /// attempted; `errno` is from the last failure.
    #[error("failed to reset {} crash signal disposition(s) {failed:?}: {errno}", .failed.len())]
    Restore { failed: SlotSet, errno: Errno },

    /// Changing the calling thread's signal mask failed.
    #[error("failed to change the thread signal mask: {errno}")]
    Mask { errno: Errno },

    /// Directed redelivery of a signal to the current thread failed.
    #[error("failed to redeliver signal {signal}: {errno}")]
    Forward { signal: i32, errno: Errno },

    /// Reading the current disposition of a signal failed.
    #[error("failed to query disposition of {signal}: {errno}")]
    Query { signal: Signal, errno: Errno },
}

impl SignalError {
    /// The OS error code behind this error, `None` for [`SignalError::NoMemory`].
    pub fn errno(&self) -> Option<Errno> {
        match *self {
            SignalError::NoMemory => None,
            SignalError::AltStack { errno }
            | SignalError::Install { errno, .. }
            | SignalError::Restore { errno, .. }
            | SignalError::Mask { errno }
            | SignalError::Forward { errno, .. }
            | SignalError::Query { errno, .. } => Some(errno),
        }
    }
}

/// Result type for faultline operations.
pub type SignalResult<T> = Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_is_none_only_for_no_memory() {
        assert_eq!(SignalError::NoMemory.errno(), None);
        assert_eq!(
            SignalError::Mask {
                errno: Errno::EINVAL
            }
            .errno(),
            Some(Errno::EINVAL)
        );
        assert_eq!(
            SignalError::Forward {
                signal: libc::SIGABRT,
                errno: Errno::EPERM
            }
            .errno(),
            Some(Errno::EPERM)
        );
    }

    #[test]
    fn test_install_message_reports_progress() {
        let mut installed = SlotSet::empty();
        installed.insert(0);
        installed.insert(1);
        let err = SignalError::Install {
            signal: Signal::SIGFPE,
            installed,
            errno: Errno::EINVAL,
        };
        let message = err.to_string();
        assert!(message.contains("SIGFPE"), "message: {message}");
        assert!(message.contains("2 of the crash signals"), "message: {message}");
    }
}
