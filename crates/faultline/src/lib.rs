//! Crash and trace signal interception for native code in a long-lived
//! process.
//!
//! The crash manager installs one async-signal-safe handler for every fatal
//! signal on a dedicated alternate stack, keeps what was installed before so
//! it can be restored, and can redeliver user-sent signals to whatever handler
//! was chained ahead of it. The trace manager owns a single signal an external
//! actor can send to request a diagnostic snapshot without crashing the
//! process.
//!
//! Nothing here logs, allocates inside a handler or takes a lock. What the
//! handler does with a crash (spawning a collector, writing a report) is up
//! to the caller.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod altstack;
mod crash;
mod disposition;
mod error;
mod origin;
mod slots;
mod trace;

pub use altstack::{ALT_STACK_SIZE, alt_stack_range};
pub use crash::{CrashHandler, forward, ignore, register, unregister};
pub use disposition::{Disposition, disposition};
pub use error::*;
pub use origin::{SignalOrigin, is_forwardable};
pub use slots::{CRASH_SIGNALS, SlotSet, slot_index};
pub use trace::{TRACE_SIGNAL, register_trace, unregister_trace};

pub use nix::sys::signal::Signal;
