//! The fixed crash-signal registry and the process-wide state it lives in.

use nix::sys::signal::{SigAction, Signal};
use std::cell::UnsafeCell;
use std::fmt;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, Ordering};

/// Signals that indicate an unrecoverable fault, in installation order.
#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips32r6",
    target_arch = "mips64",
    target_arch = "mips64r6",
    target_arch = "sparc64"
)))]
pub const CRASH_SIGNALS: [Signal; 8] = [
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGSEGV,
    Signal::SIGTRAP,
    Signal::SIGSYS,
    Signal::SIGSTKFLT,
];

/// Signals that indicate an unrecoverable fault, in installation order.
///
/// These architectures have no `SIGSTKFLT`.
#[cfg(any(
    target_arch = "mips",
    target_arch = "mips32r6",
    target_arch = "mips64",
    target_arch = "mips64r6",
    target_arch = "sparc64"
))]
pub const CRASH_SIGNALS: [Signal; 7] = [
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGSEGV,
    Signal::SIGTRAP,
    Signal::SIGSYS,
];

pub(crate) const SLOT_COUNT: usize = CRASH_SIGNALS.len();

/// Position of `signal` in [`CRASH_SIGNALS`].
pub fn slot_index(signal: Signal) -> Option<usize> {
    CRASH_SIGNALS.iter().position(|&s| s == signal)
}

/// One monitored crash signal and the disposition it had before registration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SignalSlot {
    pub signal: Signal,
    /// `None` until the first successful install into this slot.
    pub previous: Option<SigAction>,
}

impl SignalSlot {
    const fn new(signal: Signal) -> Self {
        Self {
            signal,
            previous: None,
        }
    }
}

/// Builds the slot table in [`CRASH_SIGNALS`] order.
pub(crate) const fn initial_slots() -> [SignalSlot; SLOT_COUNT] {
    let mut slots = [SignalSlot::new(Signal::SIGABRT); SLOT_COUNT];
    let mut i = 0;
    while i < SLOT_COUNT {
        slots[i] = SignalSlot::new(CRASH_SIGNALS[i]);
        i += 1;
    }
    slots
}

/// A set of crash-registry slots, used to report how far a multi-slot
/// operation got.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SlotSet(u16);

impl SlotSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub(crate) fn insert(&mut self, index: usize) {
        debug_assert!(index < SLOT_COUNT);
        self.0 |= 1 << index;
    }

    pub fn contains(&self, signal: Signal) -> bool {
        slot_index(signal).is_some_and(|index| self.0 & (1 << index) != 0)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Signals in the set, in registry order.
    pub fn iter(&self) -> impl Iterator<Item = Signal> + '_ {
        CRASH_SIGNALS
            .iter()
            .enumerate()
            .filter(|(index, _)| self.0 & (1 << index) != 0)
            .map(|(_, &signal)| signal)
    }
}

impl fmt::Debug for SlotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Process-wide state with a single writer and no lock.
///
/// Registration runs on one controlling thread; the signal-delivery path only
/// reads. A lock cannot be used because a handler may interrupt the thread
/// holding it. Debug builds assert that accesses never overlap.
pub(crate) struct SetupCell<T> {
    value: UnsafeCell<T>,
    #[cfg(debug_assertions)]
    busy: AtomicBool,
}

// SAFETY: callers of `SetupCell::with` guarantee exclusive access.
unsafe impl<T: Send> Sync for SetupCell<T> {}

impl<T> SetupCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            #[cfg(debug_assertions)]
            busy: AtomicBool::new(false),
        }
    }

    /// Runs `f` with exclusive access to the value.
    ///
    /// # Safety
    ///
    /// No other thread and no signal handler may access the cell while `f`
    /// runs.
    pub(crate) unsafe fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        #[cfg(debug_assertions)]
        {
            let was_busy = self.busy.swap(true, Ordering::Acquire);
            debug_assert!(!was_busy, "overlapping access to signal registry state");
        }

        // SAFETY: exclusivity is guaranteed by the caller.
        let result = f(unsafe { &mut *self.value.get() });

        #[cfg(debug_assertions)]
        self.busy.store(false, Ordering::Release);

        result
    }
}
