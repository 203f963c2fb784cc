//! Signal handlers installed by the probe.
//!
//! Everything reachable from `on_crash` and `on_trace` is async-signal-safe:
//! no allocation, no `log`, no std I/O. Lines are formatted into a stack
//! buffer and written to stderr with a raw `write(2)`.

use crate::cli::CrashPolicy;
use faultline::SignalOrigin;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Exit status used by [`CrashPolicy::Exit`].
pub const CRASH_EXIT_CODE: i32 = 70;

static POLICY: AtomicU8 = AtomicU8::new(CrashPolicy::Exit as u8);
static TRACE_REQUESTS: AtomicU32 = AtomicU32::new(0);

pub fn set_policy(policy: CrashPolicy) {
    POLICY.store(policy as u8, Ordering::SeqCst);
}

fn policy() -> CrashPolicy {
    match POLICY.load(Ordering::SeqCst) {
        p if p == CrashPolicy::Disarm as u8 => CrashPolicy::Disarm,
        p if p == CrashPolicy::Forward as u8 => CrashPolicy::Forward,
        p if p == CrashPolicy::Return as u8 => CrashPolicy::Return,
        _ => CrashPolicy::Exit,
    }
}

pub fn trace_requests() -> u32 {
    TRACE_REQUESTS.load(Ordering::SeqCst)
}

pub extern "C" fn on_crash(signo: libc::c_int, info: *mut libc::siginfo_t, _: *mut libc::c_void) {
    // SAFETY: the kernel passes a valid siginfo_t with SA_SIGINFO.
    let info = unsafe { info.as_ref() };

    let marker = 0u8;
    let sp = std::ptr::addr_of!(marker) as usize;
    let on_stack = faultline::alt_stack_range().is_some_and(|range| range.contains(&sp));

    let mut line = Line::new();
    line.push_str("caught signo=");
    line.push_int(signo as i64);
    line.push_str(" origin=");
    line.push_str(match info.map(SignalOrigin::of) {
        Some(SignalOrigin::Kernel) => "kernel",
        Some(SignalOrigin::User) => "user",
        None => "unknown",
    });
    line.push_str(" onstack=");
    line.push_str(if on_stack { "yes" } else { "no" });
    line.push_str("\n");
    line.write_to(libc::STDERR_FILENO);

    match policy() {
        CrashPolicy::Exit => unsafe { libc::_exit(CRASH_EXIT_CODE) },
        CrashPolicy::Disarm => {
            // The re-raised signal stays blocked until we return, then the
            // default action terminates the process.
            let _ = unsafe { faultline::ignore() };
            unsafe { libc::raise(signo) };
        }
        CrashPolicy::Forward => {
            let _ = unsafe { faultline::unregister() };
            if let Some(info) = info {
                let _ = faultline::forward(info);
            }
        }
        CrashPolicy::Return => {
            // A kernel fault would fire again on the same instruction.
            if info.map(SignalOrigin::of) == Some(SignalOrigin::Kernel) {
                let _ = unsafe { faultline::ignore() };
            }
        }
    }
}

pub extern "C" fn on_trace(_: libc::c_int, _: *mut libc::siginfo_t, _: *mut libc::c_void) {
    let count = TRACE_REQUESTS.fetch_add(1, Ordering::SeqCst) + 1;

    let mut line = Line::new();
    line.push_str("snapshot requested #");
    line.push_int(count as i64);
    line.push_str("\n");
    line.write_to(libc::STDERR_FILENO);
}

/// Fixed-size line buffer; input past the end is dropped.
struct Line {
    buf: [u8; 128],
    len: usize,
}

impl Line {
    fn new() -> Self {
        Self {
            buf: [0; 128],
            len: 0,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }

    fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    fn push_int(&mut self, value: i64) {
        if value < 0 {
            self.push_bytes(b"-");
        }
        let mut magnitude = value.unsigned_abs();
        let mut digits = [0u8; 20];
        let mut start = digits.len();
        loop {
            start -= 1;
            digits[start] = b'0' + (magnitude % 10) as u8;
            magnitude /= 10;
            if magnitude == 0 {
                break;
            }
        }
        self.push_bytes(&digits[start..]);
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn write_to(&self, fd: libc::c_int) {
        let mut rest = self.as_bytes();
        while !rest.is_empty() {
            // SAFETY: `rest` points into our own buffer.
            let n = unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) };
            if n <= 0 {
                if n < 0 && nix::errno::Errno::last() == nix::errno::Errno::EINTR {
                    continue;
                }
                return;
            }
            rest = &rest[n as usize..];
        }
    }
}
