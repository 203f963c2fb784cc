//! Command-line interface definition using clap.

use clap::{Parser, Subcommand, ValueEnum};
use faultline::Signal;

/// Exercise faultline's crash and trace signal handling in a real process.
#[derive(Parser, Debug)]
#[command(name = "faultline-probe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// What the crash handler does after reporting a signal
    #[arg(
        long,
        value_enum,
        default_value_t = CrashPolicy::Exit,
        env = "FAULTLINE_ON_CRASH",
        global = true
    )]
    pub on_crash: CrashPolicy,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register the crash handler, then raise or provoke a crash signal
    Crash {
        /// Signal to deliver, e.g. `segv`, `SIGABRT` or `11`
        #[arg(value_parser = parse_crash_signal)]
        signal: Signal,

        /// Provoke a genuine fault instead of raising the signal
        ///
        /// Supported for SEGV, and for ILL and TRAP on x86_64 and aarch64.
        /// Other signals are raised.
        #[arg(long)]
        fault: bool,
    },
    /// Register the crash handler, then overflow the main thread's stack
    Overflow,
    /// Register the trace handler and request snapshots
    Trace {
        /// Number of snapshot requests the probe sends itself
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Wait for an external SIGQUIT instead of signalling ourselves
        #[arg(long, conflicts_with = "count")]
        wait: bool,

        /// How long `--wait` waits before giving up, in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Register and unregister the crash handler, then check every crash
    /// signal's disposition was restored
    Roundtrip,
}

/// What the installed crash handler does once it has reported a signal.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrashPolicy {
    /// Exit immediately with status 70
    Exit,
    /// Reset every crash signal to its default action and re-raise
    Disarm,
    /// Restore the previous handlers and redeliver the signal to them
    Forward,
    /// Return from the handler and let the process continue
    ///
    /// Kernel-sent faults are disarmed first, so the faulting instruction
    /// then terminates the process with the default action.
    Return,
}

/// Parses `segv`, `SIGSEGV` or `11` into one of the crash signals.
fn parse_crash_signal(value: &str) -> Result<Signal, String> {
    let signal = match value.parse::<i32>() {
        Ok(number) => Signal::try_from(number).map_err(|e| e.to_string())?,
        Err(_) => {
            let upper = value.to_ascii_uppercase();
            let name = if upper.starts_with("SIG") {
                upper
            } else {
                format!("SIG{upper}")
            };
            name.parse::<Signal>()
                .map_err(|_| format!("unknown signal '{value}'"))?
        }
    };

    if faultline::slot_index(signal).is_none() {
        return Err(format!("{signal} is not one of the crash signals"));
    }
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crash_signal_forms() {
        assert_eq!(parse_crash_signal("segv"), Ok(Signal::SIGSEGV));
        assert_eq!(parse_crash_signal("SIGABRT"), Ok(Signal::SIGABRT));
        assert_eq!(parse_crash_signal("4"), Ok(Signal::SIGILL));
    }

    #[test]
    fn test_parse_crash_signal_rejects_non_crash_signals() {
        assert!(parse_crash_signal("quit").is_err());
        assert!(parse_crash_signal("bogus").is_err());
        assert!(parse_crash_signal("999").is_err());
    }

    #[test]
    fn test_cli_policy_flag() {
        let cli = Cli::try_parse_from(["faultline-probe", "--on-crash", "forward", "crash", "abrt"])
            .unwrap();
        assert_eq!(cli.on_crash, CrashPolicy::Forward);
        assert!(matches!(
            cli.command,
            Commands::Crash {
                signal: Signal::SIGABRT,
                fault: false
            }
        ));
    }
}
