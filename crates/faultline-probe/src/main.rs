//! faultline-probe: a host process that exercises faultline end to end.

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("faultline-probe only supports Linux and Android");

mod cli;
mod faults;
mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use faultline::{CRASH_SIGNALS, Disposition, TRACE_SIGNAL};
use std::io::Write;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();
    log::debug!("Crash policy: {:?}", cli.on_crash);
    handlers::set_policy(cli.on_crash);

    match cli.command {
        Commands::Crash { signal, fault } => {
            install_crash_handler()?;
            log::info!("Delivering {signal} (fault: {fault})");
            faults::trigger(signal, fault).with_context(|| format!("Failed to raise {signal}"))?;
            println!("survived");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Overflow => {
            install_crash_handler()?;
            log::info!("Overflowing the main thread stack");
            let depth = faults::overflow_stack(0);
            println!("survived depth={depth}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Trace {
            count,
            wait,
            timeout_ms,
        } => run_trace(count, wait, Duration::from_millis(timeout_ms)),
        Commands::Roundtrip => run_roundtrip(),
    }
}

fn install_crash_handler() -> Result<()> {
    // SAFETY: `on_crash` is async-signal-safe and we are single-threaded.
    unsafe { faultline::register(handlers::on_crash) }
        .context("Failed to register crash handlers")?;

    if let Some(range) = faultline::alt_stack_range() {
        log::debug!(
            "Alternate signal stack at {:#x}..{:#x}",
            range.start,
            range.end
        );
    }
    log::info!("Crash handlers registered for {} signals", CRASH_SIGNALS.len());
    Ok(())
}

fn crash_dispositions() -> Result<Vec<Disposition>> {
    CRASH_SIGNALS
        .iter()
        .map(|&signal| faultline::disposition(signal))
        .collect::<Result<_, _>>()
        .context("Failed to read crash signal dispositions")
}

fn run_trace(count: u32, wait: bool, timeout: Duration) -> Result<ExitCode> {
    let crash_before = crash_dispositions()?;

    // SAFETY: `on_trace` is async-signal-safe and we are single-threaded.
    unsafe { faultline::register_trace(handlers::on_trace) }
        .context("Failed to register trace handler")?;
    log::info!("Trace handler registered for {TRACE_SIGNAL}");

    if wait {
        println!("ready pid={}", std::process::id());
        std::io::stdout().flush()?;

        let deadline = Instant::now() + timeout;
        while handlers::trace_requests() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handlers::trace_requests() == 0 {
            log::warn!("No {TRACE_SIGNAL} received within {timeout:?}");
        }
    } else {
        for _ in 0..count {
            nix::sys::signal::raise(TRACE_SIGNAL).context("Failed to raise trace signal")?;
        }
    }

    // SAFETY: single-threaded, no trace handler in flight.
    unsafe { faultline::unregister_trace() };

    let requests = handlers::trace_requests();
    let unchanged = crash_dispositions()? == crash_before;
    println!("snapshots={requests}");
    println!(
        "crash dispositions {}",
        if unchanged { "unchanged" } else { "changed" }
    );

    if requests > 0 && unchanged {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn run_roundtrip() -> Result<ExitCode> {
    let before = crash_dispositions()?;

    install_crash_handler()?;
    let installed = crash_dispositions()?
        .iter()
        .filter(|d| d.runs(handlers::on_crash))
        .count();
    println!("installed={installed}");

    // SAFETY: single-threaded, no crash handler in flight.
    unsafe { faultline::unregister() }.context("Failed to unregister crash handlers")?;
    let after = crash_dispositions()?;

    let mut mismatches = 0;
    for ((signal, b), a) in CRASH_SIGNALS.iter().zip(&before).zip(&after) {
        if b != a {
            println!("{signal} not restored: before {b:?}, after {a:?}");
            mismatches += 1;
        }
    }

    if mismatches == 0 && installed == CRASH_SIGNALS.len() {
        println!("restored");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
