//! devsim binary entry point

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use devsim::device::StepOutcome;
use devsim::drivers::BusTransfer;
use devsim::interrupt::{KEYBOARD_IRQ, USB_INSERT, USB_REMOVE};
use devsim::{console, DeviceId, DeviceSystem, FaultSet, IoOp, IoRequest, SimConfig};

#[derive(Parser)]
#[command(name = "devsim")]
#[command(about = "Device driver, interrupt and I/O queue simulator", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scripted hot-plug and storage scenario
    Demo {
        /// Shrink transfers a hundredfold and skip pauses
        #[arg(long)]
        fast: bool,
    },
    /// Print the status report of a freshly built system
    Status,
}

const MB: usize = 1_000_000;

fn main() -> Result<()> {
    let cli = Cli::parse();
    console::init(cli.log_level);

    let config = match &cli.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SimConfig::default(),
    };

    match cli.command {
        Command::Demo { fast } => demo(config, fast),
        Command::Status => {
            let faults = FaultSet::random(&config);
            let system = DeviceSystem::build(config, faults);
            println!("{}", system.query_status(None)?);
            Ok(())
        }
    }
}

fn demo(config: SimConfig, fast: bool) -> Result<()> {
    let scale = if fast { 100 } else { 1 };
    let pause = |d: Duration| {
        if !fast {
            thread::sleep(d);
        }
    };

    let usb = DeviceId(config.bus.id);
    let ssd = DeviceId(config.internal.id);
    let stick = DeviceId(config.removable.id);
    let keyboard = DeviceId(config.keyboard.id);

    let (tx, rx) = mpsc::channel();
    let faults = FaultSet::random(&config);
    let mut system = DeviceSystem::build(config, faults);
    system.start_with_reporter(tx)?;
    let mut submitted = 0;

    system.trigger_event(USB_INSERT, &[])?;
    let transfers = [
        BusTransfer::new(IoOp::Write, 200 * MB / scale, "Process A"),
        BusTransfer::new(IoOp::Read, 50 * MB / scale, "Process B"),
        BusTransfer::new(IoOp::Write, 100 * MB / scale, "Process C"),
        BusTransfer::new(IoOp::Read, 150 * MB / scale, "Process D"),
    ];
    for transfer in &transfers {
        let req = IoRequest::new(usb, transfer.op, None)
            .with_length(transfer.size)
            .from_process(&transfer.process);
        system.submit(req)?;
        submitted += 1;
        pause(Duration::from_secs(1));
    }

    // Forced removal, likely in the middle of a transfer
    pause(Duration::from_secs(3));
    system.trigger_event(USB_REMOVE, &[])?;
    let late = IoRequest::new(usb, IoOp::Write, None)
        .with_length(300 * MB / scale)
        .from_process("Process E");
    system.submit(late)?;
    submitted += 1;

    await_outcomes(&rx, submitted, Duration::from_secs(120));

    // Storage devices and keyboard
    let storage = [
        IoRequest::write(ssd, b"boot sector".to_vec()).at_block(0),
        IoRequest::read(ssd).at_block(0),
        IoRequest::write(stick, b"holiday photos".to_vec()),
        IoRequest::read(stick),
        IoRequest::read(ssd).at_block(99),
    ];
    for req in storage {
        system.submit(req)?;
    }
    system.trigger_event(KEYBOARD_IRQ, &["h".into(), "down".into()])?;
    system.trigger_event(KEYBOARD_IRQ, &["h".into(), "up".into()])?;
    system.submit(IoRequest::read(keyboard))?;
    await_outcomes(&rx, 6, Duration::from_secs(30));

    println!("{}", system.query_status(None)?);
    system.shutdown();
    println!("[MAIN] simulation finished");
    Ok(())
}

/// Print outcomes until `expected` requests have finished or `timeout` passes
///
/// Requeues do not count as finished.
fn await_outcomes(rx: &Receiver<StepOutcome>, expected: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut finished = 0;
    while finished < expected {
        let left = deadline.saturating_duration_since(Instant::now());
        let Ok(outcome) = rx.recv_timeout(left) else {
            log::warn!(target: "worker", "{} of {} requests finished before timeout", finished, expected);
            break;
        };
        match &outcome {
            StepOutcome::Completed {
                id,
                device,
                completion,
            } => println!(
                "[DONE] {} on device {}: {} {} bytes in {:.2} s",
                id,
                device,
                completion.op,
                completion.bytes,
                completion.elapsed.as_secs_f64()
            ),
            StepOutcome::Failed { id, device, error } | StepOutcome::Dropped { id, device, error } => {
                println!("[FAIL] {} on device {}: {}", id, device, error)
            }
            StepOutcome::Requeued { .. } | StepOutcome::Idle => continue,
        }
        finished += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_level_parses() {
        let cli = Cli::try_parse_from(["devsim", "--log-level", "debug", "status"]).unwrap();
        assert_eq!(cli.log_level, LevelFilter::Debug);
        assert!(matches!(cli.command, Command::Status));

        let cli = Cli::try_parse_from(["devsim", "demo", "--fast"]).unwrap();
        assert_eq!(cli.log_level, LevelFilter::Info);
        assert!(matches!(cli.command, Command::Demo { fast: true }));

        assert!(Cli::try_parse_from(["devsim", "--log-level", "loud", "status"]).is_err());
    }
}
