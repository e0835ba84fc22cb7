//! Out-of-process watchdog for the reminder processor.
//!
//! Coarse and best-effort: one watchdog, one processor, no leader election.
//! Liveness is judged by the marker file the processor maintains
//! plus a check that the recorded pid is actually our binary and not a
//! recycled pid.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "watchdog", about = "Keep the remindbot processor running")]
struct Cli {
    /// Liveness marker file written by the processor.
    #[arg(long, default_value = "remindbot.alive")]
    marker: PathBuf,

    /// Processor executable to launch.
    #[arg(long, default_value = "remindbot")]
    processor: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Launch the processor if it is not already running.
    Start {
        /// Let the processor inherit this console instead of detaching its
        /// stdio.
        #[arg(long)]
        console: bool,
    },
    /// Report whether the processor is currently running.
    Status,
    /// Launch the processor and restart it whenever it dies.
    Monitor {
        /// Seconds between liveness checks.
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Cmd::Start { console } => {
            if let Some(pid) = running_pid(&cli.marker, &cli.processor) {
                println!("processor already running (pid {pid})");
            } else {
                start(&cli.processor, console)?;
                println!("processor started");
            }
        }
        Cmd::Status => match running_pid(&cli.marker, &cli.processor) {
            Some(pid) => println!("running (pid {pid})"),
            None => {
                println!("not running");
                std::process::exit(1);
            }
        },
        Cmd::Monitor { interval } => {
            monitor(&cli.marker, &cli.processor, Duration::from_secs(interval))?
        }
    }
    Ok(())
}

fn monitor(marker: &Path, processor: &Path, interval: Duration) -> anyhow::Result<()> {
    loop {
        if running_pid(marker, processor).is_none() {
            eprintln!("processor not running, starting it");
            start(processor, false)?;
        }
        std::thread::sleep(interval);
    }
}

fn start(processor: &Path, console: bool) -> anyhow::Result<()> {
    let mut command = Command::new(processor);
    if !console {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
    }
    command
        .spawn()
        .with_context(|| format!("spawning {}", processor.display()))?;
    Ok(())
}

/// The processor's pid, if the marker names a live process whose command
/// line is our processor binary.
fn running_pid(marker: &Path, processor: &Path) -> Option<u32> {
    let pid = remindbot::liveness::recorded_pid(marker)?;
    let cmdline = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let argv0 = cmdline.split(|byte| *byte == 0).next()?;
    let argv0 = String::from_utf8_lossy(argv0);
    let name = processor.file_name()?.to_string_lossy();
    argv0.ends_with(name.as_ref()).then_some(pid)
}
