//! NDI tracker console
//!
//! Connects to a Polaris/Aurora tracker over serial and exercises the
//! driver: enumerate tools, sound the buzzer, or stream poses to the
//! terminal for a while.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tracker::{spawn, TrackerCommand, TrackerConfig, TrackerEvent};

#[derive(Parser, Debug)]
#[command(name = "ndi_tool")]
#[command(about = "NDI Polaris/Aurora tracker console")]
struct Args {
    /// Tracker configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port override; discovery is used when absent.
    #[arg(long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, list the enumerated tools, and disconnect.
    Probe,
    /// Sound the buzzer.
    Beep {
        #[arg(default_value = "2")]
        count: u8,
    },
    /// Track for a while, printing poses.
    Track {
        /// How long to track, in seconds.
        #[arg(long, default_value = "10")]
        seconds: u64,
        /// Also report stray markers.
        #[arg(long)]
        stray: bool,
    },
}

/// Wait for the outcome of a connection attempt.
fn await_connection(events: &crossbeam_channel::Receiver<TrackerEvent>) -> Result<String> {
    let deadline = Duration::from_secs(60);
    let start = Instant::now();
    while start.elapsed() < deadline {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(TrackerEvent::Connected(port)) if !port.is_empty() => return Ok(port),
            Ok(TrackerEvent::Connected(_)) => bail!("connection failed"),
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                bail!("tracker task stopped")
            }
        }
    }
    bail!("timed out waiting for the tracker to connect")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if args.port.is_some() {
        config.serial_port = args.port.clone();
    }

    let handle = spawn(config);
    handle.send(TrackerCommand::Connect { port: None })?;
    let port = await_connection(handle.events())?;
    info!("connected on {port}");

    match args.command {
        Command::Probe => {
            let state = handle.state();
            for line in &state.device_banner {
                println!("{}", line.trim_end());
            }
            println!("{} tool(s):", state.tool_names.len());
            for tool in &state.tools {
                println!("  {} (serial {})", tool.name, tool.serial_number);
            }
        }

        Command::Beep { count } => {
            handle.send(TrackerCommand::Beep(count))?;
        }

        Command::Track { seconds, stray } => {
            handle.send(TrackerCommand::ToggleStrayMarkers(stray))?;
            handle.send(TrackerCommand::ToggleTracking(true))?;

            let stop = Instant::now() + Duration::from_secs(seconds);
            while Instant::now() < stop {
                std::thread::sleep(Duration::from_millis(500));
                let state = handle.state();
                for tool in &state.tools {
                    if tool.tooltip_frame.valid {
                        let t = &tool.tooltip_frame.translation;
                        println!(
                            "{}: ({:8.2}, {:8.2}, {:8.2}) mm  rms {:.4}  frame {}",
                            tool.name, t.x, t.y, t.z, tool.error_rms, tool.frame_number
                        );
                    } else {
                        println!("{}: not visible", tool.name);
                    }
                }
                if stray {
                    let visible = (0..state.stray_markers.nrows())
                        .filter(|&row| state.stray_markers[[row, 0]] == 1.0)
                        .count();
                    println!("stray markers: {visible}");
                }
            }

            handle.send(TrackerCommand::ToggleTracking(false))?;
        }
    }

    handle.send(TrackerCommand::Disconnect)?;
    handle.shutdown();
    Ok(())
}
