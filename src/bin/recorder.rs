//! Multitrack Recorder
//!
//! Records several input devices at once and keeps a rolling instant-replay
//! window that can be saved at any moment. Driven from stdin.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multitrack_recorder::{
    audio::{CpalCatalog, DeviceFilter, DeviceId},
    config::{self, RecorderConfig},
    control::{Command, ControlHandle, ControllerEvent, ModeController, ModeSettings},
};

#[derive(Parser, Debug)]
#[command(name = "recorder", version, about = "Multi-device recorder with instant replay")]
struct Args {
    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Do not filter the device list down to virtual line inputs
    #[arg(long)]
    all_devices: bool,

    /// Device id to capture (repeatable); see --list-devices
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Output directory for WAV files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Instant-replay window in minutes (1-20)
    #[arg(short, long)]
    buffer_minutes: Option<u32>,

    /// Start buffering together with every recording
    #[arg(long)]
    instant_replay: bool,

    /// Stop recordings automatically after this many seconds
    #[arg(short, long)]
    timer: Option<u32>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RecorderConfig::load_from(path),
        None => RecorderConfig::load(),
    }
    .context("loading configuration")?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid settings")?;

    let catalog = CpalCatalog::new();
    if args.list_devices {
        print_devices(&catalog, &config.device_filter);
        return Ok(());
    }

    if config.devices.is_empty() {
        bail!(
            "no devices selected; pass --device <ID> or set `devices` in {}",
            config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.toml".to_string())
        );
    }

    tracing::info!("Starting Multitrack Recorder");
    tracing::info!("Output directory: {}", config.output_dir.display());

    let (mut controller, events) =
        ModeController::new(Arc::new(catalog), ModeSettings::from(&config))?;
    controller.select_devices(config.devices.iter().cloned());
    let mut control = ControlHandle::spawn(controller, events)?;

    let events = control.events().clone();
    let json = args.json;
    thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || {
            for event in events {
                print_event(&event, json);
            }
        })?;

    print_help();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_command(line.trim()) {
            Ok(Some(Command::Shutdown)) => break,
            Ok(Some(command)) => {
                if !control.send(command) {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => eprintln!("{}", message),
        }
    }

    control.shutdown();
    tracing::info!("Recorder stopped");
    Ok(())
}

fn apply_overrides(config: &mut RecorderConfig, args: &Args) {
    if !args.devices.is_empty() {
        config.devices = args.devices.iter().map(|d| DeviceId::new(d.as_str())).collect();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(minutes) = args.buffer_minutes {
        config.buffer_minutes = minutes;
    }
    if args.instant_replay {
        config.instant_replay = true;
    }
    if args.timer.is_some() {
        config.timer_seconds = args.timer;
    }
    if args.all_devices {
        config.device_filter.show_all = true;
    }
}

fn print_devices(catalog: &CpalCatalog, filter: &DeviceFilter) {
    println!("\n=== Available Input Devices ===");
    let devices = catalog.list_devices(filter);
    if devices.is_empty() {
        println!("  (none; try --all-devices)");
    }
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Channels: {}", device.max_input_channels);
    }
    println!();
}

fn print_help() {
    println!("Commands:");
    println!("  r          toggle recording");
    println!("  b          toggle instant-replay buffering");
    println!("  s          save the instant-replay buffer now");
    println!("  m <N>      set buffer length in minutes");
    println!("  t <N|off>  set recording timer in seconds");
    println!("  i <on|off> start buffering with every recording");
    println!("  q          quit");
    let _ = io::stdout().flush();
}

fn parse_command(line: &str) -> std::result::Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();

    let command = match word {
        "r" | "record" => Command::ToggleRecording,
        "b" | "buffer" => Command::ToggleBuffering,
        "s" | "save" => Command::SaveBufferNow,
        "m" | "minutes" => {
            let minutes = arg
                .and_then(|a| a.parse().ok())
                .ok_or_else(|| "usage: m <minutes>".to_string())?;
            Command::SetBufferMinutes(minutes)
        }
        "t" | "timer" => match arg {
            Some("off") => Command::SetTimer(None),
            Some(seconds) => Command::SetTimer(Some(
                seconds
                    .parse()
                    .map_err(|_| "usage: t <seconds|off>".to_string())?,
            )),
            None => return Err("usage: t <seconds|off>".to_string()),
        },
        "i" | "replay" => match arg {
            Some("on") => Command::SetInstantReplay(true),
            Some("off") => Command::SetInstantReplay(false),
            _ => return Err("usage: i <on|off>".to_string()),
        },
        "q" | "quit" | "exit" => Command::Shutdown,
        "h" | "help" | "?" => {
            print_help();
            return Ok(None);
        }
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn print_event(event: &ControllerEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!("Failed to encode event: {}", e),
        }
        return;
    }

    match event {
        ControllerEvent::StateChanged { state } => println!("[mode] {}", state.name()),
        ControllerEvent::DevicesSkipped { devices } => {
            for skipped in devices {
                println!("[skipped] {}: {}", skipped.device, skipped.reason);
            }
        }
        ControllerEvent::DeviceFailed(failure) => println!(
            "[device lost] {} ({}): {}, {} still running",
            failure.name, failure.kind, failure.reason, failure.remaining
        ),
        ControllerEvent::TimerExpired => println!("[timer] recording time reached"),
        ControllerEvent::Exported(report) => {
            println!("[saved] {}", report.summary());
            for path in report.paths() {
                println!("  {}", path.display());
            }
        }
        ControllerEvent::CommandRejected { command, error } => {
            println!("[rejected] {}: {}", command, error)
        }
    }
}
