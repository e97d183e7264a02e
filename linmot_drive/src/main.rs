//! # LinMot Drive Link
//!
//! Connects to one drive (or a loopback simulation with `--simulate`),
//! runs the handshake, starts the cyclic thread and reads operator commands
//! from stdin until `quit`, end of input or Ctrl-C.

use clap::Parser;
use linmot_common::config::{ConfigLoader, DriveConfig, LogLevel};
use linmot_common::rstalk::{DataType, RegisterAddress, RegisterValue, registers};
use linmot_common::units::Position;
use linmot_drive::config::{ConfigOverrides, load_config};
use linmot_drive::session::DriveSession;
use linmot_drive::sim::{SimOptions, SimulatedDrive};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// LinMot drive link: register channel, cyclic channel and motion control
#[derive(Parser, Debug)]
#[command(name = "linmot_drive")]
#[command(version)]
#[command(about = "Master-side LinMot drive link over UDP")]
struct Args {
    /// Path to the drive configuration TOML.
    #[arg(long, default_value = "config/linmot.toml")]
    config: PathBuf,

    /// Drive IP address (overrides `[drive] address`).
    #[arg(long)]
    address: Option<String>,

    /// Serve a simulated drive on loopback and connect to it.
    #[arg(long)]
    simulate: bool,

    /// CPU core to pin the cyclic thread to.
    #[arg(long)]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority of the cyclic thread.
    #[arg(long)]
    rt_priority: Option<i32>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args, configured_log_level(&args.config));

    info!("LinMot drive link v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("LinMot drive link shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let overrides = ConfigOverrides {
        address: args.address.clone(),
        cpu_core: args.cpu_core,
        rt_priority: args.rt_priority,
    };
    let mut config = load_config(&args.config, &overrides, args.simulate)?;

    let _sim = if args.simulate {
        let sim = SimulatedDrive::spawn(SimOptions {
            checksum: config.cyclic.checksum,
            ..SimOptions::default()
        })?;
        config.drive = sim.link_config();
        // No RT privileges needed against loopback.
        config.rt.lock_memory = false;
        Some(sim)
    } else {
        None
    };

    // Drive events are logged by the session's event dispatcher.
    let mut session = DriveSession::new(config);
    let result = session.connect()?;
    info!(
        "Connected: firmware={}, device={}, cycle_time={}µs",
        result.firmware, result.device_id, result.cycle_time_us
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let lines = spawn_stdin_reader();
    while running.load(Ordering::SeqCst) {
        let line = match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&mut session, command) {
                    warn!("{}: {e}", line.trim());
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    session.disconnect();
    Ok(())
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ─── Console commands ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Enable,
    Disable,
    Home,
    Move(f64),
    Stop,
    Acknowledge,
    Reset,
    Read(RegisterAddress),
    Write(RegisterAddress, i64),
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let mut arg = |name: &str| {
        words
            .next()
            .ok_or_else(|| format!("{verb}: missing <{name}>"))
    };
    let command = match verb {
        "enable" => ConsoleCommand::Enable,
        "disable" => ConsoleCommand::Disable,
        "home" => ConsoleCommand::Home,
        "move" => {
            let mm = arg("mm")?;
            ConsoleCommand::Move(mm.parse().map_err(|_| format!("move: invalid position {mm:?}"))?)
        }
        "stop" => ConsoleCommand::Stop,
        "ack" => ConsoleCommand::Acknowledge,
        "reset" => ConsoleCommand::Reset,
        "read" => ConsoleCommand::Read(parse_address(arg("index")?, arg("sub")?)?),
        "write" => {
            let address = parse_address(arg("index")?, arg("sub")?)?;
            ConsoleCommand::Write(address, parse_int(arg("value")?)?)
        }
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(Some(command))
}

fn parse_int(text: &str) -> Result<i64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid number {text:?}"))
}

fn parse_address(index: &str, sub: &str) -> Result<RegisterAddress, String> {
    let index = u16::try_from(parse_int(index)?).map_err(|_| format!("index {index} out of range"))?;
    let sub = u8::try_from(parse_int(sub)?).map_err(|_| format!("subindex {sub} out of range"))?;
    Ok(RegisterAddress::new(index, sub))
}

fn execute(session: &mut DriveSession, command: ConsoleCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ConsoleCommand::Enable => session.enable()?,
        ConsoleCommand::Disable => session.disable()?,
        ConsoleCommand::Home => session.home()?,
        ConsoleCommand::Move(mm) => session.move_to(Position::from_millimeters_f64(mm))?,
        ConsoleCommand::Stop => session.stop()?,
        ConsoleCommand::Acknowledge => session.fault_reset()?,
        ConsoleCommand::Reset => {
            let result = session.reset()?;
            info!("Reconnected: cycle_time={}µs", result.cycle_time_us);
        }
        ConsoleCommand::Read(address) => {
            let value = session.read_register(address.index, address.subindex)?;
            println!("{address} = {value}");
        }
        ConsoleCommand::Write(address, raw) => {
            let data_type = registers::lookup(address).map_or(DataType::I32, |d| d.data_type);
            let value = RegisterValue::from_i64(data_type, raw)
                .ok_or_else(|| format!("{raw} does not fit {data_type:?}"))?;
            session.write_register(address.index, address.subindex, value)?;
            println!("{address} <- {raw}");
        }
        ConsoleCommand::Status => println!("{}", serde_json::to_string_pretty(&session.snapshot())?),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

/// `[shared] log_level` from the config file, before tracing exists to
/// report problems with it; `load_config` reports them afterwards.
fn configured_log_level(path: &Path) -> LogLevel {
    DriveConfig::load(path)
        .map(|config| config.shared.log_level)
        .unwrap_or_default()
}

/// Filter used when `RUST_LOG` is unset: `-v` beats the configured level.
fn default_directive(verbose: bool, log_level: LogLevel) -> &'static str {
    if verbose {
        LogLevel::Debug.as_directive()
    } else {
        log_level.as_directive()
    }
}

/// Initialize tracing subscriber.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(args.verbose, log_level)));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
