// tools/boardlink_cli/main.rs
//
// Command-line front end: list serial ports, send one button, or upload a
// whole board.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use boardlink::logging::{init_file_logging, stop_file_logging};
use boardlink::profile::SOUND_SAMPLES;
use boardlink::settings::{load_settings, settings_path, AppSettings};
use boardlink::{
    io, tlog, upload_board, ButtonProfile, ButtonSlot, Icon, SerialTransport, Sound, TransferEvent, TransferManager,
};

#[derive(Parser)]
#[command(name = "boardlink", version, about = "Upload button profiles to a FunIcon board")]
struct Args {
    /// Settings file (defaults to the per-user config location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Mirror log lines into timestamped files in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Accept board replies without checking their checksum.
    #[arg(long, global = true)]
    no_verify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports present on this host.
    Ports {
        #[arg(long)]
        json: bool,
    },
    /// Send one button to a slot.
    Send {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        slot: u8,
        /// Icon rows as 16 hex digits, top row first.
        #[arg(long)]
        icon: String,
        /// Raw signed 8-bit PCM at 8000 Hz.
        #[arg(long)]
        sound: Option<PathBuf>,
        #[arg(long, default_value = "button")]
        name: String,
    },
    /// Upload up to four buttons to slots 0..N.
    Board {
        #[arg(long)]
        port: Option<String>,
        /// ICON_HEX or ICON_HEX:SOUND_FILE, once per button.
        #[arg(long = "button", required = true)]
        buttons: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("boardlink: {}", e);
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<bool, String> {
    let config = match args.config {
        Some(path) => path,
        None => settings_path()?,
    };
    let mut settings = load_settings(&config)?;
    if args.no_verify {
        settings.verify_checksums = false;
    }

    let log_dir = args.log_dir.or_else(|| settings.log_dir.as_ref().map(PathBuf::from));
    if let Some(dir) = &log_dir {
        init_file_logging(dir)?;
    }

    let result = match args.command {
        Command::Ports { json } => list_ports(json).map(|_| true),
        Command::Send {
            port,
            slot,
            icon,
            sound,
            name,
        } => send_one(&settings, port.as_deref(), slot, &icon, sound.as_deref(), name),
        Command::Board { port, buttons } => send_board(&settings, port.as_deref(), &buttons),
    };

    stop_file_logging();
    result
}

// ============================================================================
// Commands
// ============================================================================

fn list_ports(json: bool) -> Result<(), String> {
    let ports = io::list_serial_ports()?;
    if json {
        let out = serde_json::to_string_pretty(&ports).map_err(|e| format!("Failed to serialize ports: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in ports {
        match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {} {:04x}:{:04x} {}",
                p.port_name,
                p.port_type,
                vid,
                pid,
                p.product.unwrap_or_default()
            ),
            _ => println!("{}  {}", p.port_name, p.port_type),
        }
    }
    Ok(())
}

fn send_one(
    settings: &AppSettings,
    port: Option<&str>,
    slot: u8,
    icon: &str,
    sound: Option<&Path>,
    name: String,
) -> Result<bool, String> {
    let slot = ButtonSlot::new(slot).map_err(|e| e.to_string())?;
    let profile = ButtonProfile::new(name, Icon::from_hex(icon)?, load_sound(sound)?);

    let manager = connect(settings, port)?;
    let events = manager.subscribe();
    manager.try_send(slot, &profile).map_err(|e| e.to_string())?;

    let mut outcome = None;
    for event in events.iter() {
        match event {
            TransferEvent::Progress(p) => eprint!("\rslot {}: {:5.1}%", p.slot, p.fraction() * 100.0),
            TransferEvent::Finished { outcome: o, .. } => {
                eprintln!();
                outcome = Some(o);
                break;
            }
        }
    }
    manager.wait_idle();
    manager.disconnect();

    let outcome = outcome.ok_or_else(|| "Transfer ended without a result".to_string())?;
    println!("slot {}: {}", slot, outcome);
    Ok(outcome.is_success())
}

fn send_board(settings: &AppSettings, port: Option<&str>, buttons: &[String]) -> Result<bool, String> {
    let profiles = buttons
        .iter()
        .enumerate()
        .map(|(i, arg)| parse_button(i, arg))
        .collect::<Result<Vec<_>, String>>()?;

    let manager = connect(settings, port)?;
    let report = upload_board(&manager, &profiles, |f| eprint!("\rboard: {:5.1}%", f * 100.0));
    eprintln!();
    manager.wait_idle();
    manager.disconnect();

    let report = report.map_err(|e| e.to_string())?;
    for slot in &report.succeeded {
        println!("slot {}: succeeded", slot);
    }
    if let Some(slot) = report.failed_slot {
        println!("slot {}: {}", slot, report.outcome);
    }
    Ok(report.is_success())
}

// ============================================================================
// Helpers
// ============================================================================

fn connect(settings: &AppSettings, port: Option<&str>) -> Result<TransferManager, String> {
    let line = settings.line_config(port)?;
    let transport = SerialTransport::open(&line).map_err(String::from)?;
    tlog!("[cli] Connected to {} ({})", line.port, line.describe());
    Ok(TransferManager::new(Arc::new(transport), settings.transfer_options()))
}

/// `ICON_HEX` or `ICON_HEX:SOUND_FILE`.
fn parse_button(index: usize, arg: &str) -> Result<ButtonProfile, String> {
    let (icon, sound) = match arg.split_once(':') {
        Some((icon, file)) => (icon, Some(Path::new(file))),
        None => (arg, None),
    };
    Ok(ButtonProfile::new(
        format!("button {}", index),
        Icon::from_hex(icon)?,
        load_sound(sound)?,
    ))
}

fn load_sound(path: Option<&Path>) -> Result<Sound, String> {
    let Some(path) = path else {
        return Ok(Sound::default());
    };
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read sound {}: {}", path.display(), e))?;
    let sound = Sound::from_signed(bytes.into_iter().map(|b| b as i8).collect());
    if sound.len() > SOUND_SAMPLES {
        tlog!(
            "[cli] {} has {} samples, keeping the first {}",
            path.display(),
            sound.len(),
            SOUND_SAMPLES
        );
        return Ok(sound.clip(0, SOUND_SAMPLES));
    }
    Ok(sound)
}
