use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fbgadget_core::backend::{
    MemoryAttestation, MemoryEnv, MemoryFlash, MemoryLock, MemorySlots, RecordingPlatform, Services,
};
use fbgadget_core::config::EngineConfig;
use fbgadget_core::events::{FastbootEvent, FastbootObserver, TracingObserver};
use fbgadget_core::session::HostSession;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fastboot gadget simulator", long_about = None)]
struct Args {
    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Command script, one command per line (stdin when omitted)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Largest transfer the simulated host sends at once
    #[arg(long)]
    chunk: Option<usize>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Commands to run before the script
    commands: Vec<String>,
}

/// Prints progress marks on stderr and forwards everything to tracing.
struct ConsoleObserver;

impl FastbootObserver for ConsoleObserver {
    fn on_event(&self, event: &FastbootEvent) {
        match event {
            FastbootEvent::ProgressMark { line_break } => {
                let mut stderr = io::stderr().lock();
                let _ = write!(stderr, ".");
                if *line_break {
                    let _ = writeln!(stderr);
                }
            }
            FastbootEvent::TransferFinished { .. } => eprintln!(),
            _ => {}
        }
        TracingObserver.on_event(event);
    }
}

/// In-memory board: A/B slots, unlocked, a handful of partitions.
fn simulated_services() -> Services {
    let flash = MemoryFlash::new()
        .with_partition("misc", 0x10_0000, "raw")
        .with_partition("vbmeta_a", 0x1_0000, "raw")
        .with_partition("vbmeta_b", 0x1_0000, "raw")
        .with_partition("boot_a", 0x200_0000, "raw")
        .with_partition("boot_b", 0x200_0000, "raw")
        .with_partition("system_a", 0x8000_0000, "ext4")
        .with_partition("system_b", 0x8000_0000, "ext4")
        .with_partition("userdata", 0x1_0000_0000, "ext4");
    let env = MemoryEnv::new()
        .with("serial#", "FBSIM0000001")
        .with("fastboot.hw-revision", "sim-1");

    Services::new(RecordingPlatform::new())
        .with_env(env)
        .with_partitions(flash.clone())
        .with_flash(flash)
        .with_slots(MemorySlots::ab())
        .with_lock(MemoryLock::unlocked())
        .with_attestation(MemoryAttestation::new(Some("sim-dh"), Some("sim-uuid")))
}

/// Run one script line. Returns `false` once the device has left fastboot.
fn run_line<O: FastbootObserver>(host: &mut HostSession<O>, line: &str) -> Result<bool> {
    if let Some(path) = line.strip_prefix("@download") {
        let path = Path::new(path.trim());
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        info!(path = %path.display(), bytes = data.len(), "Downloading file");
        let response = host.download(&data)?;
        println!("{line} -> {response}");
    } else if let Some(path) = line.strip_prefix("@upload") {
        let path = Path::new(path.trim());
        let data = host.upload()?;
        std::fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
        println!("{line} -> OKAY ({} bytes)", data.len());
    } else {
        let response = host.command(line)?;
        println!("{line} -> {response}");
    }

    if host.engine().is_halted() {
        info!("Device left fastboot");
        return Ok(false);
    }
    Ok(true)
}

fn script_lines(args: &Args) -> Result<Vec<String>> {
    let mut lines = args.commands.clone();
    match &args.script {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading script {}", path.display()))?;
            lines.extend(text.lines().map(str::to_string));
        }
        None if args.commands.is_empty() => {
            for line in io::stdin().lock().lines() {
                lines.push(line?);
            }
        }
        None => {}
    }
    Ok(lines)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(path) = &args.write_config {
        config.save_to_file(path)?;
        info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    info!("Starting fastboot gadget simulator...");
    let mut host = HostSession::with_observer(config, simulated_services(), Arc::new(ConsoleObserver))?;
    if let Some(chunk) = args.chunk {
        host = host.with_chunk(chunk);
    }

    for (number, line) in script_lines(&args)?.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match run_line(&mut host, line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!(line = number + 1, "Error: {:#}", e);
                return Err(e.context(format!("script line {}", number + 1)));
            }
        }
    }

    if host.engine().state().response_in_flight {
        warn!("Session ended with a response still queued");
    }
    Ok(())
}
