use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use updiprog::transport::{BAUDRATES, DEFAULT_BAUDRATE, SerialTransport};
use updiprog::{Config, DeviceDB, HexSource, HexTarget, ProgressBarSink, Step, StepOutput, Timing};

#[derive(clap::Parser)]
#[command(
    name = "updiprog",
    version,
    about = "Command-line UPDI programmer for tinyAVR, megaAVR and AVR Dx parts"
)]
struct Cli {
    /// Serial port baudrate
    #[arg(short, long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,
    /// Serial port to use (Win: COMx | *nix: /dev/ttyX)
    #[arg(short = 'c', long)]
    port: Option<String>,
    /// Target device, e.g. tiny817 or mega4809
    #[arg(short, long)]
    device: Option<String>,
    /// Erase the device
    #[arg(short, long)]
    erase: bool,
    /// Write fuses, as fuse number and hex value
    #[arg(long, value_name = "N:0xVV", value_parser = parse_fuse, num_args = 1..)]
    fuse_write: Vec<(u8, u8)>,
    /// Read all fuses
    #[arg(long)]
    fuse_read: bool,
    /// Lock the device
    #[arg(long)]
    lock: bool,
    /// Unlock the device, erasing it
    #[arg(long)]
    unlock: bool,
    /// Hex file to read the flash into
    #[arg(short, long, value_name = "FILE.HEX")]
    read: Option<PathBuf>,
    /// Hex file to write to the flash
    #[arg(short, long, value_name = "FILE.HEX")]
    write: Option<PathBuf>,
    /// Show the device signature and System Information Block
    #[arg(short, long)]
    info: bool,
    /// List supported devices
    #[arg(short, long)]
    list_devices: bool,
    /// More output, repeat for wire traces
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Warnings and errors only
    #[arg(short, long)]
    quiet: bool,
}

/// `N:0xVV`, fuse number in decimal and value in hex
fn parse_fuse(s: &str) -> std::result::Result<(u8, u8), String> {
    let (fuse, value) = s
        .split_once(':')
        .ok_or_else(|| format!("wrong fuse setting {:?}, expected N:0xVV", s))?;
    let fuse = fuse
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("wrong fuse number {:?}: {}", fuse, e))?;
    let digits = value
        .trim()
        .strip_prefix("0x")
        .or_else(|| value.trim().strip_prefix("0X"))
        .unwrap_or(value.trim());
    let value =
        u8::from_str_radix(digits, 16).map_err(|e| format!("wrong fuse value {:?}: {}", value, e))?;
    Ok((fuse, value))
}

fn steps(cli: &Cli) -> Result<Vec<Step>> {
    let mut steps = vec![];
    if cli.unlock {
        steps.push(Step::Unlock);
    }
    steps.push(Step::EnterProgmode);
    if cli.info {
        steps.push(Step::ReadInfo);
        steps.push(Step::ReadSignature);
    }
    if cli.erase {
        steps.push(Step::Erase);
    }
    if !cli.fuse_write.is_empty() {
        steps.push(Step::WriteFuses(cli.fuse_write.clone()));
    }
    if cli.fuse_read {
        steps.push(Step::ReadFuses);
    }
    if let Some(path) = &cli.write {
        steps.push(Step::WriteFlash(HexSource::File(path.clone())));
    }
    if let Some(path) = &cli.read {
        steps.push(Step::ReadFlash(HexTarget::File(path.clone())));
    }
    if cli.lock {
        steps.push(Step::Lock);
    }
    if steps == [Step::EnterProgmode] {
        anyhow::bail!("Nothing to do, stopping");
    }
    Ok(steps)
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        simplelog::LevelFilter::Warn
    } else {
        match cli.verbose {
            0 => simplelog::LevelFilter::Info,
            1 => simplelog::LevelFilter::Debug,
            _ => simplelog::LevelFilter::Trace,
        }
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    if cli.list_devices {
        let db = DeviceDB::load()?;
        for family in db.families() {
            println!("{}:", family.name);
            for variant in &family.variants {
                println!("    {}", variant.name);
            }
        }
        return Ok(());
    }

    let device = cli.device.clone().context("Device type (-d) is not set!")?;
    let Some(port) = cli.port.clone() else {
        match SerialTransport::scan_ports() {
            Ok(ports) if !ports.is_empty() => log::info!("Available ports: {}", ports.join(", ")),
            _ => log::warn!("No serial ports found"),
        }
        anyhow::bail!("COM port name is missing!");
    };
    if !BAUDRATES.contains(&cli.baud) {
        log::warn!("Unusual baudrate {}, known good: {:?}", cli.baud, BAUDRATES);
    }

    let steps = steps(&cli)?;

    let config = Config {
        port,
        baud: cli.baud,
        device,
        timing: Timing::default(),
    };
    log::info!("Working with {} on {}", config.device, config.port);
    let outputs = updiprog::sequence::run(&config, &steps, Box::new(ProgressBarSink::new()))
        .with_context(|| format!("Programming {} failed", config.device))?;

    for output in outputs {
        match output {
            StepOutput::Fuses(fuses) => {
                log::info!("Reading fuses:");
                for (i, value) in fuses.iter().enumerate() {
                    println!("  0x{:02X}: 0x{:02X}", i, value);
                }
            }
            StepOutput::Signature(signature) => log::info!("Signature: {}", signature),
            StepOutput::Info(info) => log::info!("{}", info),
            StepOutput::Hex(_) | StepOutput::Done => (),
        }
    }
    if let Some(path) = &cli.read {
        log::info!("Flash saved to {}", path.display());
    }
    log::info!("Done");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(-1);
    }
}
