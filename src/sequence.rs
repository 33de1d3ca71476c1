//! Programming sequences: a configuration plus ordered steps, run as one
//! batch over a single session.
use std::path::PathBuf;

use crate::device::{Device, DeviceDB};
use crate::flashing::{Flashing, Signature, SystemInfo};
use crate::format::{BufferStream, FileStream, HexError};
use crate::progress::Progress;
use crate::timing::Timing;
use crate::transport::{DEFAULT_BAUDRATE, SerialTransport, Transport};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Serial port name, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud: u32,
    /// Device name as understood by [`DeviceDB::find`]
    pub device: String,
    pub timing: Timing,
}

impl Config {
    pub fn new(port: &str, device: &str) -> Self {
        Config {
            port: port.to_string(),
            baud: DEFAULT_BAUDRATE,
            device: device.to_string(),
            timing: Timing::default(),
        }
    }
}

/// Where a flash image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexSource {
    File(PathBuf),
    Text(String),
}

/// Where a flash image goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexTarget {
    File(PathBuf),
    /// Returned as [`StepOutput::Hex`]
    Buffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    EnterProgmode,
    Erase,
    WriteFlash(HexSource),
    ReadFlash(HexTarget),
    /// `(fuse index, value)` pairs
    WriteFuses(Vec<(u8, u8)>),
    ReadFuses,
    Lock,
    Unlock,
    ReadSignature,
    ReadInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    Done,
    /// Every fuse of the device, by index
    Fuses(Vec<u8>),
    Hex(String),
    Signature(Signature),
    Info(SystemInfo),
}

fn validate(device: &Device, steps: &[Step]) -> Result<()> {
    for step in steps {
        if let Step::WriteFuses(fuses) = step {
            if let Some(&(fuse, _)) = fuses.iter().find(|(fuse, _)| *fuse >= device.fuses_count) {
                log::error!("Wrong fuse number: {}", fuse);
                return Err(Error::InvalidFuse {
                    fuse,
                    count: device.fuses_count,
                });
            }
        }
    }
    Ok(())
}

fn execute<T: Transport>(session: &mut Flashing<T>, step: &Step) -> Result<StepOutput> {
    let flash_start = session.device().flash_start;
    let flash_size = session.device().flash_size as usize;

    log::debug!("Step: {:?}", step);
    match step {
        Step::EnterProgmode => session.enter_progmode()?,
        Step::Erase => session.chip_erase()?,
        Step::WriteFlash(HexSource::File(path)) => {
            let mut stream = FileStream::open(path).map_err(HexError::File)?;
            session.load_ihex_stream(&mut stream, flash_start, flash_size)?;
        }
        Step::WriteFlash(HexSource::Text(text)) => {
            let mut stream = BufferStream::from_text(text.as_str());
            session.load_ihex_stream(&mut stream, flash_start, flash_size)?;
        }
        Step::ReadFlash(HexTarget::File(path)) => {
            let mut stream = FileStream::create(path).map_err(HexError::File)?;
            session.save_ihex_stream(&mut stream, flash_start, flash_size)?;
        }
        Step::ReadFlash(HexTarget::Buffer) => {
            let mut stream = BufferStream::new();
            session.save_ihex_stream(&mut stream, flash_start, flash_size)?;
            return Ok(StepOutput::Hex(stream.into_string()));
        }
        Step::WriteFuses(fuses) => {
            for &(fuse, value) in fuses {
                session.write_fuse(fuse, value)?;
            }
        }
        Step::ReadFuses => {
            let count = session.device().fuses_count;
            let fuses = (0..count)
                .map(|fuse| session.read_fuse(fuse))
                .collect::<Result<Vec<_>>>()?;
            return Ok(StepOutput::Fuses(fuses));
        }
        Step::Lock => session.lock()?,
        Step::Unlock => session.unlock_device()?,
        Step::ReadSignature => return Ok(StepOutput::Signature(session.read_signature()?)),
        Step::ReadInfo => return Ok(StepOutput::Info(session.system_info()?)),
    }
    Ok(StepOutput::Done)
}

/// Run `steps` over the serial port named in `config`
pub fn run(config: &Config, steps: &[Step], progress: Box<dyn Progress>) -> Result<Vec<StepOutput>> {
    run_with(SerialTransport::new(&config.port), config, steps, progress)
}

/// Run `steps` over `transport`. The session opens once, the first failing
/// step stops the batch, and the device is released from programming mode
/// and the transport closed on every path.
pub fn run_with<T: Transport>(
    transport: T,
    config: &Config,
    steps: &[Step],
    progress: Box<dyn Progress>,
) -> Result<Vec<StepOutput>> {
    let device = DeviceDB::find(&config.device)?;
    log::info!("Device: {}", device);
    validate(&device, steps)?;

    let mut session = Flashing::connect(transport, config.baud, device, config.timing)?;
    session.set_progress(progress);

    let mut outputs = Vec::with_capacity(steps.len());
    let mut result = Ok(());
    for step in steps {
        match execute(&mut session, step) {
            Ok(output) => outputs.push(output),
            Err(e) => {
                log::error!("{:?} failed: {}", step, e);
                result = Err(e);
                break;
            }
        }
    }

    let left = session.leave_progmode();
    session.into_transport();

    result?;
    left?;
    Ok(outputs)
}
