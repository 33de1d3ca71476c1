//! Error types shared by every layer of the programmer.
use thiserror::Error;

use crate::format::HexError;

#[derive(Debug, Error)]
pub enum Error {
    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport used while closed
    #[error("Port is not open")]
    PortClosed,

    /// Fewer bytes than expected arrived before the read timeout
    #[error("No response: expected {expected} byte(s), received {received}")]
    NoResponse { expected: usize, received: usize },

    /// A store was not acknowledged with 0x40
    #[error("{stage}: expected ACK, got 0x{response:02X}")]
    NoAck { stage: &'static str, response: u8 },

    /// Link did not come up after all double-break attempts
    #[error("UPDI initialization failed after {0} attempt(s)")]
    LinkInit(u32),

    /// The device did not accept a key
    #[error("Key not accepted: {0}")]
    KeyRejected(&'static str),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Transfer length outside what one REPEAT burst can carry
    #[error("Invalid length {len} (allowed 1..={max})")]
    InvalidLength { len: usize, max: usize },

    /// Pointer store that is empty or, for word stores, of odd length
    #[error("Invalid store burst of {0} byte(s)")]
    InvalidBurst(usize),

    #[error("Enter progmode first!")]
    NotInProgMode,

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    /// NVM controller reported WRITE_ERROR
    #[error("NVM write error")]
    NvmWrite,

    /// Frame packing/unpacking failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] scroll::Error),

    #[error("Intel HEX: {0}")]
    Hex(#[from] HexError),

    #[error("Wrong or unsupported device type: {0}")]
    UnknownDevice(String),

    #[error("Fuse number {fuse} out of range (device has {count})")]
    InvalidFuse { fuse: u8, count: u8 },

    #[error("Address 0x{0:X} out of the 16-bit data space")]
    AddressOutOfRange(u32),

    #[error("Device table: {0}")]
    DeviceTable(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
