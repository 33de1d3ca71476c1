//! Abstract byte transport used by the physical layer.
use std::time::Duration;

use crate::Result;

pub use self::serial::SerialTransport;

mod serial;
#[cfg(test)]
pub(crate) mod sim;

pub const DEFAULT_BAUDRATE: u32 = 115200;

/// Baud rates the programmer accepts
pub const BAUDRATES: [u32; 6] = [300, 9600, 38400, 57600, 115200, 230400];

/// UART framing of the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineConfig {
    pub baud: u32,
    /// Even parity when set, none otherwise
    pub parity: bool,
    pub two_stop_bits: bool,
}

impl LineConfig {
    /// UPDI framing: 8 data bits, even parity, two stop bits
    pub const fn updi(baud: u32) -> Self {
        LineConfig {
            baud,
            parity: true,
            two_stop_bits: true,
        }
    }

    /// At 300 baud a 0x00 character holds the line low for ~30ms, above the
    /// 24.6ms UPDI break width.
    pub const fn double_break() -> Self {
        LineConfig {
            baud: 300,
            parity: false,
            two_stop_bits: false,
        }
    }

    /// Time on the wire for `len` characters, 11 bit-times each
    pub fn transmission_time(&self, len: usize) -> Duration {
        let ms = (len as u64 * 1000 * 11) / u64::from(self.baud.max(1)) + 1;
        Duration::from_millis(ms)
    }
}

/// Abstraction of the serial line.
/// `read` is bounded by a timeout and returns 0 when nothing arrived.
pub trait Transport {
    fn open(&mut self, line: LineConfig) -> Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;

    fn write(&mut self, data: &[u8]) -> Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Accumulate partial reads until `buf` is full or a read times out.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            let got = self.read(&mut buf[n..])?;
            if got == 0 {
                break;
            }
            n += got;
        }
        Ok(n)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn open(&mut self, line: LineConfig) -> Result<()> {
        (**self).open(line)
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }
}
