//! Serial Transportation.
use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{LineConfig, Transport};
use crate::{Error, Result};

const SERIAL_TIMEOUT_MS: u64 = 500;

/// Longest frame the link layer sends at once
const MAX_FRAME: usize = 16;

pub struct SerialTransport {
    port_name: String,
    serial_port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    /// Create a closed transport for `port`
    pub fn new(port: &str) -> Self {
        SerialTransport {
            port_name: port.to_string(),
            serial_port: None,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.serial_port.as_mut().ok_or(Error::PortClosed)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, line: LineConfig) -> Result<()> {
        // drop any stale handle first, a failed open must leave us closed
        self.close();
        log::info!(
            "Opening serial port: \"{}\" @ {} baud",
            self.port_name,
            line.baud
        );
        let timeout = Duration::from_millis(SERIAL_TIMEOUT_MS) + line.transmission_time(MAX_FRAME);
        let port = serialport::new(&self.port_name, line.baud)
            .data_bits(DataBits::Eight)
            .parity(if line.parity { Parity::Even } else { Parity::None })
            .stop_bits(if line.two_stop_bits {
                StopBits::Two
            } else {
                StopBits::One
            })
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;
        port.clear(serialport::ClearBuffer::Input)?;
        self.serial_port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.serial_port.take().is_some() {
            log::debug!("Closing serial port \"{}\"", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.serial_port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
